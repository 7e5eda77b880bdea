//! Wire contract with the agent backend.
//!
//! Outbound traffic is a single `SendMessage` call per message; inbound
//! events arrive on a push-stream keyed by task id. This module holds the
//! serialized shapes, the control phrases, and the pure parsing of stream
//! payloads into [`StreamEvent`]s. The I/O lives in [`client`].

pub mod client;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::codec::WireAudioChunk;
use crate::config::SessionConfig;
use crate::error::SessionError;

/// Backend-assigned correlation id for the push-stream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state the backend reports for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Working,
    Completed,
    Failed,
}

/// One decoded unit from the push-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A synthesized speech chunk for playback.
    Audio(WireAudioChunk),
    /// Transcript text for display.
    Transcript(String),
    /// A task status update.
    Status(TaskState),
}

// ---------------------------------------------------------------------------
// Outbound envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest {
    method: &'static str,
    params: SendMessageParams,
}

#[derive(Debug, Serialize)]
struct SendMessageParams {
    message: OutboundMessage,
    metadata: OutboundMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMessage {
    role: &'static str,
    context_id: String,
    parts: Vec<OutboundPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutboundPart {
    Text { text: String },
    Data { data: DataPayload },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataPayload {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMetadata {
    target_agent: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
}

fn envelope(context_id: &str, part: OutboundPart, config: &SessionConfig) -> SendMessageRequest {
    SendMessageRequest {
        method: "SendMessage",
        params: SendMessageParams {
            message: OutboundMessage {
                role: "user",
                context_id: context_id.to_string(),
                parts: vec![part],
            },
            metadata: OutboundMetadata {
                target_agent: "voice",
                agent_id: config.agent_id.clone(),
                system_prompt: config.system_prompt.clone(),
            },
        },
    }
}

pub(crate) fn control_request(
    context_id: &str,
    text: &str,
    config: &SessionConfig,
) -> SendMessageRequest {
    envelope(
        context_id,
        OutboundPart::Text {
            text: text.to_string(),
        },
        config,
    )
}

pub(crate) fn audio_request(
    context_id: &str,
    chunk: &WireAudioChunk,
    sample_rate: u32,
    config: &SessionConfig,
) -> SendMessageRequest {
    envelope(
        context_id,
        OutboundPart::Data {
            data: DataPayload {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: chunk.0.clone(),
            },
        },
        config,
    )
}

/// Control phrase that opens a session, with the optional voice suffix.
pub(crate) fn start_phrase(voice: Option<&str>) -> String {
    match voice {
        Some(name) => format!("start voice with {name}"),
        None => "start voice".to_string(),
    }
}

/// Courtesy phrase sent before teardown.
pub(crate) const END_PHRASE: &str = "end voice";

// ---------------------------------------------------------------------------
// Inbound parsing
// ---------------------------------------------------------------------------

/// Parse one push-stream payload into its events, in part order.
///
/// An artifact message may carry several parts and each yields its own
/// event. A part of unrecognized shape is skipped with a warning so one
/// odd part cannot take down the session; a payload that is not valid
/// JSON or has an unknown type is an error the caller logs and skips.
pub(crate) fn parse_stream_payload(raw: &str) -> Result<Vec<StreamEvent>, SessionError> {
    let json: Value = serde_json::from_str(raw)
        .map_err(|e| SessionError::Protocol(format!("malformed stream payload: {e}")))?;
    let result = &json["result"];
    match result["type"].as_str() {
        Some("artifact") => {
            let parts = result["artifact"]["parts"]
                .as_array()
                .ok_or_else(|| SessionError::Protocol("artifact without parts".into()))?;
            let mut events = Vec::new();
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    events.push(StreamEvent::Transcript(text.to_string()));
                } else if part["data"]["data"]["type"].as_str() == Some("audio") {
                    match part["data"]["data"]["data"].as_str() {
                        Some(b64) => {
                            events.push(StreamEvent::Audio(WireAudioChunk(b64.to_string())))
                        }
                        None => warn!("audio part without payload, skipping"),
                    }
                } else {
                    warn!("unrecognized artifact part, skipping");
                }
            }
            Ok(events)
        }
        Some("status") => {
            let state = result["status"]["state"]
                .as_str()
                .ok_or_else(|| SessionError::Protocol("status without state".into()))?;
            let state = match state {
                "working" => TaskState::Working,
                "completed" => TaskState::Completed,
                "failed" => TaskState::Failed,
                other => {
                    return Err(SessionError::Protocol(format!("unknown task state: {other}")))
                }
            };
            Ok(vec![StreamEvent::Status(state)])
        }
        other => Err(SessionError::Protocol(format!(
            "unknown stream message type: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_phrase_without_voice() {
        assert_eq!(start_phrase(None), "start voice");
    }

    #[test]
    fn start_phrase_with_voice() {
        assert_eq!(start_phrase(Some("Kore")), "start voice with Kore");
    }

    #[test]
    fn control_request_serializes_text_part() {
        let req = control_request("ctx-1", "start voice", &SessionConfig::default());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "SendMessage");
        assert_eq!(json["params"]["message"]["role"], "user");
        assert_eq!(json["params"]["message"]["contextId"], "ctx-1");
        assert_eq!(json["params"]["message"]["parts"][0]["text"], "start voice");
        assert_eq!(json["params"]["metadata"]["targetAgent"], "voice");
        // Unset optional metadata is omitted entirely.
        assert!(json["params"]["metadata"].get("agentId").is_none());
    }

    #[test]
    fn audio_request_serializes_data_part_with_mime() {
        let config = SessionConfig {
            agent_id: Some("helper".into()),
            ..Default::default()
        };
        let chunk = WireAudioChunk("AAAA".into());
        let req = audio_request("ctx-2", &chunk, 16_000, &config);
        let json = serde_json::to_value(&req).unwrap();
        let part = &json["params"]["message"]["parts"][0];
        assert_eq!(part["data"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(part["data"]["data"], "AAAA");
        assert_eq!(json["params"]["metadata"]["agentId"], "helper");
    }

    #[test]
    fn parses_artifact_with_audio_and_text_parts_in_order() {
        let raw = r#"{"result":{"type":"artifact","artifact":{"parts":[
            {"data":{"data":{"type":"audio","data":"UElDTQ=="}}},
            {"text":"hello there"}
        ]}}}"#;
        let events = parse_stream_payload(raw).unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::Audio(WireAudioChunk("UElDTQ==".into())),
                StreamEvent::Transcript("hello there".into()),
            ]
        );
    }

    #[test]
    fn parses_status_states() {
        for (raw_state, state) in [
            ("working", TaskState::Working),
            ("completed", TaskState::Completed),
            ("failed", TaskState::Failed),
        ] {
            let raw = format!(r#"{{"result":{{"type":"status","status":{{"state":"{raw_state}"}}}}}}"#);
            assert_eq!(
                parse_stream_payload(&raw).unwrap(),
                vec![StreamEvent::Status(state)]
            );
        }
    }

    #[test]
    fn unknown_part_shape_is_skipped_not_fatal() {
        let raw = r#"{"result":{"type":"artifact","artifact":{"parts":[
            {"mystery":true},
            {"text":"kept"}
        ]}}}"#;
        let events = parse_stream_payload(raw).unwrap();
        assert_eq!(events, vec![StreamEvent::Transcript("kept".into())]);
    }

    #[test]
    fn rejects_malformed_json_and_unknown_types() {
        assert!(parse_stream_payload("{not json").is_err());
        assert!(parse_stream_payload(r#"{"result":{"type":"telemetry"}}"#).is_err());
        assert!(
            parse_stream_payload(r#"{"result":{"type":"status","status":{"state":"paused"}}}"#)
                .is_err()
        );
    }
}
