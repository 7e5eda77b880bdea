//! HTTP client for the agent backend.
//!
//! One POST per outbound message; the push-stream is an SSE subscription
//! demultiplexed onto a channel by a spawned parser task.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    audio_request, control_request, parse_stream_payload, SendMessageRequest, StreamEvent, TaskId,
};
use crate::codec::WireAudioChunk;
use crate::config::{EngineConfig, SessionConfig};
use crate::error::SessionError;

/// Request/response + push-stream client for one backend endpoint.
pub struct ProtocolClient {
    client: reqwest::Client,
    endpoint: String,
    capture_sample_rate: u32,
}

impl ProtocolClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            capture_sample_rate: config.capture_sample_rate,
        }
    }

    /// Send a control phrase. Returns the backend-assigned task id.
    pub async fn send_control(
        &self,
        context_id: &str,
        text: &str,
        config: &SessionConfig,
    ) -> Result<TaskId, SessionError> {
        info!(context_id, text, "sending control message");
        let json = self
            .post(control_request(context_id, text, config))
            .await?;
        let task_id = json["result"]["taskId"]
            .as_str()
            .ok_or_else(|| SessionError::Protocol("control response missing result.taskId".into()))?;
        Ok(TaskId(task_id.to_string()))
    }

    /// Send one audio chunk. The call is awaited to completion before the
    /// uplink pump dequeues the next frame, so at most one send is ever
    /// in flight.
    pub async fn send_audio(
        &self,
        context_id: &str,
        chunk: &WireAudioChunk,
        config: &SessionConfig,
    ) -> Result<(), SessionError> {
        debug!(bytes = chunk.0.len(), "sending audio chunk");
        self.post(audio_request(
            context_id,
            chunk,
            self.capture_sample_rate,
            config,
        ))
        .await?;
        Ok(())
    }

    async fn post(&self, request: SendMessageRequest) -> Result<serde_json::Value, SessionError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Protocol(format!("backend call failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Protocol(format!(
                "backend returned {status}: {body}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| SessionError::Protocol(format!("malformed backend response: {e}")))
    }

    /// Open the push-stream subscription for `task_id`.
    pub async fn open_stream(&self, task_id: &TaskId) -> Result<StreamHandle, SessionError> {
        let url = format!("{}/stream/{}", self.endpoint, task_id);
        info!(%task_id, "opening push-stream");
        let resp = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| SessionError::Stream(format!("subscription failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SessionError::Protocol(format!(
                "push-stream subscription returned {}",
                resp.status()
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let byte_stream = resp.bytes_stream();
        tokio::spawn(async move {
            pump_stream(byte_stream, tx).await;
        });
        Ok(StreamHandle { rx })
    }
}

/// Receiving end of the demultiplexed push-stream.
///
/// `recv` yields events strictly in arrival order. An `Err` item is a
/// terminal transport loss; `None` means the server closed cleanly.
pub struct StreamHandle {
    rx: mpsc::UnboundedReceiver<Result<StreamEvent, SessionError>>,
}

impl StreamHandle {
    pub async fn recv(&mut self) -> Option<Result<StreamEvent, SessionError>> {
        self.rx.recv().await
    }

    /// Handle fed by a local channel instead of a subscription, for
    /// session tests.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (
        Self,
        mpsc::UnboundedSender<Result<StreamEvent, SessionError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

/// Consume the SSE byte stream, reassemble lines across chunk boundaries,
/// and push parsed events onto the channel.
async fn pump_stream<E: std::fmt::Display>(
    byte_stream: impl Stream<Item = Result<Bytes, E>> + Unpin,
    tx: mpsc::UnboundedSender<Result<StreamEvent, SessionError>>,
) {
    let mut line_buffer = String::new();
    let mut stream = Box::pin(byte_stream);

    while let Some(item) = stream.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("push-stream transport error: {e}");
                let _ = tx.send(Err(SessionError::Stream(e.to_string())));
                return;
            }
        };
        line_buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(pos) = line_buffer.find('\n') {
            let line: String = line_buffer.drain(..=pos).collect();
            if !dispatch_line(line.trim_end(), &tx) {
                return;
            }
        }
    }
    debug!("push-stream closed by server");
}

/// Handle one SSE line. Returns `false` when the receiver is gone.
fn dispatch_line(
    line: &str,
    tx: &mpsc::UnboundedSender<Result<StreamEvent, SessionError>>,
) -> bool {
    let Some(payload) = line.strip_prefix("data:") else {
        // Blank keep-alive lines and comment fields.
        return true;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return true;
    }
    match parse_stream_payload(payload) {
        Ok(events) => {
            for event in events {
                if tx.send(Ok(event)).is_err() {
                    return false;
                }
            }
        }
        // One malformed message must not terminate a healthy session.
        Err(e) => warn!("skipping malformed stream message: {e}"),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&str]) -> Vec<Result<Bytes, std::io::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    async fn collect(
        items: Vec<Result<Bytes, std::io::Error>>,
    ) -> Vec<Result<StreamEvent, SessionError>> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pump_stream(stream::iter(items), tx).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn reassembles_events_split_across_chunks() {
        let items = chunks(&[
            "data: {\"result\":{\"type\":\"status\",",
            "\"status\":{\"state\":\"working\"}}}\n",
            "data: {\"result\":{\"type\":\"artifact\",\"artifact\":{\"parts\":[{\"text\":\"hi\"}]}}}\n",
        ]);
        let events = collect(items).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Status(super::super::TaskState::Working))
        ));
        assert!(matches!(events[1], Ok(StreamEvent::Transcript(ref t)) if t == "hi"));
    }

    #[tokio::test]
    async fn malformed_message_among_valid_ones_is_skipped() {
        let items = chunks(&[
            "data: {\"result\":{\"type\":\"status\",\"status\":{\"state\":\"working\"}}}\n",
            "data: {garbage\n",
            "data: {\"result\":{\"type\":\"status\",\"status\":{\"state\":\"completed\"}}}\n",
        ]);
        let events = collect(items).await;
        // Exactly the two valid events, corrupt one skipped.
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_terminal_stream_error() {
        let items = vec![
            Ok(Bytes::from_static(
                b"data: {\"result\":{\"type\":\"status\",\"status\":{\"state\":\"working\"}}}\n",
            )),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ];
        let events = collect(items).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(SessionError::Stream(_))));
    }

    #[tokio::test]
    async fn ignores_comments_and_blank_lines() {
        let items = chunks(&[": keep-alive\n\n", "data:\n"]);
        let events = collect(items).await;
        assert!(events.is_empty());
    }
}
