//! Engine and per-session configuration.

/// Uplink capture rate in Hz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Downlink playback rate in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame (~256 ms at 16 kHz).
pub const CAPTURE_BUFFER_SAMPLES: usize = 4096;

/// Capacity of the capture-to-uplink frame queue (~2 s of audio).
const SEND_QUEUE_FRAMES: usize = 8;

/// Engine-level settings, fixed for the life of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the agent backend. Outbound messages POST here;
    /// the push-stream is opened at `{endpoint}/stream/{taskId}`.
    pub endpoint: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_buffer_samples: usize,
    /// Bound on frames queued between the capture callback and the
    /// uplink pump. A full queue drops the incoming frame.
    pub send_queue_frames: usize,
}

impl EngineConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            capture_buffer_samples: CAPTURE_BUFFER_SAMPLES,
            send_queue_frames: SEND_QUEUE_FRAMES,
        }
    }
}

/// Per-session settings, immutable once `start()` succeeds.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Voice name appended to the start control phrase when set.
    pub voice: Option<String>,
    /// Target agent identifier passed in the message metadata.
    pub agent_id: Option<String>,
    /// System prompt passed in the message metadata.
    pub system_prompt: Option<String>,
}
