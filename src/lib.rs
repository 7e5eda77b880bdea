//! Real-time voice session engine.
//!
//! Captures microphone audio, streams it to a remote conversational agent
//! over a request/response call plus a push-stream subscription, plays the
//! returned speech gaplessly, and tracks the session lifecycle with clean
//! cancellation and teardown.
//!
//! [`Session`] is the only entry point:
//!
//! ```no_run
//! use voice_session::{EngineConfig, Session, SessionConfig, SessionEvent};
//!
//! # async fn run() -> Result<(), voice_session::SessionError> {
//! let (session, mut events) = Session::new(EngineConfig::new("http://localhost:8080/agent"));
//! session
//!     .start("ctx-1", SessionConfig { voice: Some("Kore".into()), ..Default::default() })
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Transcript(text) = event {
//!         println!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use audio::AudioFrame;
pub use codec::WireAudioChunk;
pub use config::{EngineConfig, SessionConfig};
pub use error::SessionError;
pub use protocol::{StreamEvent, TaskId, TaskState};
pub use session::{Phase, Session, SessionEvent};
