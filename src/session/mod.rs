//! Session lifecycle and coordination.
//!
//! [`Session`] is the aggregate root and the only component exposed to
//! callers. `start()` acquires the microphone, obtains a task id from the
//! backend, opens the push-stream, and wires the two pipelines:
//! capture -> codec -> send on the way up, stream -> decode -> playback on
//! the way down. `stop()`, a backend completion, or any failure tears all
//! of it down.

mod state;

pub use state::Phase;
use state::PhaseMachine;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::capture::{self, CaptureHandle};
use crate::audio::playback::PlaybackScheduler;
use crate::audio::AudioFrame;
use crate::codec;
use crate::config::{EngineConfig, SessionConfig};
use crate::error::SessionError;
use crate::protocol::client::{ProtocolClient, StreamHandle};
use crate::protocol::{self, StreamEvent, TaskId, TaskState};

/// Notifications surfaced to the caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new phase.
    PhaseChanged(Phase),
    /// Transcript text arrived on the push-stream.
    Transcript(String),
    /// The session failed; a `PhaseChanged(Error)` follows.
    Failed(String),
}

/// Resources held only while a session is live.
struct Active {
    context_id: String,
    config: SessionConfig,
    task_id: TaskId,
    capture: CaptureHandle,
    playback: Arc<PlaybackScheduler>,
    uplink: JoinHandle<()>,
    downlink: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

struct SessionInner {
    phase: PhaseMachine,
    engine: EngineConfig,
    client: ProtocolClient,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Mutex<Option<Active>>,
}

/// One end-to-end voice interaction, from `start()` to idle or error.
///
/// Exactly one session is live per engine instance; `start()` while
/// active is rejected with [`SessionError::AlreadyActive`].
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an engine bound to one backend endpoint. The returned
    /// receiver carries phase changes, transcripts, and failures.
    pub fn new(engine: EngineConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let client = ProtocolClient::new(&engine);
        let inner = Arc::new(SessionInner {
            phase: PhaseMachine::new(),
            engine,
            client,
            events,
            active: Mutex::new(None),
        });
        (Self { inner }, events_rx)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.phase.current()
    }

    /// Task id of the live session, if one has been assigned.
    pub fn task_id(&self) -> Option<TaskId> {
        self.inner
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.task_id.clone())
    }

    /// Start a session. Only valid from idle; any failure along the way
    /// moves the session to error and releases everything acquired so far.
    ///
    /// `context_id` is the caller-supplied correlation id, stable for the
    /// session's life.
    pub async fn start(
        &self,
        context_id: &str,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        if !self.inner.phase.begin_connecting() {
            return Err(SessionError::AlreadyActive);
        }
        self.inner.emit_phase(Phase::Connecting);

        match self.connect(context_id, config).await {
            Ok(()) => {
                if !self.inner.phase.mark_listening() {
                    // stop() raced the tail of connect and already reset
                    // the phase; release what connect just stored.
                    debug!("session stopped during connect");
                    self.inner.teardown(Phase::Idle, true);
                    return Ok(());
                }
                self.inner.emit_phase(Phase::Listening);
                info!(context_id, "voice session started");
                Ok(())
            }
            Err(e) => {
                error!(context_id, "session start failed: {e}");
                self.inner.fail(&e);
                Err(e)
            }
        }
    }

    async fn connect(&self, context_id: &str, config: SessionConfig) -> Result<(), SessionError> {
        let inner = &self.inner;

        // Capture first: a denied microphone should fail before any
        // backend traffic. Dropped on early return, releasing the device.
        let (capture, frames) = capture::open(&inner.engine)?;

        let phrase = protocol::start_phrase(config.voice.as_deref());
        let task_id = inner.client.send_control(context_id, &phrase, &config).await?;
        let stream = inner.client.open_stream(&task_id).await?;

        let (playback, speaking_rx) = PlaybackScheduler::new(inner.engine.playback_sample_rate);
        let playback = Arc::new(playback);

        let uplink = tokio::spawn(uplink_pump(
            inner.clone(),
            frames,
            context_id.to_string(),
            config.clone(),
        ));
        let downlink = tokio::spawn(downlink_pump(inner.clone(), stream, playback.clone()));
        let watcher = tokio::spawn(speaking_watcher(inner.clone(), speaking_rx));

        *inner.active.lock().unwrap() = Some(Active {
            context_id: context_id.to_string(),
            config,
            task_id,
            capture,
            playback,
            uplink,
            downlink,
            watcher,
        });
        Ok(())
    }

    /// Stop the session. No-op from idle; otherwise sends the end control
    /// message best-effort, releases every resource, and returns to idle.
    /// Idempotent and safe to call concurrently with internal teardown.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.phase.current() == Phase::Idle {
            return;
        }

        // Courtesy notification; failure here never blocks teardown.
        let snapshot = inner
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| (a.context_id.clone(), a.config.clone()));
        if let Some((context_id, config)) = snapshot {
            if let Err(e) = inner
                .client
                .send_control(&context_id, protocol::END_PHRASE, &config)
                .await
            {
                warn!("end-of-session notification failed: {e}");
            }
        }

        inner.teardown(Phase::Idle, true);
        info!("voice session stopped");
    }
}

impl SessionInner {
    fn emit_phase(&self, phase: Phase) {
        let _ = self.events.send(SessionEvent::PhaseChanged(phase));
    }

    /// Move to the terminal error phase and release everything.
    fn fail(&self, err: &SessionError) {
        let _ = self.events.send(SessionEvent::Failed(err.to_string()));
        self.teardown(Phase::Error, true);
    }

    /// Release every acquired resource. Each step runs regardless of
    /// earlier step failures; failures are logged, never propagated, so
    /// one stuck resource cannot prevent release of the others.
    fn teardown(&self, next: Phase, clear_playback: bool) {
        let active = self.active.lock().unwrap().take();
        if let Some(mut active) = active {
            active.capture.close();
            if clear_playback {
                active.playback.stop();
            }
            active.uplink.abort();
            active.downlink.abort();
            active.watcher.abort();
        }
        let changed = match next {
            Phase::Error => self.phase.mark_error(),
            _ => self.phase.reset(),
        };
        // Concurrent teardowns (stop() racing a backend wind-down) must
        // not announce the same transition twice.
        if changed {
            self.emit_phase(next);
        }
    }

    /// Backend signalled completion: stop feeding it immediately, but let
    /// already-queued audio play out before going idle. Only `stop()`
    /// cuts playback short.
    async fn finish_after_drain(&self, playback: &PlaybackScheduler) {
        {
            let mut guard = self.active.lock().unwrap();
            let Some(active) = guard.as_mut() else {
                // stop() won the race; nothing left to wind down.
                return;
            };
            active.capture.close();
            active.uplink.abort();
        }
        playback.drained().await;
        self.teardown(Phase::Idle, false);
        info!("voice session completed by backend");
    }
}

/// Capture -> codec -> send. Frames go out strictly in capture order;
/// each send is awaited before the next frame is dequeued. An `Err` item
/// is a capture fault and fails the session.
async fn uplink_pump(
    inner: Arc<SessionInner>,
    mut frames: mpsc::Receiver<Result<AudioFrame, SessionError>>,
    context_id: String,
    config: SessionConfig,
) {
    while let Some(item) = frames.recv().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                error!("capture failed mid-session: {e}");
                inner.fail(&e);
                return;
            }
        };
        let chunk = codec::encode(&frame);
        if let Err(e) = inner.client.send_audio(&context_id, &chunk, &config).await {
            error!("audio send failed: {e}");
            inner.fail(&e);
            return;
        }
    }
    debug!("capture channel closed, uplink done");
}

/// Stream -> decode -> route. Audio goes to the playback queue,
/// transcripts to the caller, status updates drive the lifecycle.
async fn downlink_pump(
    inner: Arc<SessionInner>,
    mut stream: StreamHandle,
    playback: Arc<PlaybackScheduler>,
) {
    while let Some(item) = stream.recv().await {
        match item {
            Ok(StreamEvent::Audio(chunk)) => match codec::decode(&chunk) {
                Ok(frame) => playback.enqueue(frame),
                Err(e) => warn!("skipping undecodable audio chunk: {e}"),
            },
            Ok(StreamEvent::Transcript(text)) => {
                let _ = inner.events.send(SessionEvent::Transcript(text));
            }
            Ok(StreamEvent::Status(TaskState::Working)) => {
                debug!("backend task working");
            }
            Ok(StreamEvent::Status(TaskState::Completed)) => {
                inner.finish_after_drain(&playback).await;
                return;
            }
            Ok(StreamEvent::Status(TaskState::Failed)) => {
                error!("backend reported task failure");
                inner.fail(&SessionError::TaskFailed);
                return;
            }
            Err(e) => {
                error!("push-stream lost: {e}");
                inner.fail(&e);
                return;
            }
        }
    }
    debug!("push-stream ended");
}

/// Mirror the playback queue's drain state into listening/speaking.
/// The phase machine does not decide this on its own.
async fn speaking_watcher(
    inner: Arc<SessionInner>,
    mut speaking_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if speaking_rx.changed().await.is_err() {
            return;
        }
        let speaking = *speaking_rx.borrow();
        if speaking {
            if inner.phase.mark_speaking() {
                inner.emit_phase(Phase::Speaking);
            }
        } else if inner.phase.mark_listening() {
            inner.emit_phase(Phase::Listening);
        }
    }
}
