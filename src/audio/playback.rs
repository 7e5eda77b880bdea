//! Gapless playback scheduling via rodio.
//!
//! Decoded frames queue FIFO and are played strictly back-to-back by a
//! drain thread that starts lazily on the first enqueue and steps down
//! when the queue empties. Buffers are never overlapped; each one plays
//! to its natural end before the next is popped. A watch channel reports
//! whether the scheduler is currently draining (the session's `speaking`
//! signal).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::watch;
use tracing::{debug, error};

use super::AudioFrame;

/// Output seam for the drain loop. Implemented by rodio for real playback
/// and by a recording fake in tests.
trait AudioOut: Send + Sync {
    /// Play one buffer to completion, blocking. Returns early if `cut`.
    fn play(&self, samples: Vec<f32>, sample_rate: u32);
    /// Cut whatever is currently playing.
    fn cut(&self);
}

struct RodioOut {
    sink: Sink,
}

impl AudioOut for RodioOut {
    fn play(&self, samples: Vec<f32>, sample_rate: u32) {
        self.sink.append(SamplesBuffer::new(1, sample_rate, samples));
        self.sink.sleep_until_end();
    }

    fn cut(&self) {
        self.sink.stop();
    }
}

struct Shared {
    queue: Mutex<VecDeque<AudioFrame>>,
    /// True while a drain thread owns the queue.
    draining: AtomicBool,
    /// Set by `stop()`; a halted scheduler ignores further enqueues.
    halted: AtomicBool,
    /// The live output sink, registered by the drain thread so `stop()`
    /// can cut the in-flight buffer.
    out: Mutex<Option<Arc<dyn AudioOut>>>,
    speaking: watch::Sender<bool>,
}

/// FIFO scheduler for decoded downlink audio.
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    sample_rate: u32,
}

impl PlaybackScheduler {
    /// Create a scheduler for buffers at `sample_rate`. The returned
    /// receiver is `true` while the queue is draining.
    pub fn new(sample_rate: u32) -> (Self, watch::Receiver<bool>) {
        let (speaking, speaking_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            out: Mutex::new(None),
            speaking,
        });
        (
            Self {
                shared,
                sample_rate,
            },
            speaking_rx,
        )
    }

    /// Append a frame without blocking, starting the drain thread if it
    /// is not already running.
    pub fn enqueue(&self, frame: AudioFrame) {
        if self.shared.halted.load(Ordering::Acquire) {
            debug!("scheduler halted, discarding frame");
            return;
        }
        self.shared.queue.lock().unwrap().push_back(frame);
        if !self.shared.draining.swap(true, Ordering::AcqRel) {
            let _ = self.shared.speaking.send_replace(true);
            spawn_drain_thread(self.shared.clone(), self.sample_rate);
        }
    }

    /// Frames still awaiting output.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Clear the queue and halt the drain loop immediately, dropping any
    /// not-yet-played audio.
    pub fn stop(&self) {
        self.shared.halted.store(true, Ordering::Release);
        self.shared.queue.lock().unwrap().clear();
        if let Some(out) = self.shared.out.lock().unwrap().as_ref() {
            out.cut();
        }
        let _ = self.shared.speaking.send_replace(false);
    }

    /// Resolve once the queue has fully drained (or the scheduler was
    /// stopped). Used by the backend-completed path, which lets queued
    /// audio finish instead of cutting it off.
    pub async fn drained(&self) {
        let mut rx = self.shared.speaking.subscribe();
        loop {
            if !*rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
impl PlaybackScheduler {
    /// Queue frames and hold the speaking signal high as if a drain were
    /// mid-buffer, without starting a drain thread. For session tests.
    pub(crate) fn hold_speaking(&self, frames: Vec<AudioFrame>) {
        self.shared.queue.lock().unwrap().extend(frames);
        self.shared.draining.store(true, Ordering::Release);
        let _ = self.shared.speaking.send_replace(true);
    }

    /// Drop a held speaking signal as if the in-flight buffer finished.
    pub(crate) fn release_speaking(&self) {
        self.shared.draining.store(false, Ordering::Release);
        let _ = self.shared.speaking.send_replace(false);
    }
}

fn spawn_drain_thread(shared: Arc<Shared>, sample_rate: u32) {
    let thread_shared = Arc::clone(&shared);
    let spawned = std::thread::Builder::new()
        .name("voice-playback".into())
        .spawn(move || {
            let shared = thread_shared;
            // The OutputStream is !Send and must stay on this thread; only
            // the sink handle is shared out for stop().
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    error!("failed to open audio output: {e}");
                    abandon(&shared);
                    return;
                }
            };
            let sink = match Sink::try_new(&handle) {
                Ok(sink) => sink,
                Err(e) => {
                    error!("failed to create audio sink: {e}");
                    abandon(&shared);
                    return;
                }
            };
            let out: Arc<dyn AudioOut> = Arc::new(RodioOut { sink });
            *shared.out.lock().unwrap() = Some(out.clone());
            drain(&shared, out.as_ref(), sample_rate);
            // A successor drain thread may have registered its own sink
            // already; only clear the slot if it is still ours.
            let mut slot = shared.out.lock().unwrap();
            if slot.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, &out)) {
                *slot = None;
            }
        });
    if let Err(e) = spawned {
        error!("failed to spawn playback thread: {e}");
        abandon(&shared);
    }
}

/// Give up draining after a setup failure so a later enqueue can retry.
fn abandon(shared: &Shared) {
    shared.draining.store(false, Ordering::Release);
    let _ = shared.speaking.send_replace(false);
}

/// Pop and play frames one at a time until the queue empties or the
/// scheduler halts. Strictly sequential: the next frame is not popped
/// until the current one has played out.
fn drain(shared: &Shared, out: &dyn AudioOut, sample_rate: u32) {
    loop {
        if shared.halted.load(Ordering::Acquire) {
            shared.draining.store(false, Ordering::Release);
            let _ = shared.speaking.send_replace(false);
            return;
        }
        let next = shared.queue.lock().unwrap().pop_front();
        match next {
            Some(frame) => out.play(frame.samples, sample_rate),
            None => {
                // Step down, then re-check once: a frame may have landed
                // between the empty pop and releasing the drain flag.
                shared.draining.store(false, Ordering::Release);
                let refill = !shared.halted.load(Ordering::Acquire)
                    && !shared.queue.lock().unwrap().is_empty();
                if refill
                    && shared
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                if !refill {
                    let _ = shared.speaking.send_replace(false);
                }
                return;
            }
        }
    }
}
