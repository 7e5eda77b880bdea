//! Microphone capture via cpal.
//!
//! Opens the default input device at its native config, downmixes to mono
//! and resamples to the capture rate if needed, and delivers fixed-size
//! [`AudioFrame`]s over a bounded channel. The cpal `Stream` is not `Send`,
//! so it lives on a dedicated thread that parks until the handle is closed.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::AudioFrame;
use crate::config::EngineConfig;
use crate::error::SessionError;

/// Control messages for the capture thread.
enum Control {
    /// The handle was closed; drop the stream and exit.
    Shutdown,
    /// The input stream reported a fatal error mid-session.
    Fault(String),
}

/// Owner of the open microphone. Dropping the handle releases the device.
pub struct CaptureHandle {
    control: Option<std::sync::mpsc::Sender<Control>>,
}

impl CaptureHandle {
    /// Release the microphone. Idempotent; safe to call more than once.
    pub fn close(&mut self) {
        if let Some(tx) = self.control.take() {
            // The capture thread drops the stream when this side hangs up.
            let _ = tx.send(Control::Shutdown);
            info!("audio capture closed");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
impl CaptureHandle {
    /// Handle with no device behind it, for session tests.
    pub(crate) fn dummy() -> Self {
        Self { control: None }
    }
}

/// Open the microphone and start producing frames.
///
/// One frame of `capture_buffer_samples` mono samples at
/// `capture_sample_rate` arrives on the returned channel per hardware
/// buffer interval as an `Ok` item. The channel is bounded at
/// `send_queue_frames`; a full queue drops the incoming frame rather than
/// blocking the audio callback. A fatal mid-session stream error arrives
/// as a terminal `Err` item after the device has been released.
pub fn open(
    config: &EngineConfig,
) -> Result<
    (
        CaptureHandle,
        mpsc::Receiver<Result<AudioFrame, SessionError>>,
    ),
    SessionError,
> {
    let (frame_tx, frame_rx) = mpsc::channel(config.send_queue_frames);
    let (control_tx, control_rx) = std::sync::mpsc::channel::<Control>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let target_rate = config.capture_sample_rate;
    let frame_samples = config.capture_buffer_samples;
    let fault_tx = control_tx.clone();

    std::thread::Builder::new()
        .name("voice-capture".into())
        .spawn(move || {
            let stream = match build_stream(target_rate, frame_samples, frame_tx.clone(), fault_tx)
            {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            park_capture(control_rx, frame_tx, stream);
        })
        .map_err(|e| SessionError::DeviceUnavailable(format!("capture thread: {e}")))?;

    ready_rx
        .recv()
        .map_err(|_| SessionError::DeviceUnavailable("capture thread died".into()))??;

    Ok((
        CaptureHandle {
            control: Some(control_tx),
        },
        frame_rx,
    ))
}

/// Park the capture thread until close() or a stream fault. Owns the
/// stream; on a fault the device is released first, then the fault is
/// surfaced on the frame channel so the uplink stops waiting on a dead
/// microphone. Exiting drops the thread's sender, closing the channel.
fn park_capture<S>(
    control_rx: std::sync::mpsc::Receiver<Control>,
    frame_tx: mpsc::Sender<Result<AudioFrame, SessionError>>,
    stream: S,
) {
    match control_rx.recv() {
        Ok(Control::Fault(message)) => {
            drop(stream);
            let _ = frame_tx.blocking_send(Err(SessionError::DeviceUnavailable(message)));
        }
        _ => drop(stream),
    }
}

/// Build and start the input stream on the current thread.
fn build_stream(
    target_rate: u32,
    frame_samples: usize,
    frame_tx: mpsc::Sender<Result<AudioFrame, SessionError>>,
    fault_tx: std::sync::mpsc::Sender<Control>,
) -> Result<cpal::Stream, SessionError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SessionError::DeviceUnavailable("no default input device".into()))?;

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    let default_config = device.default_input_config()?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    info!(
        device = %dev_name,
        native_rate,
        channels,
        "opening input device (resampling to {target_rate} Hz mono if needed)"
    );

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Accumulator for building full frames across hardware buffers.
    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            let mono = to_mono(data, channels);
            let resampled = resample_linear(&mono, native_rate, target_rate);
            pending.extend_from_slice(&resampled);
            while pending.len() >= frame_samples {
                let frame = AudioFrame::new(pending.drain(..frame_samples).collect());
                match frame_tx.try_send(Ok(frame)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Outbound queue full under network backpressure;
                        // dropping keeps the callback non-blocking.
                        warn!("send queue full, dropping capture frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        },
        move |err| {
            error!("input stream error: {err}");
            // Wake the parked thread so the fault reaches the uplink.
            let _ = fault_tx.send(Control::Fault(err.to_string()));
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Down-mix interleaved multi-channel audio to mono by averaging.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|group| group.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear resampler for mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = src.floor() as usize;
        let frac = (src - idx as f64) as f32;
        let s0 = input.get(idx).copied().unwrap_or(0.0);
        let s1 = input.get(idx + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![0.2, 0.4, -1.0, 1.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.3, 0.0]);
    }

    #[test]
    fn downmix_passes_mono_through() {
        let mono = vec![0.1, -0.1];
        assert_eq!(to_mono(&mono, 1), mono);
    }

    #[test]
    fn resample_halves_length_when_downsampling_2x() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // Every other input sample, exactly.
        assert_eq!(out[1], 2.0);
        assert_eq!(out[10], 20.0);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let input = vec![0.5, -0.5, 0.25];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn stream_fault_surfaces_an_error_and_closes_the_channel() {
        let (frame_tx, mut frame_rx) = mpsc::channel(2);
        let (control_tx, control_rx) = std::sync::mpsc::channel();
        let parked = std::thread::spawn(move || park_capture(control_rx, frame_tx, ()));

        control_tx
            .send(Control::Fault("device unplugged".into()))
            .unwrap();
        let item = frame_rx.blocking_recv().expect("fault was not delivered");
        assert!(matches!(item, Err(SessionError::DeviceUnavailable(_))));
        // The channel closes behind the fault.
        assert!(frame_rx.blocking_recv().is_none());
        parked.join().unwrap();
    }

    #[test]
    fn shutdown_closes_the_channel_without_an_error() {
        let (frame_tx, mut frame_rx) =
            mpsc::channel::<Result<AudioFrame, SessionError>>(2);
        let (control_tx, control_rx) = std::sync::mpsc::channel();
        let parked = std::thread::spawn(move || park_capture(control_rx, frame_tx, ()));

        control_tx.send(Control::Shutdown).unwrap();
        assert!(frame_rx.blocking_recv().is_none());
        parked.join().unwrap();
    }
}
