use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{AudioBackend, MuteState, StreamFormat, pcm16_to_bytes};
use crate::protocol::codec;
use crate::sdk::SessionHandle;
use crate::Error;

/// Microphone leg: a dedicated thread that streams frames until stopped.
pub struct CaptureLeg {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

pub(crate) struct CaptureParams {
    pub backend: Arc<dyn AudioBackend>,
    pub format: StreamFormat,
    pub mute: MuteState,
    pub poll_interval: Duration,
    pub handle: SessionHandle,
    /// Fires once the session setup has been written; dropped if the connection never opens.
    pub opened: oneshot::Receiver<()>,
    /// Capture leg of the previous connection; joined before the input device is opened.
    pub previous: Option<CaptureLeg>,
}

impl CaptureLeg {
    /// # Errors
    /// Returns an error if the OS refuses to spawn the thread.
    #[allow(clippy::result_large_err)]
    pub(crate) fn spawn(params: CaptureParams) -> crate::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("rt-voice-capture".to_string())
            .spawn(move || run(params, &thread_stop))?;
        Ok(Self { stop, thread: Some(thread) })
    }

    /// Ask the loop to exit at its next iteration.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Signal and wait for the thread; the input device is released by then.
    pub fn join(mut self) {
        self.signal_stop();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            tracing::warn!("Capture thread panicked");
        }
    }
}

impl Drop for CaptureLeg {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

fn run(params: CaptureParams, stop: &AtomicBool) {
    let CaptureParams { backend, format, mute, poll_interval, handle, opened, previous } = params;

    if let Some(previous) = previous {
        previous.join();
    }
    if opened.blocking_recv().is_err() {
        tracing::debug!("Connection never opened, capture not started");
        return;
    }
    if stop.load(Ordering::Acquire) {
        return;
    }

    let mut input = match backend.open_input(format) {
        Ok(input) => input,
        Err(err) => {
            tracing::warn!("Failed to open input device: {err}");
            return;
        }
    };
    tracing::info!(rate = format.sample_rate, frame = format.frame_samples, "Microphone capture started");

    let mut frame = vec![0i16; format.frame_samples];
    let mut was_muted = false;
    while !stop.load(Ordering::Acquire) {
        if mute.is_muted() {
            was_muted = true;
            std::thread::sleep(poll_interval);
            continue;
        }
        if was_muted {
            // Whatever queued up while muted is the assistant's own voice.
            input.discard_pending();
            was_muted = false;
        }
        if let Err(err) = input.read_frame(&mut frame) {
            tracing::warn!("Error capturing audio: {err}");
            break;
        }
        if mute.is_muted() || stop.load(Ordering::Acquire) {
            continue;
        }
        let event = match codec::audio_chunk(&pcm16_to_bytes(&frame)) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Dropping audio frame: {err}");
                continue;
            }
        };
        match handle.send_blocking(event) {
            Ok(()) => {}
            Err(Error::ConnectionClosed) => {
                tracing::info!("Connection closed, stopping capture");
                break;
            }
            Err(err) => tracing::warn!("Failed to send audio frame: {err}"),
        }
    }

    drop(input);
    tracing::info!("Microphone capture stopped");
}
