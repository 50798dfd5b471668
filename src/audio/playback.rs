use base64::Engine as _;
use base64::engine::general_purpose;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{AudioOutput, MuteState};

/// Speaker leg. Runs inline on the connection task.
pub struct Playback {
    output: Option<Box<dyn AudioOutput>>,
    mute: MuteState,
    unmute_delay: Duration,
    pending_unmute: Option<JoinHandle<()>>,
}

impl Playback {
    #[must_use]
    pub fn new(output: Option<Box<dyn AudioOutput>>, mute: MuteState, unmute_delay: Duration) -> Self {
        Self {
            output,
            mute,
            unmute_delay,
            pending_unmute: None,
        }
    }

    /// No output device: audio events are ignored and the mute flag is left alone.
    #[must_use]
    pub fn disabled(mute: MuteState) -> Self {
        Self::new(None, mute, Duration::ZERO)
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.output.is_some()
    }

    /// Handle one `response.audio.delta` payload.
    pub fn on_delta(&mut self, delta: &str) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if let Some(timer) = self.pending_unmute.take() {
            timer.abort();
        }
        if self.mute.mute() {
            tracing::debug!("Muting microphone during assistant audio");
        }
        let pcm = match general_purpose::STANDARD.decode(delta.as_bytes()) {
            Ok(pcm) => pcm,
            Err(err) => {
                tracing::warn!("Dropping undecodable audio delta: {err}");
                return;
            }
        };
        if let Err(err) = output.write(&pcm) {
            tracing::warn!("Playback device failed, disabling playback: {err}");
            self.output = None;
            self.mute.unmute();
        }
    }

    /// Handle `response.audio.done`: unmute once queued audio has played out plus the grace delay.
    pub fn on_done(&mut self) {
        let Some(output) = self.output.as_ref() else {
            return;
        };
        let delay = output.queued() + self.unmute_delay;
        if let Some(timer) = self.pending_unmute.take() {
            timer.abort();
        }
        let mute = self.mute.clone();
        self.pending_unmute = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if mute.unmute() {
                tracing::debug!("Unmuting microphone after assistant audio");
            }
        }));
    }

    /// Cancel timers and release the output device.
    pub fn shutdown(&mut self) {
        if let Some(timer) = self.pending_unmute.take() {
            timer.abort();
        }
        self.output = None;
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.shutdown();
    }
}
