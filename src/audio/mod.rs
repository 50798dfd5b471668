//! Local audio I/O for realtime sessions.
//!
//! Two legs share one [`MuteState`]: playback mutes while the assistant speaks,
//! capture stops sending while muted so the microphone never re-ingests the
//! speaker output.

mod capture;
pub mod device;
mod playback;

pub use capture::CaptureLeg;
pub(crate) use capture::CaptureParams;
pub use device::CpalBackend;
pub use playback::Playback;

use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const FRAME_SAMPLES: usize = 1024;

/// Grace period between `response.audio.done` and unmuting, so buffered playback drains.
pub const UNMUTE_DELAY: Duration = Duration::from_millis(500);

/// How often a muted capture loop re-checks the flag. Kept under one frame (~43ms).
pub const MUTE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Mono PCM16 stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

impl StreamFormat {
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        self.samples_duration(self.frame_samples)
    }

    /// Play time of `samples` mono samples.
    #[must_use]
    pub fn samples_duration(&self, samples: usize) -> Duration {
        let samples = u64::try_from(samples).unwrap_or(u64::MAX);
        Duration::from_micros(samples.saturating_mul(1_000_000) / u64::from(self.sample_rate.max(1)))
    }
}

/// Microphone side. Lives on the capture thread only, so it need not be `Send`.
pub trait AudioInput {
    /// Block until `frame` is filled with fresh samples.
    ///
    /// # Errors
    /// Returns `Error::AudioDevice` if the device fails or stalls.
    #[allow(clippy::result_large_err)]
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()>;

    /// Drop any samples captured but not yet read.
    fn discard_pending(&mut self) {}
}

/// Speaker side. Driven from the connection task.
pub trait AudioOutput: Send {
    /// Queue little-endian PCM16 bytes for playback.
    ///
    /// # Errors
    /// Returns `Error::AudioDevice` if the device is gone.
    #[allow(clippy::result_large_err)]
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Audio accepted by `write` but not yet played.
    fn queued(&self) -> Duration {
        Duration::ZERO
    }
}

/// Opens devices. Dropping the returned handle releases the device.
pub trait AudioBackend: Send + Sync {
    /// # Errors
    /// Returns `Error::AudioDevice` if no usable input device is available.
    #[allow(clippy::result_large_err)]
    fn open_input(&self, format: StreamFormat) -> Result<Box<dyn AudioInput>>;

    /// # Errors
    /// Returns `Error::AudioDevice` if no usable output device is available.
    #[allow(clippy::result_large_err)]
    fn open_output(&self, format: StreamFormat) -> Result<Box<dyn AudioOutput>>;
}

/// Half-duplex flag shared by the playback (writer) and capture (reader) legs.
#[derive(Debug, Clone, Default)]
pub struct MuteState(Arc<AtomicBool>);

impl MuteState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call flipped the state.
    pub fn mute(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` if this call flipped the state.
    pub fn unmute(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}

/// Little-endian bytes to samples. A trailing odd byte is dropped.
#[must_use]
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
