//! `cpal` device backend.
//!
//! cpal streams are not `Send`, so each stream lives on the thread that built it and
//! exchanges samples with the session through a lock-free ring buffer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{AudioBackend, AudioInput, AudioOutput, StreamFormat, bytes_to_pcm16};
use crate::{Error, Result};

const INPUT_BUFFER_FRAMES: usize = 32;
const OUTPUT_BUFFER_SECONDS: usize = 30;
const DEVICE_POLL: Duration = Duration::from_millis(5);
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default host input/output devices via cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self, format: StreamFormat) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput::open(format)?))
    }

    fn open_output(&self, format: StreamFormat) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::open(format)?))
    }
}

fn stream_config(format: StreamFormat) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn device_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::AudioDevice(format!("{context}: {err}"))
}

pub struct CpalInput {
    _stream: cpal::Stream,
    samples: HeapCons<i16>,
    alive: Arc<AtomicBool>,
}

impl CpalInput {
    #[allow(clippy::result_large_err)]
    fn open(format: StreamFormat) -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::AudioDevice("no default input device".to_string()))?;
        if let Ok(name) = device.name() {
            tracing::debug!(device = %name, "Opening input device");
        }

        let (mut producer, consumer) = HeapRb::<i16>::new(format.frame_samples * INPUT_BUFFER_FRAMES).split();
        let alive = Arc::new(AtomicBool::new(true));
        let stream_alive = Arc::clone(&alive);
        let stream = device
            .build_input_stream(
                &stream_config(format),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // Overflow drops the newest samples; the reader discards stale audio anyway.
                    producer.push_slice(data);
                },
                move |err| {
                    tracing::warn!("Input stream error: {err}");
                    stream_alive.store(false, Ordering::Release);
                },
                None,
            )
            .map_err(|e| device_error("build input stream", e))?;
        stream.play().map_err(|e| device_error("start input stream", e))?;

        Ok(Self {
            _stream: stream,
            samples: consumer,
            alive,
        })
    }
}

impl AudioInput for CpalInput {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        let mut filled = 0;
        let mut idle = Duration::ZERO;
        while filled < frame.len() {
            let n = self.samples.pop_slice(&mut frame[filled..]);
            if n > 0 {
                filled += n;
                idle = Duration::ZERO;
                continue;
            }
            if !self.alive.load(Ordering::Acquire) {
                return Err(Error::AudioDevice("input stream failed".to_string()));
            }
            if idle >= STALL_TIMEOUT {
                return Err(Error::AudioDevice("input device stalled".to_string()));
            }
            std::thread::sleep(DEVICE_POLL);
            idle += DEVICE_POLL;
        }
        Ok(())
    }

    fn discard_pending(&mut self) {
        self.samples.clear();
    }
}

/// Output stream hosted on its own thread. Dropping it stops the stream and joins the thread.
pub struct CpalOutput {
    format: StreamFormat,
    samples: HeapProd<i16>,
    alive: Arc<AtomicBool>,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    #[allow(clippy::result_large_err)]
    fn open(format: StreamFormat) -> Result<Self> {
        let capacity = usize::try_from(format.sample_rate).unwrap_or(usize::MAX) * OUTPUT_BUFFER_SECONDS;
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_alive = Arc::clone(&alive);
        let thread = std::thread::Builder::new()
            .name("rt-voice-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(format, consumer, thread_alive) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Parked until the owner drops the stop sender.
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("Output stream released");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                format,
                samples: producer,
                alive,
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::AudioDevice("output thread exited during setup".to_string()))
            }
        }
    }
}

#[allow(clippy::result_large_err)]
fn build_output_stream(
    format: StreamFormat,
    mut consumer: HeapCons<i16>,
    alive: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::AudioDevice("no default output device".to_string()))?;
    if let Ok(name) = device.name() {
        tracing::debug!(device = %name, "Opening output device");
    }
    let stream = device
        .build_output_stream(
            &stream_config(format),
            move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let n = consumer.pop_slice(out);
                out[n..].fill(0);
            },
            move |err| {
                tracing::warn!("Output stream error: {err}");
                alive.store(false, Ordering::Release);
            },
            None,
        )
        .map_err(|e| device_error("build output stream", e))?;
    stream.play().map_err(|e| device_error("start output stream", e))?;
    Ok(stream)
}

impl AudioOutput for CpalOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let samples = bytes_to_pcm16(pcm);
        let mut offset = 0;
        let mut waited = Duration::ZERO;
        while offset < samples.len() {
            if !self.alive.load(Ordering::Acquire) {
                return Err(Error::AudioDevice("output stream failed".to_string()));
            }
            let n = self.samples.push_slice(&samples[offset..]);
            offset += n;
            if offset == samples.len() {
                break;
            }
            if n == 0 {
                if waited >= STALL_TIMEOUT {
                    return Err(Error::AudioDevice("output device stalled".to_string()));
                }
                std::thread::sleep(DEVICE_POLL);
                waited += DEVICE_POLL;
            }
        }
        Ok(())
    }

    fn queued(&self) -> Duration {
        self.format.samples_duration(self.samples.occupied_len())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
