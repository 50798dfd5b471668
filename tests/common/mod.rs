#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oai_rt_voice::audio::{AudioBackend, AudioInput, AudioOutput, StreamFormat};
use oai_rt_voice::transport::{BoxFuture, ConnectRequest, Connector, Transport};
use oai_rt_voice::{ClientBuilder, ClientConfig, Error, Mode, Result};
use serde_json::Value;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

/// Hands out queued in-memory sockets, one per `connect`.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pending: Arc<Mutex<VecDeque<FakeTransport>>>,
    pub requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one connection and return the server side of it.
    pub fn expect_connection(&self) -> FakeServer {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicUsize::new(0));
        self.pending.lock().unwrap().push_back(FakeTransport {
            incoming: in_rx,
            outgoing: out_tx,
            closed: Arc::clone(&closed),
        });
        FakeServer {
            inbound: Some(in_tx),
            outbound: out_rx,
            closed,
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        self.requests.lock().unwrap().push(request);
        let next = self.pending.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(transport) => Ok(Box::new(transport) as Box<dyn Transport>),
                None => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "no fake connection queued",
                ))),
            }
        })
    }
}

pub struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicUsize>,
}

impl Transport for FakeTransport {
    fn send_text(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        let result = self.outgoing.send(frame).map_err(|_| Error::ConnectionClosed);
        Box::pin(async move { result })
    }

    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { Ok(self.incoming.recv().await) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Server end of a fake socket.
pub struct FakeServer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn push(&self, event: Value) {
        self.push_raw(&event.to_string());
    }

    pub fn push_raw(&self, frame: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(frame.to_string());
        }
    }

    /// End of stream from the server side.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    pub fn close_calls(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn next_frame(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client side dropped");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Next frame of `kind`, skipping anything else (e.g. audio appends).
    pub async fn next_of_kind(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Everything sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("client sent invalid JSON"));
        }
        frames
    }

    /// Assert nothing else is sent for `quiet`.
    pub async fn assert_silent(&mut self, quiet: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(quiet, self.outbound.recv()).await {
            panic!("unexpected client frame: {frame}");
        }
    }
}

/// Device counters shared by every stream the fake backend opens.
#[derive(Default)]
pub struct AudioState {
    pub inputs_open: AtomicUsize,
    pub max_inputs_open: AtomicUsize,
    pub outputs_open: AtomicUsize,
    /// Time one `read_frame` takes; zero means 5 ms.
    pub read_delay_ms: AtomicU64,
    pub frames_read: AtomicUsize,
    pub discards: AtomicUsize,
    pub played: Mutex<Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    pub state: Arc<AudioState>,
}

impl AudioBackend for FakeAudio {
    fn open_input(&self, _format: StreamFormat) -> Result<Box<dyn AudioInput>> {
        let open = self.state.inputs_open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_inputs_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeInput { state: Arc::clone(&self.state) }))
    }

    fn open_output(&self, _format: StreamFormat) -> Result<Box<dyn AudioOutput>> {
        self.state.outputs_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput { state: Arc::clone(&self.state) }))
    }
}

struct FakeInput {
    state: Arc<AudioState>,
}

impl AudioInput for FakeInput {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        let delay = match self.state.read_delay_ms.load(Ordering::SeqCst) {
            0 => 5,
            ms => ms,
        };
        std::thread::sleep(Duration::from_millis(delay));
        frame.fill(0x0101);
        self.state.frames_read.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard_pending(&mut self) {
        self.state.discards.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.state.inputs_open.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeOutput {
    state: Arc<AudioState>,
}

impl AudioOutput for FakeOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.state.played.lock().unwrap().extend_from_slice(pcm);
        Ok(())
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.state.outputs_open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Text-mode session without timestamp annotation.
pub fn text_builder(connector: &FakeConnector) -> ClientBuilder {
    ClientBuilder::new(ClientConfig::new("sk-test"))
        .mode(Mode::Text)
        .annotate(false, false)
        .connector(connector.clone())
}

/// Realtime session on fake devices with a short unmute grace.
pub fn voice_builder(connector: &FakeConnector, audio: &FakeAudio) -> ClientBuilder {
    ClientBuilder::new(ClientConfig::new("sk-test"))
        .mode(Mode::Realtime)
        .annotate(false, false)
        .connector(connector.clone())
        .audio_backend(audio.clone())
        .unmute_delay(Duration::from_millis(100))
}

/// Poll `condition` until it holds or `WAIT` passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
