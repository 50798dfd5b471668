use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{CaptureLeg, CaptureParams, MuteState, StreamFormat};
use crate::config::ClientConfig;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::codec::{self, Annotation};
use crate::transport::{ConnectRequest, Connector};
use crate::{Error, Result};

use super::builder::AudioSettings;
use super::connection::{self, Command, ConnectionParams};
use super::handlers::{ErrorHandler, TextHandler, TextRouter};
use super::tools::ToolRegistry;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Result of [`Session::ask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Answer(String),
    TimedOut,
}

impl AskOutcome {
    #[must_use]
    pub fn into_answer(self) -> Option<String> {
        match self {
            Self::Answer(text) => Some(text),
            Self::TimedOut => None,
        }
    }
}

/// Cloneable sender into a live connection.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Send a raw protocol event and wait until it is written.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the connection is gone, or the write error.
    pub async fn send_raw(&self, event: ClientEvent) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Send { event, respond: tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Blocking variant of [`Self::send_raw`] for non-async threads.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the connection is gone, or the write error.
    ///
    /// # Panics
    /// Panics if called from within an async execution context.
    #[allow(clippy::result_large_err)]
    pub fn send_blocking(&self, event: ClientEvent) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .blocking_send(Command::Send { event, respond: tx })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.blocking_recv().map_err(|_| Error::ConnectionClosed)?
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct Connection {
    handle: SessionHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    capture: Option<CaptureLeg>,
    alive: Arc<AtomicBool>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.task.is_finished()
    }

    fn signal(&mut self) {
        if let Some(capture) = &self.capture {
            capture.signal_stop();
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// One realtime conversation: configuration, devices, and at most one live connection.
pub struct Session {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    audio: AudioSettings,
    tools: Arc<ToolRegistry>,
    router: TextRouter,
    on_error: Option<ErrorHandler>,
    mute: MuteState,
    ask_gate: Mutex<()>,
    connection: Option<Connection>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.config.model)
            .field("mode", &self.config.mode)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        audio: AudioSettings,
        tools: ToolRegistry,
        on_text: Option<TextHandler>,
        on_error: Option<ErrorHandler>,
    ) -> Self {
        Self {
            config,
            connector,
            audio,
            tools: Arc::new(tools),
            router: TextRouter::new(on_text),
            on_error,
            mute: MuteState::new(),
            ask_gate: Mutex::new(()),
            connection: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_alive)
    }

    /// Whether capture is currently held back by assistant playback.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// Replace the text handler. Takes effect for the next delivered turn.
    pub fn on_text<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.router.set_handler(Some(Arc::new(move |text| Box::pin(handler(text)))));
    }

    pub fn clear_text_handler(&self) {
        self.router.set_handler(None);
    }

    /// Open a fresh connection in the background and return immediately.
    ///
    /// Sends issued before the handshake completes are queued behind the session setup.
    ///
    /// # Errors
    /// Returns `AlreadyStarted` if a connection is live, `NoRuntime` outside a tokio
    /// runtime, or an error if the tool schemas cannot be serialized.
    #[allow(clippy::result_large_err)]
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current()?;
        let previous = self.connection.take().and_then(|mut old| {
            old.signal();
            old.capture.take()
        });

        // With function calling off no tool is declared and calls are ignored.
        let (declared, dispatch) = if self.config.function_calling {
            (self.tools.try_as_tools()?, Arc::clone(&self.tools))
        } else {
            (Vec::new(), Arc::new(ToolRegistry::new()))
        };
        let setup = codec::session_update(&self.config.voice, &self.config.instructions, declared);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (opened_tx, opened_rx) = oneshot::channel();
        let handle = SessionHandle { sender: cmd_tx };
        let alive = Arc::new(AtomicBool::new(true));

        let backend = if self.config.mode.is_realtime() {
            self.audio.backend.clone()
        } else {
            None
        };
        let format = StreamFormat::default();

        let capture = match &backend {
            Some(backend) => Some(CaptureLeg::spawn(CaptureParams {
                backend: Arc::clone(backend),
                format,
                mute: self.mute.clone(),
                poll_interval: self.audio.poll_interval,
                handle: handle.clone(),
                opened: opened_rx,
                previous,
            })?),
            None => {
                if let Some(old) = previous {
                    runtime.spawn_blocking(move || old.join());
                }
                None
            }
        };

        let params = ConnectionParams {
            connector: Arc::clone(&self.connector),
            request: ConnectRequest {
                endpoint: self.config.endpoint.clone(),
                model: self.config.model.clone(),
                api_key: self.config.api_key.clone(),
            },
            setup,
            backend,
            format,
            mute: self.mute.clone(),
            unmute_delay: self.audio.unmute_delay,
            router: self.router.clone(),
            tools: dispatch,
            on_error: self.on_error.clone(),
            commands: cmd_rx,
            shutdown: shutdown_rx,
            opened: opened_tx,
            alive: Arc::clone(&alive),
        };
        let task = runtime.spawn(connection::run(params));
        tracing::info!(model = %self.config.model, mode = ?self.config.mode, "Session starting");

        self.connection = Some(Connection {
            handle,
            shutdown: Some(shutdown_tx),
            task,
            capture,
            alive,
        });
        Ok(())
    }

    /// Stop both background legs and wait for them. A stopped session is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.signal();
        if let Err(err) = (&mut connection.task).await {
            tracing::warn!("Connection task failed: {err}");
        }
        if let Some(capture) = connection.capture.take() {
            if let Err(err) = tokio::task::spawn_blocking(move || capture.join()).await {
                tracing::warn!("Failed to join capture thread: {err}");
            }
        }
        self.mute.unmute();
        tracing::info!("Session stopped");
    }

    /// Sender into the live connection.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the session has not been started or has ended.
    #[allow(clippy::result_large_err)]
    pub fn handle(&self) -> Result<SessionHandle> {
        self.connection
            .as_ref()
            .map(|connection| connection.handle.clone())
            .ok_or(Error::ConnectionClosed)
    }

    /// Send a raw protocol event.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` without a live connection, or the encode/write error.
    pub async fn send_raw(&self, event: ClientEvent) -> Result<()> {
        self.handle()?.send_raw(event).await
    }

    /// Send a user text message (annotated with the local date/time when enabled)
    /// and request a text response.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` without a live connection, or the encode/write error.
    pub async fn send_text(&self, message: &str) -> Result<()> {
        let annotation = Annotation::new(self.config.include_date, self.config.include_time);
        let text = annotation.apply(message, chrono::Local::now().naive_local());
        let handle = self.handle()?;
        for event in codec::text_message(text) {
            handle.send_raw(event).await?;
        }
        Ok(())
    }

    /// Append raw little-endian PCM16 bytes to the input buffer.
    ///
    /// # Errors
    /// Returns `InvalidClientEvent` for oversized chunks or `ConnectionClosed`.
    pub async fn send_audio_chunk(&self, pcm: &[u8]) -> Result<()> {
        let event = codec::audio_chunk(pcm)?;
        self.send_raw(event).await
    }

    /// Return a function result and ask the model to continue.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` without a live connection, or the encode/write error.
    pub async fn send_function_result(&self, call_id: &str, result: &str) -> Result<()> {
        let handle = self.handle()?;
        for event in codec::function_result(call_id, result) {
            handle.send_raw(event).await?;
        }
        Ok(())
    }

    /// Send `message` and wait for the next assistant text.
    ///
    /// While waiting, the answer goes here instead of the registered text handler.
    /// Concurrent asks on one session queue behind each other.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the send fails or the connection ends while waiting.
    pub async fn ask(&self, message: &str, timeout: Duration) -> Result<AskOutcome> {
        let _gate = self.ask_gate.lock().await;
        let (tx, rx) = oneshot::channel();
        self.router.install_pending(tx);
        let _pending = PendingAsk(&self.router);

        let exchange = async {
            if let Err(err) = self.send_text(message).await {
                tracing::warn!("Ask could not be sent: {err}");
                return Err(Error::ConnectionClosed);
            }
            rx.await.map_err(|_| Error::ConnectionClosed)
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(text)) => Ok(AskOutcome::Answer(text)),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                tracing::debug!(?timeout, "Ask timed out");
                Ok(AskOutcome::TimedOut)
            }
        }
    }
}

/// Removes the ask interceptor on every exit path.
struct PendingAsk<'a>(&'a TextRouter);

impl Drop for PendingAsk<'_> {
    fn drop(&mut self) {
        self.0.clear_pending();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.signal();
        }
    }
}
