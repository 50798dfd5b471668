use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::audio::{AudioBackend, CpalBackend, MUTE_POLL_INTERVAL, UNMUTE_DELAY};
use crate::config::{ClientConfig, Mode};
use crate::transport::Connector;
use crate::transport::ws::WsConnector;

use super::command::{self, CommandPolicy};
use super::{EventHandlers, Session, ToolRegistry};

pub(crate) struct AudioSettings {
    pub backend: Option<Arc<dyn AudioBackend>>,
    pub poll_interval: Duration,
    pub unmute_delay: Duration,
}

/// Assembles a [`Session`] from a [`ClientConfig`] plus the pluggable pieces.
///
/// Defaults: real WebSocket connector, cpal devices, the built-in mute timings.
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    audio: AudioSettings,
    handlers: EventHandlers,
    tools: ToolRegistry,
}

impl Session {
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }
}

impl ClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: Arc::new(WsConnector),
            audio: AudioSettings {
                backend: Some(Arc::new(CpalBackend)),
                poll_interval: MUTE_POLL_INTERVAL,
                unmute_delay: UNMUTE_DELAY,
            },
            handlers: EventHandlers::new(),
            tools: ToolRegistry::new(),
        }
    }

    /// Start from [`ClientConfig::from_env`].
    ///
    /// # Errors
    /// Returns `Error::Config` if the environment is incomplete or malformed.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = voice.into();
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    #[must_use]
    pub const fn function_calling(mut self, enabled: bool) -> Self {
        self.config.function_calling = enabled;
        self
    }

    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    #[must_use]
    pub fn command_policy(mut self, policy: CommandPolicy) -> Self {
        self.config.command_policy = policy;
        self
    }

    #[must_use]
    pub const fn annotate(mut self, date: bool, time: bool) -> Self {
        self.config.include_date = date;
        self.config.include_time = time;
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn on_text<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers = self.handlers.on_text(handler);
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&crate::Error) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_error(handler);
        self
    }

    /// Extra tools, declared alongside `run_os_command` when function calling is on.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    #[must_use]
    pub fn audio_backend(mut self, backend: impl AudioBackend + 'static) -> Self {
        self.audio.backend = Some(Arc::new(backend));
        self
    }

    /// No audio devices even in realtime mode.
    #[must_use]
    pub fn without_audio(mut self) -> Self {
        self.audio.backend = None;
        self
    }

    #[must_use]
    pub const fn mute_poll_interval(mut self, interval: Duration) -> Self {
        self.audio.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn unmute_delay(mut self, delay: Duration) -> Self {
        self.audio.unmute_delay = delay;
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        let Self { config, connector, audio, handlers, mut tools } = self;
        if config.function_calling {
            command::register(&mut tools, &config.device, config.command_policy.clone());
        }
        Session::new(config, connector, audio, tools, handlers.on_text, handlers.on_error)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("model", &self.config.model)
            .field("mode", &self.config.mode)
            .field("handlers", &self.handlers)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}
