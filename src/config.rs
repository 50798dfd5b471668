//! Session configuration.
//!
//! The configuration surface is owned by the embedding application; this module
//! only holds the snapshot a `Session` is built from, plus an environment loader
//! for the bundled binary.

use crate::sdk::CommandPolicy;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "echo";
pub const DEFAULT_DEVICE: &str = "unknown";
pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How a session talks to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Microphone streaming and speaker playback alongside text.
    #[default]
    Realtime,
    /// Text in, text out. No audio devices are opened.
    Text,
}

impl Mode {
    #[must_use]
    pub const fn is_realtime(self) -> bool {
        matches!(self, Self::Realtime)
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub model: String,
    pub instructions: String,
    pub voice: String,
    pub mode: Mode,
    pub function_calling: bool,
    /// Label of the host machine, shown to the model in the command tool description.
    pub device: String,
    pub include_date: bool,
    pub include_time: bool,
    pub command_policy: CommandPolicy,
    pub endpoint: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("mode", &self.mode)
            .field("function_calling", &self.function_calling)
            .field("device", &self.device)
            .field("include_date", &self.include_date)
            .field("include_time", &self.include_time)
            .field("command_policy", &self.command_policy)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            instructions: String::new(),
            voice: DEFAULT_VOICE.to_string(),
            mode: Mode::Realtime,
            function_calling: false,
            device: DEFAULT_DEVICE.to_string(),
            include_date: true,
            include_time: true,
            command_policy: CommandPolicy::Unrestricted,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Loads configuration from environment variables (and `.env` outside tests).
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let mut config = Self::new(api_key);
        if let Some(model) = lookup("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(prompt) = lookup("INITIAL_PROMPT") {
            config.instructions = prompt;
        }
        if let Some(device) = lookup("DEVICE") {
            config.device = device;
        }
        if let Some(voice) = lookup("VOICE") {
            config.voice = voice;
        }
        config.function_calling = lookup("FUNCTION_CALLING").is_some_and(|v| parse_flag(&v));
        config.include_date = lookup("INCLUDE_DATE").is_none_or(|v| parse_flag(&v));
        config.include_time = lookup("INCLUDE_TIME").is_none_or(|v| parse_flag(&v));

        if let Some(list) = lookup("COMMAND_ALLOWLIST") {
            let programs: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if programs.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "COMMAND_ALLOWLIST".to_string(),
                    "expected a comma-separated list of program names".to_string(),
                ));
            }
            config.command_policy = CommandPolicy::AllowList(programs);
        }

        if let Some(endpoint) = lookup("REALTIME_URL") {
            url::Url::parse(&endpoint)
                .map_err(|e| ConfigError::InvalidValue("REALTIME_URL".to_string(), e.to_string()))?;
            config.endpoint = endpoint;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
