#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Realtime voice sessions over the `OpenAI` Realtime socket.
//!
//! A [`Session`] streams microphone audio up, plays assistant audio back with
//! half-duplex muting, answers `run_os_command` function calls, and offers a
//! blocking-style [`Session::ask`] for text exchanges.

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use config::{ClientConfig, ConfigError, Mode};
pub use error::{Error, Result, ServerError};
pub use protocol::client_events::ClientEvent;
pub use protocol::server_events::ServerEvent;
pub use protocol::models::{
    AudioFormat, ContentPart, Item, Modality, Response, ResponseConfig, ResponseStatus, Role, SessionUpdate, Tool,
    ToolChoice, ToolChoiceMode, Voice,
};
pub use sdk::{
    AskOutcome, ClientBuilder, CommandPolicy, EventHandlers, Session, SessionHandle, ToolCall, ToolRegistry,
    ToolResult,
};
