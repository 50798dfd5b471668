//! Session facade over the Realtime protocol.
//!
//! A [`Session`] owns one background connection task (socket, dispatch, playback)
//! and, in realtime mode, one microphone thread. Assistant text reaches the
//! registered handler or a pending [`Session::ask`], never both.

mod builder;
pub mod command;
mod connection;
mod handlers;
mod session;
mod tools;

pub use builder::ClientBuilder;
pub use command::{CommandPolicy, RunOsCommandArgs};
pub use handlers::{BoxFuture as HandlerFuture, ErrorHandler, EventHandlers, TextHandler};
pub use session::{AskOutcome, Session, SessionHandle};
pub use tools::{ToolCall, ToolDefinition, ToolRegistry, ToolResult};
