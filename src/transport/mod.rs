//! Socket plumbing. The session only needs text frames in both directions, so the
//! seams here are a `Transport` (one live socket) and a `Connector` (how to open one).

pub mod ws;

use crate::Result;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where and how to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

pub trait Transport: Send {
    fn send_text(&mut self, frame: String) -> BoxFuture<'_, Result<()>>;
    /// Next inbound text frame; `Ok(None)` once the peer has closed.
    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Box<dyn Transport>>>;
}
