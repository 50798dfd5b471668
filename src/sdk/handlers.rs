use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type TextHandler = Arc<dyn Fn(String) -> BoxFuture<Result<()>> + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Default, Clone)]
pub struct EventHandlers {
    pub on_text: Option<TextHandler>,
    pub on_error: Option<ErrorHandler>,
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives each completed assistant turn's text.
    #[must_use]
    pub fn on_text<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_text = Some(Arc::new(move |text| Box::pin(handler(text))));
        self
    }

    /// Receives connection and server errors. Runs on the connection task; keep it short.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_text", &self.on_text.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Subscribers {
    handler: Option<TextHandler>,
    pending: Option<oneshot::Sender<String>>,
}

/// Routes assistant text to at most one subscriber.
///
/// A pending ask takes the next text exclusively; otherwise the registered handler gets it.
#[derive(Clone, Default)]
pub(crate) struct TextRouter {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl TextRouter {
    pub fn new(handler: Option<TextHandler>) -> Self {
        let router = Self::default();
        router.set_handler(handler);
        router
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_handler(&self, handler: Option<TextHandler>) {
        self.lock().handler = handler;
    }

    pub fn install_pending(&self, tx: oneshot::Sender<String>) {
        self.lock().pending = Some(tx);
    }

    /// Drop the pending slot; its receiver observes a closed channel.
    pub fn clear_pending(&self) {
        self.lock().pending = None;
    }

    /// Hand `text` to a subscriber. Returns the handler future when the handler is the target.
    pub fn route(&self, text: String) -> Option<BoxFuture<Result<()>>> {
        let mut subscribers = self.lock();
        if let Some(pending) = subscribers.pending.take() {
            match pending.send(text) {
                Ok(()) => return None,
                // The asker gave up between timing out and clearing the slot.
                Err(text) => return subscribers.handler.as_ref().map(|handler| handler(text)),
            }
        }
        subscribers.handler.as_ref().map(|handler| handler(text))
    }
}

/// Exactly-once delivery for one assistant turn.
///
/// Several "done" events describe the same final text. The first one through claims
/// the turn; `finish` (on `response.done`) opens the next. A different known
/// `response_id` also opens a new turn, so a missing `response.done` cannot swallow
/// later answers. A turn claimed without an id belongs to the next id that shows up.
#[derive(Debug, Default)]
pub(crate) struct TurnText {
    response_id: Option<String>,
    delivered: bool,
}

impl TurnText {
    pub fn claim(&mut self, response_id: Option<&str>) -> bool {
        if let Some(id) = response_id {
            match self.response_id.as_deref() {
                Some(current) if current == id => {}
                // A turn claimed without an id adopts the first id it sees.
                None => self.response_id = Some(id.to_string()),
                Some(_) => {
                    self.response_id = Some(id.to_string());
                    self.delivered = false;
                }
            }
        }
        if self.delivered {
            return false;
        }
        self.delivered = true;
        true
    }

    pub fn finish(&mut self) {
        self.response_id = None;
        self.delivered = false;
    }
}
