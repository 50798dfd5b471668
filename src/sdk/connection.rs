//! The connection task: handshake, session setup, writes, receive loop and dispatch.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::audio::{AudioBackend, MuteState, Playback, StreamFormat};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::codec;
use crate::protocol::models::Item;
use crate::protocol::server_events::ServerEvent;
use crate::transport::{ConnectRequest, Connector, Transport};
use crate::{Error, Result};

use super::handlers::{ErrorHandler, TextRouter, TurnText};
use super::tools::{ToolCall, ToolRegistry};

const TRACE_LOG_MAX_BYTES: usize = 1024;

pub(crate) enum Command {
    Send { event: ClientEvent, respond: oneshot::Sender<Result<()>> },
}

pub(crate) struct ConnectionParams {
    pub connector: Arc<dyn Connector>,
    pub request: ConnectRequest,
    pub setup: ClientEvent,
    /// `None` in text mode: no output device is opened.
    pub backend: Option<Arc<dyn AudioBackend>>,
    pub format: StreamFormat,
    pub mute: MuteState,
    pub unmute_delay: Duration,
    pub router: TextRouter,
    pub tools: Arc<ToolRegistry>,
    pub on_error: Option<ErrorHandler>,
    pub commands: mpsc::Receiver<Command>,
    pub shutdown: oneshot::Receiver<()>,
    /// Fired once the setup message is on the wire.
    pub opened: oneshot::Sender<()>,
    pub alive: Arc<AtomicBool>,
}

struct EventContext<'a> {
    router: &'a TextRouter,
    tools: &'a ToolRegistry,
    on_error: Option<&'a ErrorHandler>,
    turn: &'a mut TurnText,
    playback: &'a mut Playback,
}

fn report(on_error: Option<&ErrorHandler>, err: &Error) {
    if let Some(handler) = on_error {
        handler(err);
    }
}

async fn send_event(transport: &mut Box<dyn Transport>, event: &ClientEvent) -> Result<()> {
    let frame = codec::encode(event)?;
    tracing::trace!("Sending event: {}", codec::safe_truncate(&frame, TRACE_LOG_MAX_BYTES));
    transport.send_text(frame).await
}

pub(crate) async fn run(params: ConnectionParams) {
    let ConnectionParams {
        connector,
        request,
        setup,
        backend,
        format,
        mute,
        unmute_delay,
        router,
        tools,
        on_error,
        mut commands,
        mut shutdown,
        opened,
        alive,
    } = params;
    let on_error = on_error.as_ref();

    let connected = tokio::select! {
        _ = &mut shutdown => {
            tracing::debug!("Stopped before the handshake completed");
            alive.store(false, Ordering::Release);
            return;
        }
        result = connector.connect(request) => result,
    };
    let mut transport = match connected {
        Ok(transport) => transport,
        Err(err) => {
            tracing::error!("Failed to connect: {err}");
            report(on_error, &err);
            alive.store(false, Ordering::Release);
            return;
        }
    };

    if let Err(err) = send_event(&mut transport, &setup).await {
        tracing::error!("Failed to send session setup: {err}");
        report(on_error, &err);
        alive.store(false, Ordering::Release);
        return;
    }

    let mut playback = match backend.as_ref().map(|backend| backend.open_output(format)) {
        Some(Ok(output)) => Playback::new(Some(output), mute, unmute_delay),
        Some(Err(err)) => {
            tracing::warn!("Failed to open output device, playback disabled: {err}");
            Playback::disabled(mute)
        }
        None => Playback::disabled(mute),
    };
    let _ = opened.send(());
    tracing::info!("Session opened");

    let mut turn = TurnText::default();
    let mut close_socket = true;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("Shutdown requested");
                break;
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send { event, respond }) => {
                        let result = send_event(&mut transport, &event).await;
                        if let Err(err) = &result {
                            tracing::warn!(kind = event.kind(), "Send failed: {err}");
                        }
                        let _ = respond.send(result);
                    }
                    None => break,
                }
            }
            frame = transport.next_text() => {
                match frame {
                    Ok(Some(frame)) => {
                        tracing::trace!("Received event: {}", codec::safe_truncate(&frame, TRACE_LOG_MAX_BYTES));
                        let event = match codec::decode(&frame) {
                            Ok(event) => event,
                            Err(err) => {
                                tracing::warn!("Dropping malformed event: {err}");
                                continue;
                            }
                        };
                        let mut ctx = EventContext {
                            router: &router,
                            tools: &tools,
                            on_error,
                            turn: &mut turn,
                            playback: &mut playback,
                        };
                        if handle_server_event(event, &mut ctx, &mut transport, &mut shutdown).await.is_break() {
                            tracing::debug!("Shutdown requested during a function call");
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Connection closed by server");
                        close_socket = false;
                        break;
                    }
                    Err(err) => {
                        tracing::error!("Receive failed: {err}");
                        report(on_error, &err);
                        if err.is_fatal() {
                            close_socket = false;
                            break;
                        }
                    }
                }
            }
        }
    }

    alive.store(false, Ordering::Release);
    playback.shutdown();
    router.clear_pending();
    if close_socket {
        if let Err(err) = transport.close().await {
            tracing::debug!("Error closing socket: {err}");
        }
    }
    tracing::info!("Session closed");
}

/// Breaks only when shutdown arrives while a function call is running.
async fn handle_server_event(
    event: ServerEvent,
    ctx: &mut EventContext<'_>,
    transport: &mut Box<dyn Transport>,
    shutdown: &mut oneshot::Receiver<()>,
) -> ControlFlow<()> {
    match event {
        ServerEvent::Error { error, .. } => {
            tracing::error!(kind = ?error.error_type, code = ?error.code, "Server error: {}", error.message);
            report(ctx.on_error, &Error::Api(error));
        }
        ServerEvent::SessionCreated { session, .. } => {
            tracing::debug!(id = ?session.id, "Session created");
        }
        ServerEvent::SessionUpdated { session, .. } => {
            tracing::debug!(id = ?session.id, "Session updated");
        }
        ServerEvent::ResponseAudioDelta { delta, .. } => ctx.playback.on_delta(&delta),
        ServerEvent::ResponseAudioDone { .. } => ctx.playback.on_done(),
        ServerEvent::ResponseTextDone { response_id, text, .. } => {
            deliver_text(ctx, response_id.as_deref(), text).await;
        }
        ServerEvent::ResponseContentPartDone { response_id, part, .. } => {
            if let Some(text) = part.output_text() {
                deliver_text(ctx, response_id.as_deref(), text.to_string()).await;
            }
        }
        ServerEvent::ResponseOutputItemDone { response_id, item, .. } => {
            if let Some(text) = item.message_text() {
                deliver_text(ctx, response_id.as_deref(), text).await;
            }
        }
        ServerEvent::ResponseDone { response, .. } => {
            let response_id = response.id.as_deref();
            for item in &response.output {
                match item {
                    Item::FunctionCall { name, call_id, arguments, .. } => {
                        let call = PendingCall { name, call_id, arguments };
                        handle_function_call(ctx.tools, ctx.on_error, transport, shutdown, call).await?;
                    }
                    Item::Message { .. } => {
                        if let Some(text) = item.message_text() {
                            deliver_text(ctx, response_id, text).await;
                        }
                    }
                    Item::FunctionCallOutput { .. } | Item::Unknown(_) => {}
                }
            }
            ctx.turn.finish();
        }
        ServerEvent::Unknown(value) => {
            tracing::debug!(kind = ?value.get("type"), "Ignoring unhandled event");
        }
    }
    ControlFlow::Continue(())
}

async fn deliver_text(ctx: &mut EventContext<'_>, response_id: Option<&str>, text: String) {
    if text.is_empty() || !ctx.turn.claim(response_id) {
        return;
    }
    tracing::debug!(len = text.len(), "Delivering assistant text");
    if let Some(fut) = ctx.router.route(text) {
        if let Err(err) = fut.await {
            tracing::warn!("Text handler failed: {err}");
        }
    }
}

struct PendingCall<'a> {
    name: &'a str,
    call_id: &'a str,
    arguments: &'a str,
}

async fn handle_function_call(
    tools: &ToolRegistry,
    on_error: Option<&ErrorHandler>,
    transport: &mut Box<dyn Transport>,
    shutdown: &mut oneshot::Receiver<()>,
    call: PendingCall<'_>,
) -> ControlFlow<()> {
    let PendingCall { name, call_id, arguments } = call;
    if !tools.contains(name) {
        tracing::warn!(name, "Ignoring call to unregistered function");
        return ControlFlow::Continue(());
    }
    let arguments = match serde_json::from_str(arguments) {
        Ok(arguments) => arguments,
        Err(err) => {
            tracing::warn!(name, call_id, "Skipping function call with malformed arguments: {err}");
            return ControlFlow::Continue(());
        }
    };
    let call = ToolCall {
        name: name.to_string(),
        call_id: call_id.to_string(),
        arguments,
    };
    // Dropping the dispatch future kills a running command.
    let dispatched = tokio::select! {
        _ = &mut *shutdown => return ControlFlow::Break(()),
        dispatched = tools.dispatch(call) => dispatched,
    };
    let result = match dispatched {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(name, call_id, "Function call failed: {err}");
            return ControlFlow::Continue(());
        }
    };
    for event in codec::function_result(result.call_id.as_str(), &result.output_text()) {
        if let Err(err) = send_event(transport, &event).await {
            tracing::warn!(call_id, "Failed to send function result: {err}");
            report(on_error, &err);
            break;
        }
    }
    ControlFlow::Continue(())
}
