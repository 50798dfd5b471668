//! Domain actions to wire messages and back.
//!
//! Everything here is pure: callers supply the clock and configuration.

use base64::Engine as _;
use base64::engine::general_purpose;
use chrono::NaiveDateTime;

use super::client_events::ClientEvent;
use super::models::{AudioFormat, Item, ResponseConfig, SessionUpdate, Tool, ToolChoice, ToolChoiceMode, Voice};
use super::server_events::ServerEvent;
use crate::{Error, Result};

const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// Which timestamp fields get appended to outgoing user text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Annotation {
    pub date: bool,
    pub time: bool,
}

impl Annotation {
    #[must_use]
    pub const fn new(date: bool, time: bool) -> Self {
        Self { date, time }
    }

    /// Appends `" (Date: YYYY-MM-DD | Time: HH:MM:SS)"`, or whichever half is enabled.
    #[must_use]
    pub fn apply(self, message: &str, now: NaiveDateTime) -> String {
        let mut fields = Vec::with_capacity(2);
        if self.date {
            fields.push(format!("Date: {}", now.format("%Y-%m-%d")));
        }
        if self.time {
            fields.push(format!("Time: {}", now.format("%H:%M:%S")));
        }
        if fields.is_empty() {
            return message.to_string();
        }
        format!("{message} ({})", fields.join(" | "))
    }
}

/// User text followed by a text-only response request.
#[must_use]
pub fn text_message(text: impl Into<String>) -> [ClientEvent; 2] {
    [
        ClientEvent::ConversationItemCreate {
            event_id: None,
            item: Box::new(Item::user_text(text)),
        },
        ClientEvent::ResponseCreate {
            event_id: None,
            response: Some(Box::new(ResponseConfig::text_only())),
        },
    ]
}

/// The one-time `session.update` sent right after the socket opens.
///
/// Tools are declared only when `tools` is non-empty, together with `tool_choice: auto`.
#[must_use]
pub fn session_update(voice: &str, instructions: &str, tools: Vec<Tool>) -> ClientEvent {
    let (tools, tool_choice) = if tools.is_empty() {
        (None, None)
    } else {
        (Some(tools), Some(ToolChoice::Mode(ToolChoiceMode::Auto)))
    };
    ClientEvent::SessionUpdate {
        event_id: None,
        session: Box::new(SessionUpdate {
            voice: Some(Voice::from(voice)),
            output_audio_format: Some(AudioFormat::Pcm16),
            instructions: Some(instructions.to_string()),
            tools,
            tool_choice,
        }),
    }
}

/// Raw little-endian PCM16 bytes as an `input_audio_buffer.append`.
///
/// # Errors
/// Returns an error if the chunk exceeds the 15 MiB append limit.
#[allow(clippy::result_large_err)]
pub fn audio_chunk(pcm: &[u8]) -> Result<ClientEvent> {
    if pcm.len() > MAX_INPUT_AUDIO_CHUNK_BYTES {
        return Err(Error::InvalidClientEvent(format!(
            "input_audio_buffer.append exceeds 15MB ({} bytes)",
            pcm.len()
        )));
    }
    Ok(ClientEvent::InputAudioBufferAppend {
        event_id: None,
        audio: general_purpose::STANDARD.encode(pcm),
    })
}

/// Function output item carrying `{"result": ...}`, then a bare `response.create`.
#[must_use]
pub fn function_result(call_id: impl Into<String>, result: &str) -> [ClientEvent; 2] {
    let output = serde_json::json!({ "result": result }).to_string();
    [
        ClientEvent::ConversationItemCreate {
            event_id: None,
            item: Box::new(Item::FunctionCallOutput {
                id: None,
                call_id: call_id.into(),
                output,
            }),
        },
        ClientEvent::ResponseCreate { event_id: None, response: None },
    ]
}

/// Serialize one client event to a text frame.
///
/// # Errors
/// Returns `Error::Encoding` if serialization fails.
#[allow(clippy::result_large_err)]
pub fn encode(event: &ClientEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// Decode one inbound text frame.
///
/// # Errors
/// Returns `Error::Decoding` for invalid JSON or a known event kind with the wrong shape.
#[allow(clippy::result_large_err)]
pub fn decode(frame: &str) -> Result<ServerEvent> {
    serde_json::from_str(frame).map_err(|e| Error::Decoding(e.to_string()))
}

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let out = safe_truncate(s, 2);
        assert!(out.starts_with('h'));
        assert!(out.contains("truncated"));
        assert_eq!(safe_truncate("short", 100), "short");
    }

    #[test]
    fn oversized_audio_chunk_is_rejected() {
        let big = vec![0u8; MAX_INPUT_AUDIO_CHUNK_BYTES + 1];
        assert!(matches!(audio_chunk(&big), Err(Error::InvalidClientEvent(_))));
    }
}
