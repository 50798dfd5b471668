use serde::{Deserialize, Deserializer};
use super::models::{ArbitraryJson, ContentPart, Item, Response, Session};
use crate::error::ServerError;

/// Inbound protocol event.
///
/// Known kinds must match their shape; a mismatch is a decoding error. Kinds this
/// client does not consume land in `Unknown` with the raw JSON.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Error {
        event_id: Option<String>,
        error: ServerError,
    },
    SessionCreated {
        event_id: Option<String>,
        session: Session,
    },
    SessionUpdated {
        event_id: Option<String>,
        session: Session,
    },
    ResponseAudioDelta {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
        delta: String,
    },
    ResponseAudioDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
    },
    ResponseTextDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
        text: String,
    },
    ResponseContentPartDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
        part: ContentPart,
    },
    ResponseDone {
        event_id: Option<String>,
        response: Response,
    },
    ResponseOutputItemDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item: Item,
    },
    Unknown(ArbitraryJson),
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "response.audio.delta",
    "response.audio.done",
    "response.text.done",
    "response.content_part.done",
    "response.done",
    "response.output_item.done",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: Option<String>,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        session: Session,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        session: Session,
    },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "response.text.done")]
    ResponseTextDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "response.content_part.done")]
    ResponseContentPartDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        part: ContentPart,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response: Response,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        item: Item,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => Self::SessionCreated { event_id, session },
            ServerEventRepr::SessionUpdated { event_id, session } => Self::SessionUpdated { event_id, session },
            ServerEventRepr::ResponseAudioDelta { event_id, response_id, item_id, delta } => Self::ResponseAudioDelta { event_id, response_id, item_id, delta },
            ServerEventRepr::ResponseAudioDone { event_id, response_id, item_id } => Self::ResponseAudioDone { event_id, response_id, item_id },
            ServerEventRepr::ResponseTextDone { event_id, response_id, item_id, text } => Self::ResponseTextDone { event_id, response_id, item_id, text },
            ServerEventRepr::ResponseContentPartDone { event_id, response_id, item_id, part } => Self::ResponseContentPartDone { event_id, response_id, item_id, part },
            ServerEventRepr::ResponseDone { event_id, response } => Self::ResponseDone { event_id, response },
            ServerEventRepr::ResponseOutputItemDone { event_id, response_id, item } => Self::ResponseOutputItemDone { event_id, response_id, item },
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        let known = value
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| KNOWN_EVENT_TYPES.contains(&t));
        if !known {
            return Ok(Self::Unknown(value));
        }
        ServerEventRepr::deserialize(value)
            .map(Into::into)
            .map_err(serde::de::Error::custom)
    }
}

impl ServerEvent {
    /// Wire tag of the event (`"unknown"` when the payload has none).
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::ResponseAudioDelta { .. } => "response.audio.delta",
            Self::ResponseAudioDone { .. } => "response.audio.done",
            Self::ResponseTextDone { .. } => "response.text.done",
            Self::ResponseContentPartDone { .. } => "response.content_part.done",
            Self::ResponseDone { .. } => "response.done",
            Self::ResponseOutputItemDone { .. } => "response.output_item.done",
            Self::Unknown(value) => value.get("type").and_then(|v| v.as_str()).unwrap_or("unknown"),
        }
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Error { event_id, .. }
            | Self::SessionCreated { event_id, .. }
            | Self::SessionUpdated { event_id, .. }
            | Self::ResponseAudioDelta { event_id, .. }
            | Self::ResponseAudioDone { event_id, .. }
            | Self::ResponseTextDone { event_id, .. }
            | Self::ResponseContentPartDone { event_id, .. }
            | Self::ResponseDone { event_id, .. }
            | Self::ResponseOutputItemDone { event_id, .. } => event_id.as_deref(),
            Self::Unknown(value) => value.get("event_id").and_then(|v| v.as_str()),
        }
    }
}
