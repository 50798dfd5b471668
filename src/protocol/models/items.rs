use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ArbitraryJson, Role};

/// Conversation item.
///
/// Manual (de)serialization preserves unknown variants as raw JSON while keeping
/// strong typing for the items this client reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Message {
        id: Option<String>,
        role: Option<Role>,
        content: Vec<ContentPart>,
        /// Flat text some server builds attach directly to message items.
        text: Option<String>,
    },
    FunctionCall {
        id: Option<String>,
        name: String,
        call_id: String,
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        call_id: String,
        output: String,
    },
    Unknown(ArbitraryJson),
}

impl Item {
    /// A user message with a single `input_text` part.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::Message {
            id: None,
            role: Some(Role::User),
            content: vec![ContentPart::InputText { text: text.into() }],
            text: None,
        }
    }

    /// Assistant-visible text of a message item, if it carries any.
    ///
    /// The flat `text` field wins; otherwise all text parts are concatenated.
    #[must_use]
    pub fn message_text(&self) -> Option<String> {
        let Self::Message { content, text, .. } = self else {
            return None;
        };
        if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }
        let joined: String = content.iter().filter_map(ContentPart::output_text).collect();
        (!joined.is_empty()).then_some(joined)
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Message { .. } => "message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemRepr {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        content: Vec<ContentPart>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        output: String,
    },
}

impl From<ItemRepr> for Item {
    fn from(repr: ItemRepr) -> Self {
        match repr {
            ItemRepr::Message { id, role, content, text } => Self::Message { id, role, content, text },
            ItemRepr::FunctionCall { id, name, call_id, arguments } => {
                Self::FunctionCall { id, name, call_id, arguments }
            }
            ItemRepr::FunctionCallOutput { id, call_id, output } => {
                Self::FunctionCallOutput { id, call_id, output }
            }
        }
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self {
            Self::Unknown(value) => return value.serialize(serializer),
            Self::Message { id, role, content, text } => ItemRepr::Message {
                id: id.clone(),
                role: *role,
                content: content.clone(),
                text: text.clone(),
            },
            Self::FunctionCall { id, name, call_id, arguments } => ItemRepr::FunctionCall {
                id: id.clone(),
                name: name.clone(),
                call_id: call_id.clone(),
                arguments: arguments.clone(),
            },
            Self::FunctionCallOutput { id, call_id, output } => ItemRepr::FunctionCallOutput {
                id: id.clone(),
                call_id: call_id.clone(),
                output: output.clone(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ItemRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse Item: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

/// Content part of a message item.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    InputText {
        text: String,
    },
    Text {
        text: String,
    },
    OutputText {
        text: String,
    },
    Audio {
        audio: Option<String>,
        transcript: Option<String>,
    },
    Unknown(ArbitraryJson),
}

impl ContentPart {
    /// Text produced by the assistant (`text` / `output_text` parts only).
    #[must_use]
    pub fn output_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } | Self::OutputText { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InputText { .. } => "input_text",
            Self::Text { .. } => "text",
            Self::OutputText { .. } => "output_text",
            Self::Audio { .. } => "audio",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPartRepr {
    InputText {
        text: String,
    },
    Text {
        text: String,
    },
    OutputText {
        text: String,
    },
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

impl From<ContentPartRepr> for ContentPart {
    fn from(repr: ContentPartRepr) -> Self {
        match repr {
            ContentPartRepr::InputText { text } => Self::InputText { text },
            ContentPartRepr::Text { text } => Self::Text { text },
            ContentPartRepr::OutputText { text } => Self::OutputText { text },
            ContentPartRepr::Audio { audio, transcript } => Self::Audio { audio, transcript },
        }
    }
}

impl Serialize for ContentPart {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self {
            Self::Unknown(value) => return value.serialize(serializer),
            Self::InputText { text } => ContentPartRepr::InputText { text: text.clone() },
            Self::Text { text } => ContentPartRepr::Text { text: text.clone() },
            Self::OutputText { text } => ContentPartRepr::OutputText { text: text.clone() },
            Self::Audio { audio, transcript } => ContentPartRepr::Audio {
                audio: audio.clone(),
                transcript: transcript.clone(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentPart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ContentPartRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse ContentPart: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}
