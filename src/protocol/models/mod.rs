pub mod audio;
pub mod common;
pub mod items;
pub mod response;
pub mod session;
pub mod tools;

pub use audio::AudioFormat;
pub use common::{ArbitraryJson, JsonSchema, Modality, Role, Voice};
pub use items::{ContentPart, Item};
pub use response::{Response, ResponseConfig, ResponseStatus};
pub use session::{Session, SessionUpdate};
pub use tools::{Tool, ToolChoice, ToolChoiceMode};
