//! Wire protocol: client/server event types, their models, and the codec between
//! domain actions and text frames.

pub mod client_events;
pub mod codec;
pub mod models;
pub mod server_events;
