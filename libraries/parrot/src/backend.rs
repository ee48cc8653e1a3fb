//! The seam between the engine and whatever stores and fans out the messages.

use futures::stream::LocalBoxStream;

use crate::data_model::{Message, NewMessage};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend payload")]
    Decode(#[from] serde_json::Error),

    #[error("Live-update channel rejected the subscription: {0}")]
    Rejected(String),
}

/// A messaging backend: list, create, and subscribe-to-create.
///
/// Futures and streams are not required to be `Send`. The engine runs on a single thread.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// Every message visible to the caller, in no particular order.
    async fn list_messages(&self) -> Result<Vec<Message>, BackendError>;

    /// Persist one message. Backends that return the stored row should do so; the engine uses it to
    /// adopt the server id and timestamp.
    async fn create_message(&self, message: NewMessage) -> Result<Option<Message>, BackendError>;

    /// Open the live-update channel. It delivers every message created from now on (at least once, in
    /// no particular order) until the stream is dropped.
    fn subscribe(&self) -> LocalBoxStream<'static, Result<Message, BackendError>>;
}
