//! The data model is layered, each file building on the previous one:
//! 1. [`Message`]: the one entity, plus the [`Stamp`] it is ordered by.
//! 2. [`Entry`]: a message as held locally, with its insertion sequence number and [`Delivery`] state.
//! 3. [`Conversation`]: the ordered store of entries, its merge policy and its change listeners.

#[path = "1-message.rs"]
mod message;
#[path = "2-entry.rs"]
mod entry;
#[path = "3-conversation.rs"]
mod conversation;

pub use conversation::{Change, Conversation, ListenerKey, MergePolicy};
pub use entry::{Delivery, Entry, Origin};
pub use message::{ClientId, DedupKey, Message, NewMessage, Stamp};
