//! This is a library for keeping a shared chat conversation in sync with a backend.
//! It was created for Natter, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. Nothing happens until a [`SessionGate`] has an identity. Every outgoing message is attributed to it.
//! 2. When a [`ChatView`] mounts, it opens the live-update channel first and then loads every existing message.
//!    Both can finish in any order, and so can local sends.
//! 3. Sends are optimistic: the message is appended (without a timestamp, so it sorts last) before the
//!    create request goes out. A failed send stays visible, marked as failed, and can be retried.
//! 4. The conversation is always kept sorted by creation time, so a late notification about an older
//!    message is shown in its place rather than at the bottom.
//! 5. Unmounting the view (or signing out) halts the synchronizer: requests still in flight are allowed to
//!    finish, but nothing they return is applied.
//!
//! Sounds simple, but the three sources of mutation can overlap. [`MergePolicy`] decides what happens when
//! they do: the default keeps every notification, [`MergePolicy::Reconcile`] matches echoes and repeats.

#[cfg(feature = "supabase")]
pub mod supabase;

pub mod backend;
pub mod data_model;
pub mod memory;
pub mod projector;
pub mod session;
pub mod sync;

pub use backend::{Backend, BackendError};
pub use data_model::{
    Change, ClientId, Conversation, Delivery, Entry, ListenerKey, MergePolicy, Message, NewMessage,
    Origin,
};
pub use memory::MemoryBackend;
pub use projector::{Alignment, Projection, Row, project};
pub use session::{AuthError, Identity, IdentityProvider, SessionGate, StaticIdentity};
pub use sync::{ChatView, Subscription, SyncError, Synchronizer};
