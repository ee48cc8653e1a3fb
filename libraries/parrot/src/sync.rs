//! The [`Synchronizer`] owns one conversation for the lifetime of a mounted view.
//!
//! It has three sources of mutation, with no ordering between them: the bulk load ([`Synchronizer::initialize`]),
//! the live-update channel ([`Synchronizer::subscribe`]) and local sends ([`Synchronizer::send`]).
//! Everything runs on one thread: background work goes through `tokio::task::spawn_local`, so callers
//! must be inside a `tokio::task::LocalSet`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::TimeZone;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendError};
use crate::data_model::{
    Change, ClientId, Conversation, Entry, ListenerKey, MergePolicy, Message, NewMessage,
};
use crate::projector::{self, Projection};
use crate::session::Identity;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Messages were already loaded for this view")]
    AlreadyInitialized,

    #[error("The live-update channel is already open for this view")]
    AlreadySubscribed,

    #[error("Synchronization was halted")]
    Halted,

    #[error("Backend error")]
    Backend(#[from] BackendError),
}

pub struct Synchronizer<B> {
    backend: B,
    identity: String,
    // never hold a borrow of either of these across an .await or while listeners run
    conversation: RefCell<Conversation>,
    draft: RefCell<String>,
    initialized: Cell<bool>,
    subscribed: Cell<bool>,
    active: Cell<bool>,
}

impl<B: Backend + 'static> Synchronizer<B> {
    pub fn new(backend: B, identity: impl Into<String>, policy: MergePolicy) -> Rc<Self> {
        Rc::new(Self {
            backend,
            identity: identity.into(),
            conversation: RefCell::new(Conversation::new(policy)),
            draft: RefCell::new(String::new()),
            initialized: Cell::new(false),
            subscribed: Cell::new(false),
            active: Cell::new(true),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn entries(&self) -> im::Vector<Entry> {
        self.conversation.borrow().snapshot()
    }

    pub fn project<Tz: TimeZone>(&self, tz: &Tz) -> Projection
    where
        Tz::Offset: std::fmt::Display,
    {
        projector::project(&self.entries(), &self.identity, tz)
    }

    pub fn draft(&self) -> String {
        self.draft.borrow().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        if !self.active.get() {
            return;
        }
        *self.draft.borrow_mut() = text.into();
        self.conversation.borrow_mut().notify(Change::Draft);
        self.flush_notifications();
    }

    pub fn register_listener(&self, listener: impl Fn(ListenerKey, Change) + 'static) -> ListenerKey {
        self.conversation.borrow_mut().register_listener(listener)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.conversation.borrow_mut().unregister_listener(key)
    }

    /// Load every existing message. Only the first call per view does anything.
    /// On failure the conversation is left as it is and nothing is retried.
    pub async fn initialize(&self) -> Result<usize, SyncError> {
        if self.initialized.replace(true) {
            return Err(SyncError::AlreadyInitialized);
        }

        let messages = self
            .backend
            .list_messages()
            .await
            .inspect_err(|e| log::error!("Failed to load messages: {e:?}"))?;

        if !self.active.get() {
            log::debug!("Discarding bulk load that finished after the view was halted");
            return Err(SyncError::Halted);
        }

        let added = self.conversation.borrow_mut().replace_all(messages);
        self.flush_notifications();
        log::info!("Loaded {added} messages");
        Ok(added)
    }

    /// Open the live-update channel. Only the first call per view succeeds.
    /// The channel stays open until the returned [`Subscription`] is dropped.
    pub fn subscribe(self: &Rc<Self>) -> Result<Subscription, SyncError> {
        if !self.active.get() {
            return Err(SyncError::Halted);
        }
        if self.subscribed.replace(true) {
            return Err(SyncError::AlreadySubscribed);
        }

        let mut updates = self.backend.subscribe();
        let this = Rc::clone(self);
        let task = tokio::task::spawn_local(async move {
            while let Some(update) = updates.next().await {
                match update {
                    Ok(message) => this.apply_live_update(message),
                    // reconnecting is the transport's job
                    Err(e) => log::warn!("Live-update channel error: {e:?}"),
                }
            }
            log::info!("Live-update channel closed");
        });

        Ok(Subscription { task })
    }

    /// Send the current draft.
    pub fn submit(self: &Rc<Self>) -> Option<ClientId> {
        let text = self.draft();
        self.send(text)
    }

    /// Send `text` as the current identity. Blank text is ignored.
    ///
    /// The draft is cleared and the message shows up in the conversation before this returns; the create
    /// request runs in the background. If it fails, the message stays in the conversation marked as failed.
    pub fn send(self: &Rc<Self>, text: impl Into<String>) -> Option<ClientId> {
        if !self.active.get() {
            return None;
        }
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }

        self.draft.borrow_mut().clear();

        let client_id = ClientId::new();
        let message = Message::local(self.identity.clone(), text, client_id);
        {
            let mut conversation = self.conversation.borrow_mut();
            conversation.notify(Change::Draft);
            conversation.append_local(message.clone());
        }
        self.flush_notifications();

        self.spawn_create(NewMessage::from(&message), client_id);
        Some(client_id)
    }

    /// Send a failed message again. Returns false if `client_id` isn't a failed send.
    pub fn retry(self: &Rc<Self>, client_id: ClientId) -> bool {
        if !self.active.get() {
            return false;
        }
        let Some(message) = self.conversation.borrow_mut().begin_retry(client_id) else {
            return false;
        };
        self.flush_notifications();

        self.spawn_create(NewMessage::from(&message), client_id);
        true
    }

    /// Retry every failed send. Returns how many were retried.
    pub fn retry_failed(self: &Rc<Self>) -> usize {
        let failed = self.conversation.borrow().failed();
        failed
            .into_iter()
            .filter(|client_id| self.retry(*client_id))
            .count()
    }

    /// Stop applying anything to the conversation. Requests already in flight still complete, but their
    /// results are dropped.
    pub fn halt(&self) {
        if self.active.replace(false) {
            log::info!("Synchronization halted for {}", self.identity);
        }
    }

    fn apply_live_update(&self, message: Message) {
        if !self.active.get() {
            return;
        }
        if !self.conversation.borrow_mut().append_remote(message) {
            log::debug!("Dropped duplicate live update");
        }
        self.flush_notifications();
    }

    fn spawn_create(self: &Rc<Self>, message: NewMessage, client_id: ClientId) {
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let result = this.backend.create_message(message).await;
            if !this.active.get() {
                return;
            }
            match result {
                Ok(stored) => {
                    this.conversation
                        .borrow_mut()
                        .mark_confirmed(client_id, stored);
                }
                Err(e) => {
                    log::error!("Failed to send message {client_id}: {e:?}");
                    this.conversation
                        .borrow_mut()
                        .mark_failed(client_id, e.to_string());
                }
            }
            this.flush_notifications();
        });
    }

    fn flush_notifications(&self) {
        // take them out first: listeners commonly call straight back into the synchronizer
        let notifications = self.conversation.borrow_mut().drain_due_notifications();
        for notification in notifications {
            notification();
        }
    }
}

/// Keeps the live-update channel open. Dropping it closes the channel.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A mounted chat view: a synchronizer plus its live-update channel.
/// Unmounting (or dropping) the view halts the synchronizer and closes the channel.
pub struct ChatView<B: Backend + 'static> {
    synchronizer: Rc<Synchronizer<B>>,
    subscription: Option<Subscription>,
}

impl<B: Backend + 'static> ChatView<B> {
    /// Subscribe to live updates and start the bulk load, for `identity`.
    pub fn mount(backend: B, identity: &Identity, policy: MergePolicy) -> Result<Self, SyncError> {
        let synchronizer = Synchronizer::new(backend, identity.name.clone(), policy);
        let subscription = synchronizer.subscribe()?;

        tokio::task::spawn_local({
            let synchronizer = Rc::clone(&synchronizer);
            async move {
                // failures are logged by `initialize`
                let _ = synchronizer.initialize().await;
            }
        });

        Ok(Self {
            synchronizer,
            subscription: Some(subscription),
        })
    }

    pub fn synchronizer(&self) -> &Rc<Synchronizer<B>> {
        &self.synchronizer
    }

    pub fn project<Tz: TimeZone>(&self, tz: &Tz) -> Projection
    where
        Tz::Offset: std::fmt::Display,
    {
        self.synchronizer.project(tz)
    }

    pub fn unmount(self) {
        drop(self);
    }
}

impl<B: Backend + 'static> Drop for ChatView<B> {
    fn drop(&mut self) {
        self.synchronizer.halt();
        self.subscription.take();
    }
}
