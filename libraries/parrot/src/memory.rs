//! An in-process backend. Every clone of a [`MemoryBackend`] shares one room, so a test (or the offline
//! front-end) can keep a handle to publish messages "from someone else" while a synchronizer owns another.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use futures::StreamExt;
use futures::channel::{mpsc, oneshot};
use futures::stream::LocalBoxStream;

use crate::backend::{Backend, BackendError};
use crate::data_model::{Message, NewMessage};

/// A request the backend received, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    List,
    Create(NewMessage),
    Subscribe,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    room: Rc<RefCell<Room>>,
}

#[derive(Default)]
struct Room {
    rows: Vec<Message>,
    next_id: u64,
    subscribers: Vec<mpsc::UnboundedSender<Result<Message, BackendError>>>,
    calls: Vec<Call>,
    fail_list: Option<String>,
    fail_create: Option<String>,
    strip_client_ids: bool,
    list_hold: Option<oneshot::Receiver<()>>,
}

/// Releases a list request held with [`MemoryBackend::hold_next_list`].
pub struct ListHold(oneshot::Sender<()>);

impl ListHold {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store rows without notifying subscribers, as if they were created before anyone was listening.
    pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
        let mut room = self.room.borrow_mut();
        for mut message in messages {
            if message.id.is_none() {
                message.id = Some(room.allocate_id());
            }
            room.rows.push(message);
        }
    }

    /// Deliver a notification to every subscriber without storing anything.
    pub fn publish(&self, message: Message) {
        self.room.borrow_mut().fan_out(message);
    }

    /// Deliver an error on every open live-update channel.
    pub fn publish_error(&self, reason: &str) {
        self.room
            .borrow_mut()
            .fan_out_with(|| Err(BackendError::Transport(reason.to_string())));
    }

    pub fn fail_lists(&self, reason: Option<&str>) {
        self.room.borrow_mut().fail_list = reason.map(str::to_string);
    }

    pub fn fail_creates(&self, reason: Option<&str>) {
        self.room.borrow_mut().fail_create = reason.map(str::to_string);
    }

    /// Echo created messages without their client id, like a table that has no column for it.
    pub fn strip_client_ids(&self, strip: bool) {
        self.room.borrow_mut().strip_client_ids = strip;
    }

    /// The next list request captures the rows as they are now, then waits until the hold is released.
    pub fn hold_next_list(&self) -> ListHold {
        let (sender, receiver) = oneshot::channel();
        self.room.borrow_mut().list_hold = Some(receiver);
        ListHold(sender)
    }

    pub fn rows(&self) -> Vec<Message> {
        self.room.borrow().rows.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.room.borrow().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.room
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Create(_)))
            .count()
    }

    /// Live-update channels that haven't been dropped yet.
    pub fn subscriber_count(&self) -> usize {
        let mut room = self.room.borrow_mut();
        room.subscribers.retain(|subscriber| !subscriber.is_closed());
        room.subscribers.len()
    }
}

impl Room {
    /// The next numeric id not already taken, including by seeded rows.
    fn allocate_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = self.next_id.to_string();
            if !self.rows.iter().any(|row| row.id.as_deref() == Some(id.as_str())) {
                return id;
            }
        }
    }

    fn fan_out(&mut self, message: Message) {
        self.fan_out_with(|| Ok(message.clone()));
    }

    fn fan_out_with(&mut self, event: impl Fn() -> Result<Message, BackendError>) {
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(event()).is_ok());
    }
}

impl Backend for MemoryBackend {
    async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        let (result, hold) = {
            let mut room = self.room.borrow_mut();
            room.calls.push(Call::List);
            let result = match &room.fail_list {
                Some(reason) => Err(BackendError::Transport(reason.clone())),
                None => Ok(room.rows.clone()),
            };
            (result, room.list_hold.take())
        };

        if let Some(hold) = hold {
            let _ = hold.await;
        }
        result
    }

    async fn create_message(&self, message: NewMessage) -> Result<Option<Message>, BackendError> {
        let mut room = self.room.borrow_mut();
        room.calls.push(Call::Create(message.clone()));

        if let Some(reason) = &room.fail_create {
            return Err(BackendError::Transport(reason.clone()));
        }

        let stored = Message {
            id: Some(room.allocate_id()),
            owner: message.owner,
            body: message.body,
            created_at: Some(Utc::now()),
            client_id: if room.strip_client_ids {
                None
            } else {
                message.client_id
            },
        };
        room.rows.push(stored.clone());
        room.fan_out(stored.clone());
        Ok(Some(stored))
    }

    fn subscribe(&self) -> LocalBoxStream<'static, Result<Message, BackendError>> {
        let (sender, receiver) = mpsc::unbounded();
        let mut room = self.room.borrow_mut();
        room.calls.push(Call::Subscribe);
        room.subscribers.push(sender);
        receiver.boxed_local()
    }
}
