//! # Conversation
//! The ordered store of [`Entry`]s behind one mounted chat view.
//!
//! Entries are kept sorted by [`Entry::order_key`] at all times, so readers never sort.
//! Mutations don't call listeners directly: they queue a [`Change`], and the owner drains the queue with
//! [`Conversation::drain_due_notifications`] once it has released its borrow of the store.

use std::collections::HashSet;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::data_model::{ClientId, DedupKey, Delivery, Entry, Message, Origin};

slotmap::new_key_type! {
    pub struct ListenerKey;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// A bulk load replaced or merged the server-originated entries.
    Reloaded,
    Appended,
    /// An existing entry changed delivery state or was replaced by its confirmed copy.
    Updated,
    Draft,
}

/// How incoming server data is merged with what we already hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Every notification is appended, and a bulk load replaces every server-originated entry.
    /// Local sends are never matched with their echoes, so they can show up twice.
    #[default]
    Baseline,
    /// Echoes replace their optimistic copy (matched by client id), repeated rows are dropped
    /// (matched by server id, or by owner, body and timestamp), and a bulk load is merged in.
    Reconcile,
}

enum Merge {
    Inserted,
    Replaced,
    Duplicate,
}

type Listener = Rc<dyn Fn(ListenerKey, Change)>;

#[derive(Default)]
pub struct Conversation {
    entries: im::Vector<Entry>,
    next_seq: u64,
    policy: MergePolicy,
    // only maintained under `MergePolicy::Reconcile`
    seen: HashSet<DedupKey>,
    listeners: SlotMap<ListenerKey, Listener>,
    pending_changes: Vec<Change>,
}

impl Conversation {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn entries(&self) -> &im::Vector<Entry> {
        &self.entries
    }

    /// A cheap copy of the current entries, for readers that must not hold a borrow.
    pub fn snapshot(&self) -> im::Vector<Entry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a bulk-load result. Returns the number of loaded messages that were added.
    pub fn replace_all(&mut self, messages: Vec<Message>) -> usize {
        let added = match self.policy {
            MergePolicy::Baseline => {
                // Local sends aren't necessarily in the result yet, so they survive the reload.
                let kept = self
                    .entries
                    .iter()
                    .filter(|entry| entry.origin == Origin::Local)
                    .cloned()
                    .collect::<im::Vector<_>>();
                self.entries = kept;

                let added = messages.len();
                for message in messages {
                    let seq = self.next_seq();
                    self.insert_sorted(Entry::remote(seq, message));
                }
                added
            }
            MergePolicy::Reconcile => messages
                .into_iter()
                .filter(|message| {
                    !matches!(self.merge_remote(message.clone()), Merge::Duplicate)
                })
                .count(),
        };

        self.pending_changes.push(Change::Reloaded);
        added
    }

    /// Apply a live-update notification. Returns false if it was dropped as a duplicate.
    pub fn append_remote(&mut self, message: Message) -> bool {
        match self.policy {
            MergePolicy::Baseline => {
                let seq = self.next_seq();
                self.insert_sorted(Entry::remote(seq, message));
                self.pending_changes.push(Change::Appended);
                true
            }
            MergePolicy::Reconcile => match self.merge_remote(message) {
                Merge::Inserted => {
                    self.pending_changes.push(Change::Appended);
                    true
                }
                Merge::Replaced => {
                    self.pending_changes.push(Change::Updated);
                    true
                }
                Merge::Duplicate => false,
            },
        }
    }

    /// Optimistically append a message sent from this session.
    pub fn append_local(&mut self, message: Message) {
        let seq = self.next_seq();
        self.insert_sorted(Entry::local(seq, message));
        self.pending_changes.push(Change::Appended);
    }

    /// Record that the create request for `client_id` succeeded. `stored` is the row the backend
    /// returned, if any.
    pub fn mark_confirmed(&mut self, client_id: ClientId, stored: Option<Message>) -> bool {
        let Some(index) = self.position_of_local(client_id) else {
            return false;
        };

        match (self.policy, stored) {
            (MergePolicy::Reconcile, Some(stored)) => {
                let mut entry = self.entries.remove(index);

                if let Some(key) = stored.dedup_key() {
                    let already_ours = entry.message.dedup_key().as_ref() == Some(&key);
                    if !already_ours && !self.seen.insert(key) {
                        // The echo got here first without a client id and is already displayed.
                        log::debug!("Dropping optimistic copy of {client_id}, echo already held");
                        self.pending_changes.push(Change::Updated);
                        return true;
                    }
                }

                entry.message.id = stored.id.or(entry.message.id);
                entry.message.created_at = stored.created_at.or(entry.message.created_at);
                entry.delivery = Delivery::Confirmed;
                self.insert_sorted(entry);
            }
            _ => {
                if let Some(entry) = self.entries.get_mut(index) {
                    entry.delivery = Delivery::Confirmed;
                }
            }
        }

        self.pending_changes.push(Change::Updated);
        true
    }

    /// Record that the create request for `client_id` failed.
    /// An entry that was already confirmed by its echo stays confirmed.
    pub fn mark_failed(&mut self, client_id: ClientId, reason: String) -> bool {
        let Some(index) = self.position_of_local(client_id) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.delivery != Delivery::Pending {
            return false;
        }
        entry.delivery = Delivery::Failed { reason };
        self.pending_changes.push(Change::Updated);
        true
    }

    /// Move a failed entry back to pending and return the message to send again.
    pub fn begin_retry(&mut self, client_id: ClientId) -> Option<Message> {
        let index = self.position_of_local(client_id)?;
        let entry = self.entries.get_mut(index)?;
        if !matches!(entry.delivery, Delivery::Failed { .. }) {
            return None;
        }
        entry.delivery = Delivery::Pending;
        let message = entry.message.clone();
        self.pending_changes.push(Change::Updated);
        Some(message)
    }

    pub fn failed(&self) -> Vec<ClientId> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.delivery, Delivery::Failed { .. }))
            .filter_map(|entry| entry.message.client_id)
            .collect()
    }

    pub fn register_listener(
        &mut self,
        listener: impl Fn(ListenerKey, Change) + 'static,
    ) -> ListenerKey {
        self.listeners.insert(Rc::new(listener))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key);
    }

    /// Queue a change that didn't come from the store itself (e.g. the draft changing).
    pub fn notify(&mut self, change: Change) {
        self.pending_changes.push(change);
    }

    /// Take every queued change, paired with every listener. The caller runs them after releasing its borrow,
    /// since listeners are free to call back into whatever owns this store.
    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let changes = std::mem::take(&mut self.pending_changes);
        let listeners = &self.listeners;
        changes
            .into_iter()
            .flat_map(|change| {
                listeners.iter().map(move |(key, listener)| {
                    let listener = Rc::clone(listener);
                    Box::new(move || listener(key, change)) as Box<dyn FnOnce()>
                })
            })
            .collect()
    }

    fn merge_remote(&mut self, message: Message) -> Merge {
        if let Some(client_id) = message.client_id
            && let Some(index) = self.position_of_local(client_id)
        {
            let existing = self.entries.remove(index);
            if let Some(key) = message.dedup_key() {
                self.seen.insert(key);
            }
            self.insert_sorted(Entry {
                seq: existing.seq,
                message,
                origin: existing.origin,
                delivery: Delivery::Confirmed,
            });
            return Merge::Replaced;
        }

        if let Some(key) = message.dedup_key()
            && !self.seen.insert(key)
        {
            return Merge::Duplicate;
        }

        let seq = self.next_seq();
        self.insert_sorted(Entry::remote(seq, message));
        Merge::Inserted
    }

    fn position_of_local(&self, client_id: ClientId) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.origin == Origin::Local && entry.message.client_id == Some(client_id)
        })
    }

    fn insert_sorted(&mut self, entry: Entry) {
        let key = entry.order_key();
        let index = self
            .entries
            .binary_search_by(|existing| existing.order_key().cmp(&key))
            .unwrap_or_else(|index| index);
        self.entries.insert(index, entry);
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn remote(id: &str, owner: &str, body: &str, minute: u32) -> Message {
        Message {
            id: Some(id.to_string()),
            owner: owner.to_string(),
            body: body.to_string(),
            created_at: Some(at(minute)),
            client_id: None,
        }
    }

    fn bodies(conversation: &Conversation) -> Vec<String> {
        conversation
            .entries()
            .iter()
            .map(|entry| entry.message.body.clone())
            .collect()
    }

    #[test]
    fn test_entries_stay_sorted_with_unconfirmed_last() {
        let mut conversation = Conversation::default();
        conversation.append_local(Message::local("alice", "pending-1", ClientId::new()));
        conversation.append_remote(remote("2", "bob", "b", 20));
        conversation.append_local(Message::local("alice", "pending-2", ClientId::new()));
        conversation.append_remote(remote("1", "bob", "a", 10));
        conversation.append_remote(remote("3", "bob", "c", 30));

        assert_eq!(
            bodies(&conversation),
            vec!["a", "b", "c", "pending-1", "pending-2"]
        );
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut conversation = Conversation::default();
        conversation.append_remote(remote("1", "bob", "first", 5));
        conversation.append_remote(remote("2", "carol", "second", 5));
        assert_eq!(bodies(&conversation), vec!["first", "second"]);
    }

    #[test]
    fn test_baseline_reload_replaces_remote_keeps_local() {
        let mut conversation = Conversation::default();
        conversation.append_remote(remote("9", "bob", "early live update", 1));
        conversation.append_local(Message::local("alice", "mine", ClientId::new()));

        let added = conversation.replace_all(vec![
            remote("2", "bob", "two", 2),
            remote("1", "bob", "one", 1),
        ]);

        assert_eq!(added, 2);
        assert_eq!(bodies(&conversation), vec!["one", "two", "mine"]);
    }

    #[test]
    fn test_baseline_appends_duplicates() {
        let mut conversation = Conversation::default();
        conversation.replace_all(vec![remote("1", "bob", "hi", 1)]);
        assert!(conversation.append_remote(remote("1", "bob", "hi", 1)));
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_reconcile_drops_repeated_rows() {
        let mut conversation = Conversation::new(MergePolicy::Reconcile);
        conversation.replace_all(vec![remote("1", "bob", "hi", 1)]);
        assert!(!conversation.append_remote(remote("1", "bob", "hi", 1)));
        assert_eq!(conversation.len(), 1);

        // same owner and body, different row: still a new message
        assert!(conversation.append_remote(remote("2", "bob", "hi", 2)));
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_reconcile_echo_replaces_optimistic_copy() {
        let mut conversation = Conversation::new(MergePolicy::Reconcile);
        conversation.append_remote(remote("1", "bob", "later", 50));
        let client_id = ClientId::new();
        conversation.append_local(Message::local("alice", "hello", client_id));

        let mut echo = remote("2", "alice", "hello", 40);
        echo.client_id = Some(client_id);
        assert!(conversation.append_remote(echo));

        assert_eq!(bodies(&conversation), vec!["hello", "later"]);
        let entry = &conversation.entries()[0];
        assert_eq!(entry.origin, Origin::Local);
        assert_eq!(entry.delivery, Delivery::Confirmed);
        assert_eq!(entry.message.id.as_deref(), Some("2"));

        // the create response arriving afterwards changes nothing
        let mut stored = remote("2", "alice", "hello", 40);
        stored.client_id = Some(client_id);
        assert!(conversation.mark_confirmed(client_id, Some(stored)));
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_reconcile_merges_bulk_load_with_early_updates() {
        let mut conversation = Conversation::new(MergePolicy::Reconcile);
        conversation.append_remote(remote("3", "bob", "live", 3));

        let added = conversation.replace_all(vec![
            remote("1", "bob", "one", 1),
            remote("3", "bob", "live", 3),
        ]);

        assert_eq!(added, 1);
        assert_eq!(bodies(&conversation), vec!["one", "live"]);
    }

    #[test]
    fn test_failed_entry_stays_and_can_be_retried() {
        let mut conversation = Conversation::default();
        let client_id = ClientId::new();
        conversation.append_local(Message::local("alice", "hello", client_id));

        assert!(conversation.mark_failed(client_id, "offline".to_string()));
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.failed(), vec![client_id]);

        let message = conversation.begin_retry(client_id).unwrap();
        assert_eq!(message.body, "hello");
        assert_eq!(conversation.entries()[0].delivery, Delivery::Pending);
        assert_eq!(conversation.begin_retry(client_id), None);
    }

    #[test]
    fn test_baseline_confirm_targets_local_copy() {
        let mut conversation = Conversation::default();
        let client_id = ClientId::new();
        conversation.append_local(Message::local("alice", "hello", client_id));

        let mut echo = remote("1", "alice", "hello", 1);
        echo.client_id = Some(client_id);
        conversation.append_remote(echo);
        conversation.mark_confirmed(client_id, None);

        assert_eq!(conversation.len(), 2);
        assert!(
            conversation
                .entries()
                .iter()
                .all(|entry| entry.delivery == Delivery::Confirmed)
        );
    }

    #[test]
    fn test_listeners_run_after_drain() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut conversation = Conversation::default();
        let key = conversation.register_listener({
            let seen = Rc::clone(&seen);
            move |_, change| seen.borrow_mut().push(change)
        });

        conversation.append_remote(remote("1", "bob", "hi", 1));
        conversation.notify(Change::Draft);
        assert!(seen.borrow().is_empty());

        for notification in conversation.drain_due_notifications() {
            notification();
        }
        assert_eq!(*seen.borrow(), vec![Change::Appended, Change::Draft]);

        conversation.unregister_listener(key);
        conversation.append_remote(remote("2", "bob", "yo", 2));
        assert!(conversation.drain_due_notifications().is_empty());
    }
}
