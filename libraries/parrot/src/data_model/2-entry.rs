use serde::{Deserialize, Serialize};

use crate::data_model::{Message, Stamp};

/// Where an entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Sent from this session.
    Local,
    /// Delivered by the bulk load or the live-update channel.
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// The create request is still in flight.
    Pending,
    Confirmed,
    /// The create request failed. The entry stays visible and can be retried.
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Insertion counter, used to break ties between equal stamps.
    pub seq: u64,
    pub message: Message,
    pub origin: Origin,
    pub delivery: Delivery,
}

impl Entry {
    pub(crate) fn remote(seq: u64, message: Message) -> Self {
        Self {
            seq,
            message,
            origin: Origin::Remote,
            delivery: Delivery::Confirmed,
        }
    }

    pub(crate) fn local(seq: u64, message: Message) -> Self {
        Self {
            seq,
            message,
            origin: Origin::Local,
            delivery: Delivery::Pending,
        }
    }

    pub fn order_key(&self) -> (Stamp, u64) {
        (self.message.stamp(), self.seq)
    }

    pub fn is_unconfirmed_local(&self) -> bool {
        self.origin == Origin::Local && self.delivery != Delivery::Confirmed
    }
}
