//! Turns a conversation into rows ready to draw. Pure: no state, no I/O.

use std::fmt::Display;

use chrono::TimeZone;
use serde::Serialize;

use crate::data_model::{Delivery, Entry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Alignment {
    /// Sent by the signed-in identity, drawn on the right.
    SelfAuthored,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Row {
    pub alignment: Alignment,
    pub owner: String,
    pub body: String,
    /// Short local time, empty while unconfirmed.
    pub time: String,
    pub delivery: Delivery,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub rows: Vec<Row>,
    /// The row to scroll to, i.e. the newest one.
    pub scroll_to: Option<usize>,
}

pub fn project<Tz: TimeZone>(entries: &im::Vector<Entry>, identity: &str, tz: &Tz) -> Projection
where
    Tz::Offset: Display,
{
    let rows = entries
        .iter()
        .map(|entry| Row {
            alignment: if entry.message.owner == identity {
                Alignment::SelfAuthored
            } else {
                Alignment::Other
            },
            owner: entry.message.owner.clone(),
            body: entry.message.body.clone(),
            time: entry
                .message
                .created_at
                .map(|created_at| created_at.with_timezone(tz).format("%H:%M").to_string())
                .unwrap_or_default(),
            delivery: entry.delivery.clone(),
        })
        .collect::<Vec<_>>();

    Projection {
        scroll_to: rows.len().checked_sub(1),
        rows,
    }
}
