use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::feed::FeedError;
use crate::conversations::Message;
use crate::payments::{Payment, PaymentStatus};
use crate::rentals::{Rental, RentalStatus};

pub const RENTALS_TABLE: &str = "rentals";
pub const PAYMENTS_TABLE: &str = "payments";
pub const MESSAGES_TABLE: &str = "messages";
pub const BOXES_TABLE: &str = "boxes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row change as delivered by the feed.
///
/// `record` is the row after the change (absent on delete), `old_record`
/// the row before it when the feed provides one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub event_id: Option<String>,
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl RowChange {
    fn row(&self) -> Option<&Value> {
        self.record.as_ref().or(self.old_record.as_ref())
    }

    /// Value of a column, taken from the new row or else the old one.
    pub fn column(&self, column: &str) -> Option<&Value> {
        self.record
            .as_ref()
            .and_then(|r| r.get(column))
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get(column)))
    }

    /// The feed's event id, or one derived from the row identity and
    /// commit time when the feed does not supply it.
    pub fn resolved_event_id(&self) -> String {
        if let Some(id) = &self.event_id {
            return id.clone();
        }
        let row_id = self
            .row()
            .and_then(|r| r.get("id"))
            .map(value_as_string)
            .unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            self.table,
            row_id,
            self.kind,
            self.commit_timestamp.to_rfc3339()
        )
    }
}

/// Ad-hoc message published on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// Anything the feed can deliver to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Row(RowChange),
    Broadcast(BroadcastMessage),
}

/// Decoded feed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    RentalChanged {
        event_id: String,
        kind: ChangeKind,
        rental: Rental,
        /// Status before the change, when the feed carried the old row.
        previous_status: Option<RentalStatus>,
    },
    PaymentChanged {
        event_id: String,
        kind: ChangeKind,
        payment: Payment,
        previous_status: Option<PaymentStatus>,
    },
    MessageCreated {
        event_id: String,
        message: Message,
    },
    BoxChanged {
        event_id: String,
        kind: ChangeKind,
        box_id: String,
        stable_id: Option<String>,
        available: Option<bool>,
    },
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
}

impl ChangeEvent {
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::RentalChanged { event_id, .. }
            | Self::PaymentChanged { event_id, .. }
            | Self::MessageCreated { event_id, .. }
            | Self::BoxChanged { event_id, .. } => Some(event_id),
            Self::Broadcast { .. } => None,
        }
    }
}

/// Decodes a feed message.
///
/// Returns `Ok(None)` for tables this subsystem does not follow and for
/// message updates or deletes. Malformed rows are an error.
pub fn decode(message: &FeedMessage) -> Result<Option<ChangeEvent>, FeedError> {
    let change = match message {
        FeedMessage::Broadcast(broadcast) => {
            return Ok(Some(ChangeEvent::Broadcast {
                channel: broadcast.channel.clone(),
                event: broadcast.event.clone(),
                payload: broadcast.payload.clone(),
            }))
        }
        FeedMessage::Row(change) => change,
    };

    let event_id = change.resolved_event_id();
    let event = match change.table.as_str() {
        RENTALS_TABLE => {
            let rental: Rental = parse_row(change)?;
            ChangeEvent::RentalChanged {
                event_id,
                kind: change.kind,
                rental,
                previous_status: previous_status(change),
            }
        }
        PAYMENTS_TABLE => {
            let payment: Payment = parse_row(change)?;
            ChangeEvent::PaymentChanged {
                event_id,
                kind: change.kind,
                payment,
                previous_status: previous_status(change),
            }
        }
        MESSAGES_TABLE => {
            if change.kind != ChangeKind::Insert {
                return Ok(None);
            }
            ChangeEvent::MessageCreated {
                event_id,
                message: parse_row(change)?,
            }
        }
        BOXES_TABLE => {
            let box_id = change
                .column("id")
                .map(value_as_string)
                .ok_or_else(|| decode_error(change, "missing id"))?;
            ChangeEvent::BoxChanged {
                event_id,
                kind: change.kind,
                box_id,
                stable_id: change.column("stable_id").map(value_as_string),
                available: change.column("is_available").and_then(Value::as_bool),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn parse_row<T: serde::de::DeserializeOwned>(change: &RowChange) -> Result<T, FeedError> {
    let row = change
        .row()
        .ok_or_else(|| decode_error(change, "change carries no row"))?;
    serde_json::from_value(row.clone()).map_err(|e| decode_error(change, &e.to_string()))
}

fn previous_status<T: serde::de::DeserializeOwned>(change: &RowChange) -> Option<T> {
    if change.kind != ChangeKind::Update {
        return None;
    }
    change
        .old_record
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|s| serde_json::from_value(s.clone()).ok())
}

fn decode_error(change: &RowChange, reason: &str) -> FeedError {
    FeedError::Decode {
        table: change.table.clone(),
        reason: reason.to_string(),
    }
}

pub(crate) fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
