use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use super::change::{value_as_string, FeedMessage, RowChange};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Subscription to {topic} failed: {reason}")]
    SubscriptionFailed { topic: String, reason: String },

    #[error("Could not decode {table} change: {reason}")]
    Decode { table: String, reason: String },

    #[error("Publish on channel {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("Change feed closed")]
    Closed,
}

/// Equality filter on one column, evaluated by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        change
            .column(&self.column)
            .map(|v| value_as_string(v) == self.value)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionTopic {
    Table {
        table: String,
        filter: Option<RowFilter>,
    },
    Channel(String),
}

impl SubscriptionTopic {
    pub fn table(table: impl Into<String>) -> Self {
        Self::Table {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filtered(table: impl Into<String>, filter: RowFilter) -> Self {
        Self::Table {
            table: table.into(),
            filter: Some(filter),
        }
    }
}

impl std::fmt::Display for SubscriptionTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table {
                table,
                filter: None,
            } => write!(f, "table:{table}"),
            Self::Table {
                table,
                filter: Some(filter),
            } => write!(f, "table:{table}[{}={}]", filter.column, filter.value),
            Self::Channel(name) => write!(f, "channel:{name}"),
        }
    }
}

/// An open subscription. Messages arrive on `receiver` until the feed
/// drops the sender (unsubscribe or shutdown).
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: String,
    pub topic: SubscriptionTopic,
    pub receiver: mpsc::UnboundedReceiver<FeedMessage>,
}

/// Realtime change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, topic: SubscriptionTopic) -> Result<FeedSubscription, FeedError>;

    /// Closes a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, subscription_id: &str);
}

/// Publishes ad-hoc messages on a named channel.
#[async_trait]
pub trait BroadcastPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), FeedError>;
}
