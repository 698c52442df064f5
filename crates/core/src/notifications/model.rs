use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Rental,
    Payment,
    Message,
    Review,
    System,
}

/// References attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rental_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub action_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_type: Option<String>,
}

/// A closed set of notification types for one actor role.
///
/// Each type fixes its title, priority, category and whether it asks the
/// recipient to act.
pub trait NotificationKind:
    Copy + Eq + Hash + Debug + Serialize + Send + Sync + 'static
{
    fn title(self) -> &'static str;
    fn priority(self) -> Priority;
    fn category(self) -> Category;
    fn action_required(self) -> bool;
}

/// Output of a notification rule, before id and timestamp are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft<K> {
    pub kind: K,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub category: Category,
    pub data: NotificationData,
}

impl<K: NotificationKind> NotificationDraft<K> {
    pub fn new(kind: K, message: String, mut data: NotificationData) -> Self {
        data.action_required = kind.action_required();
        Self {
            kind,
            title: kind.title().to_string(),
            message,
            priority: kind.priority(),
            category: kind.category(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification<K> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: K,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub priority: Priority,
    pub category: Category,
    pub data: Option<NotificationData>,
}

impl<K: NotificationKind> Notification<K> {
    pub fn from_draft(draft: NotificationDraft<K>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: draft.kind,
            title: draft.title,
            message: draft.message,
            timestamp,
            read: false,
            priority: draft.priority,
            category: draft.category,
            data: Some(draft.data),
        }
    }

    pub fn rental_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.rental_id.as_deref())
    }

    pub fn action_required(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.action_required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_data_serializes_camel_case_and_skips_empty() {
        let data = NotificationData {
            rental_id: Some("r1".to_string()),
            action_required: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["rentalId"], "r1");
        assert_eq!(json["actionRequired"], true);
        assert!(json.get("paymentId").is_none());
    }
}
