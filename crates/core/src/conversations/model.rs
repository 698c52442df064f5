use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation about one stable, with its participants' display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetails {
    pub id: String,
    pub rider_id: String,
    pub owner_id: String,
    pub stable_id: Option<String>,
    pub stable_name: Option<String>,
    pub rider_name: Option<String>,
    pub owner_name: Option<String>,
}

impl ConversationDetails {
    /// Display name of whoever is not `user_id`.
    pub fn counterpart_name(&self, user_id: &str) -> Option<&str> {
        if user_id == self.owner_id {
            self.rider_name.as_deref()
        } else {
            self.owner_name.as_deref()
        }
    }
}

/// A row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
