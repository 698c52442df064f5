//! User directory lookups.

use crate::errors::Result;

/// Resolves user ids to display names for notification text.
pub trait UserDirectoryTrait: Send + Sync {
    fn get_display_name(&self, user_id: &str) -> Result<Option<String>>;
}
