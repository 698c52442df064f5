//! Notification rule engine.
//!
//! Pure functions from classified events to notification drafts, one rule
//! set per actor role. Ids, timestamps and read state are attached by the
//! distributor that delivers them.

mod model;
mod owner;
mod renter;
mod template;

pub use model::{
    Category, Notification, NotificationData, NotificationDraft, NotificationKind, Priority,
};
pub use owner::{owner_notification, OwnerEvent, OwnerNotificationType};
pub use renter::{renter_notification, RenterEvent, RenterNotificationType};
pub use template::TemplateContext;
