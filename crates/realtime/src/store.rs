//! Bounded, de-duplicated notification list for one actor.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use stallplass_core::notifications::{
    Category, Notification, NotificationDraft, NotificationKind, Priority,
};

/// Default number of notifications kept per actor.
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 50;

type DeliveryKey<K> = (String, K, Option<String>);

/// Most-recent-first list capped at `capacity`.
///
/// A notification is keyed by `(event id, type, rental id)`. A key seen
/// once is not delivered again, even after the list is cleared or the entry
/// falls off the end. Keys are released only when their rental is deleted
/// (see [`forget_rental`](Self::forget_rental)).
pub struct NotificationStore<K: NotificationKind> {
    items: VecDeque<Notification<K>>,
    capacity: usize,
    delivered: HashSet<DeliveryKey<K>>,
}

impl<K: NotificationKind> NotificationStore<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            delivered: HashSet::new(),
        }
    }

    /// Stores a draft produced for `event_id`. Returns the stored
    /// notification, or `None` when the same key was already delivered.
    pub fn push(
        &mut self,
        event_id: &str,
        draft: NotificationDraft<K>,
        now: DateTime<Utc>,
    ) -> Option<Notification<K>> {
        let key = (event_id.to_string(), draft.kind, draft.data.rental_id.clone());
        if !self.delivered.insert(key) {
            return None;
        }
        let notification = Notification::from_draft(draft, now);
        self.items.push_front(notification.clone());
        self.items.truncate(self.capacity);
        Some(notification)
    }

    pub fn list(&self) -> Vec<Notification<K>> {
        self.items.iter().cloned().collect()
    }

    pub fn by_category(&self, category: Category) -> Vec<Notification<K>> {
        self.filtered(|n| n.category == category)
    }

    pub fn by_priority(&self, priority: Priority) -> Vec<Notification<K>> {
        self.filtered(|n| n.priority == priority)
    }

    /// Unread notifications that ask the recipient to act.
    pub fn action_required(&self) -> Vec<Notification<K>> {
        self.filtered(|n| !n.read && n.action_required())
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Returns false when no notification has this id.
    pub fn mark_as_read(&mut self, notification_id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == notification_id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    /// Marks everything read and returns how many changed.
    pub fn mark_all_as_read(&mut self) -> usize {
        let mut changed = 0;
        for notification in self.items.iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }
        changed
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Drops the delivery keys of a deleted rental. Returns how many went.
    pub fn forget_rental(&mut self, rental_id: &str) -> usize {
        let before = self.delivered.len();
        self.delivered
            .retain(|(_, _, rental)| rental.as_deref() != Some(rental_id));
        before - self.delivered.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn filtered(&self, keep: impl Fn(&Notification<K>) -> bool) -> Vec<Notification<K>> {
        self.items.iter().filter(|n| keep(n)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stallplass_core::notifications::{NotificationData, OwnerNotificationType};

    fn draft(kind: OwnerNotificationType, rental_id: &str) -> NotificationDraft<OwnerNotificationType> {
        NotificationDraft::new(
            kind,
            format!("about {rental_id}"),
            NotificationData {
                rental_id: Some(rental_id.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_newest_first_and_capped() {
        let mut store = NotificationStore::new(3);
        for i in 0..5 {
            store.push(
                &format!("evt-{i}"),
                draft(OwnerNotificationType::RentalConfirmed, &format!("r{i}")),
                Utc::now(),
            );
        }
        let rentals: Vec<String> = store
            .list()
            .iter()
            .filter_map(|n| n.rental_id().map(str::to_string))
            .collect();
        assert_eq!(rentals, vec!["r4", "r3", "r2"]);
    }

    #[test]
    fn test_same_key_is_delivered_once() {
        let mut store = NotificationStore::new(10);
        let now = Utc::now();
        assert!(store
            .push("evt-1", draft(OwnerNotificationType::RentalActivated, "r1"), now)
            .is_some());
        assert!(store
            .push("evt-1", draft(OwnerNotificationType::RentalActivated, "r1"), now)
            .is_none());
        // Same event, different type is a separate notification.
        assert!(store
            .push("evt-1", draft(OwnerNotificationType::RentalConflict, "r1"), now)
            .is_some());

        store.clear();
        assert!(store
            .push("evt-1", draft(OwnerNotificationType::RentalActivated, "r1"), now)
            .is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_deleted_rental_releases_its_keys() {
        let mut store = NotificationStore::new(10);
        let now = Utc::now();
        store.push("evt-1", draft(OwnerNotificationType::RentalActivated, "r1"), now);
        store.push("evt-2", draft(OwnerNotificationType::RentalActivated, "r2"), now);

        assert_eq!(store.forget_rental("r1"), 1);
        assert_eq!(store.forget_rental("r1"), 0);
        assert!(store
            .push("evt-1", draft(OwnerNotificationType::RentalActivated, "r1"), now)
            .is_some());
        assert!(store
            .push("evt-2", draft(OwnerNotificationType::RentalActivated, "r2"), now)
            .is_none());
    }

    #[test]
    fn test_read_state_and_filters() {
        let mut store = NotificationStore::new(10);
        let now = Utc::now();
        let request = store
            .push("e1", draft(OwnerNotificationType::NewRentalRequest, "r1"), now)
            .unwrap();
        store.push("e2", draft(OwnerNotificationType::RentalCompleted, "r2"), now);

        assert_eq!(store.unread_count(), 2);
        assert_eq!(store.action_required().len(), 1);
        assert_eq!(store.by_priority(Priority::Low).len(), 1);
        assert_eq!(store.by_category(Category::Rental).len(), 2);

        assert!(store.mark_as_read(&request.id));
        assert!(!store.mark_as_read("missing"));
        assert_eq!(store.unread_count(), 1);
        assert!(store.action_required().is_empty());

        assert_eq!(store.mark_all_as_read(), 1);
        assert_eq!(store.unread_count(), 0);
    }
}
