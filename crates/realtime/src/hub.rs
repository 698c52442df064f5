use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use stallplass_core::notifications::{
    Category, Notification, NotificationDraft, NotificationKind, Priority,
};
use tokio::sync::broadcast;

use crate::bus::NotificationBus;
use crate::store::NotificationStore;

/// A notification store paired with a bus that announces each new entry.
pub struct NotificationHub<K: NotificationKind> {
    store: Mutex<NotificationStore<K>>,
    bus: NotificationBus<Notification<K>>,
}

impl<K: NotificationKind> NotificationHub<K> {
    pub fn new(max_notifications: usize, bus_capacity: usize) -> Self {
        Self {
            store: Mutex::new(NotificationStore::new(max_notifications)),
            bus: NotificationBus::new(bus_capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationStore<K>> {
        self.store.lock().unwrap_or_else(|poisoned| {
            warn!("Notification store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Stores the draft and notifies listeners. Duplicates are dropped.
    pub fn deliver(
        &self,
        event_id: &str,
        draft: NotificationDraft<K>,
        now: DateTime<Utc>,
    ) -> Option<Notification<K>> {
        let kind = draft.kind;
        let stored = self.lock().push(event_id, draft, now);
        match stored {
            Some(notification) => {
                self.bus.publish(notification.clone());
                Some(notification)
            }
            None => {
                debug!("Suppressed duplicate {:?} for event {}", kind, event_id);
                None
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification<K>> {
        self.bus.subscribe()
    }

    pub fn list(&self) -> Vec<Notification<K>> {
        self.lock().list()
    }

    pub fn by_category(&self, category: Category) -> Vec<Notification<K>> {
        self.lock().by_category(category)
    }

    pub fn by_priority(&self, priority: Priority) -> Vec<Notification<K>> {
        self.lock().by_priority(priority)
    }

    pub fn action_required(&self) -> Vec<Notification<K>> {
        self.lock().action_required()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count()
    }

    pub fn mark_as_read(&self, notification_id: &str) -> bool {
        self.lock().mark_as_read(notification_id)
    }

    pub fn mark_all_as_read(&self) -> usize {
        self.lock().mark_all_as_read()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn forget_rental(&self, rental_id: &str) -> usize {
        self.lock().forget_rental(rental_id)
    }
}
