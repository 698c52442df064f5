//! In-memory marketplace store.
//!
//! Implements the payment, rental, conversation and user traits over plain
//! maps. When a change feed is attached, every mutation publishes the
//! matching row change after the store lock is released, so consumers see
//! the same sequence a database replication feed would produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::conversations::{ConversationDetails, ConversationRepositoryTrait, Message};
use crate::errors::{Error, Result};
use crate::events::{
    ChangeKind, InMemoryChangeFeed, RowChange, BOXES_TABLE, MESSAGES_TABLE, PAYMENTS_TABLE,
    RENTALS_TABLE,
};
use crate::payments::{Payment, PaymentError, PaymentRepositoryTrait, ProviderState};
use crate::rentals::{Rental, RentalDetails, RentalError, RentalRepositoryTrait, RentalStatus};
use crate::users::UserDirectoryTrait;

#[derive(Debug, Clone)]
struct StableRecord {
    owner_id: String,
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct BoxRecord {
    id: String,
    stable_id: String,
    name: String,
    is_available: bool,
}

#[derive(Debug, Clone)]
struct ConversationRecord {
    rider_id: String,
    owner_id: String,
    stable_id: Option<String>,
}

#[derive(Default)]
struct MarketState {
    users: HashMap<String, String>,
    stables: HashMap<String, StableRecord>,
    boxes: HashMap<String, BoxRecord>,
    rentals: HashMap<String, Rental>,
    payments: HashMap<String, Payment>,
    conversations: HashMap<String, ConversationRecord>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryMarketplace {
    state: Mutex<MarketState>,
    feed: Option<Arc<InMemoryChangeFeed>>,
    status_update_calls: AtomicUsize,
}

impl InMemoryMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_feed(feed: Arc<InMemoryChangeFeed>) -> Self {
        Self {
            feed: Some(feed),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MarketState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Marketplace store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish<T: Serialize>(
        &self,
        table: &str,
        kind: ChangeKind,
        record: Option<&T>,
        old: Option<Value>,
    ) {
        let Some(feed) = &self.feed else {
            return;
        };
        let record = match record.map(serde_json::to_value).transpose() {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping {} change, row did not serialize: {}", table, e);
                return;
            }
        };
        feed.publish_row(RowChange {
            event_id: Some(uuid::Uuid::new_v4().to_string()),
            table: table.to_string(),
            kind,
            record,
            old_record: old,
            commit_timestamp: Utc::now(),
        });
    }

    // Setup

    pub fn add_user(&self, user_id: &str, display_name: &str) {
        self.lock()
            .users
            .insert(user_id.to_string(), display_name.to_string());
    }

    pub fn add_stable(&self, stable_id: &str, owner_id: &str, name: &str) {
        self.lock().stables.insert(
            stable_id.to_string(),
            StableRecord {
                owner_id: owner_id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn add_box(&self, box_id: &str, stable_id: &str, name: &str) {
        self.lock().boxes.insert(
            box_id.to_string(),
            BoxRecord {
                id: box_id.to_string(),
                stable_id: stable_id.to_string(),
                name: name.to_string(),
                is_available: true,
            },
        );
    }

    pub fn add_conversation(
        &self,
        conversation_id: &str,
        rider_id: &str,
        owner_id: &str,
        stable_id: Option<&str>,
    ) {
        self.lock().conversations.insert(
            conversation_id.to_string(),
            ConversationRecord {
                rider_id: rider_id.to_string(),
                owner_id: owner_id.to_string(),
                stable_id: stable_id.map(str::to_string),
            },
        );
    }

    // Mutations

    pub fn insert_rental(&self, rental: Rental) {
        self.lock().rentals.insert(rental.id.clone(), rental.clone());
        debug!("Inserted rental {} ({})", rental.id, rental.status);
        self.publish(RENTALS_TABLE, ChangeKind::Insert, Some(&rental), None);
    }

    /// Moves a rental to `status` through the rental state machine.
    pub fn set_rental_status(&self, rental_id: &str, status: RentalStatus) -> Result<Rental> {
        let (before, after) = {
            let mut state = self.lock();
            let rental = state
                .rentals
                .get_mut(rental_id)
                .ok_or_else(|| RentalError::NotFound(rental_id.to_string()))?;
            if !rental.status.can_transition_to(status) {
                return Err(RentalError::InvalidTransition {
                    from: rental.status,
                    to: status,
                }
                .into());
            }
            let before = rental.clone();
            rental.status = status;
            rental.updated_at = Utc::now();
            (before, rental.clone())
        };
        debug!("Rental {} moved {} -> {}", rental_id, before.status, after.status);
        self.publish(
            RENTALS_TABLE,
            ChangeKind::Update,
            Some(&after),
            serde_json::to_value(&before).ok(),
        );
        Ok(after)
    }

    pub fn set_box_availability(&self, box_id: &str, available: bool) -> Result<()> {
        let (before, after) = {
            let mut state = self.lock();
            let record = state
                .boxes
                .get_mut(box_id)
                .ok_or_else(|| Error::Repository(format!("Box not found: {}", box_id)))?;
            let before = record.clone();
            record.is_available = available;
            (before, record.clone())
        };
        self.publish(
            BOXES_TABLE,
            ChangeKind::Update,
            Some(&after),
            serde_json::to_value(&before).ok(),
        );
        Ok(())
    }

    pub fn insert_payment(&self, payment: Payment) {
        self.lock().payments.insert(payment.id.clone(), payment.clone());
        debug!("Inserted payment {} ({})", payment.id, payment.status);
        self.publish(PAYMENTS_TABLE, ChangeKind::Insert, Some(&payment), None);
    }

    pub fn post_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message> {
        let message = {
            let mut state = self.lock();
            if !state.conversations.contains_key(conversation_id) {
                return Err(Error::Repository(format!(
                    "Conversation not found: {}",
                    conversation_id
                )));
            }
            let message = Message {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                created_at: Utc::now(),
            };
            state.messages.push(message.clone());
            message
        };
        self.publish(MESSAGES_TABLE, ChangeKind::Insert, Some(&message), None);
        Ok(message)
    }

    // Reads

    pub fn payment(&self, payment_id: &str) -> Option<Payment> {
        self.lock().payments.get(payment_id).cloned()
    }

    pub fn rental(&self, rental_id: &str) -> Option<Rental> {
        self.lock().rentals.get(rental_id).cloned()
    }

    pub fn list_payments(&self) -> Vec<Payment> {
        self.lock().payments.values().cloned().collect()
    }

    /// Number of `update_payment_status` calls received.
    pub fn status_update_calls(&self) -> usize {
        self.status_update_calls.load(Ordering::SeqCst)
    }

    fn update_by_reference<F>(&self, provider_order_id: &str, apply: F) -> Result<Payment>
    where
        F: FnOnce(&mut Payment),
    {
        let (before, after) = {
            let mut state = self.lock();
            let payment = state
                .payments
                .values_mut()
                .find(|p| p.provider_order_id == provider_order_id)
                .ok_or_else(|| PaymentError::NotFound(provider_order_id.to_string()))?;
            let before = payment.clone();
            apply(payment);
            (before, payment.clone())
        };
        if before != after {
            self.publish(
                PAYMENTS_TABLE,
                ChangeKind::Update,
                Some(&after),
                serde_json::to_value(&before).ok(),
            );
        }
        Ok(after)
    }
}

#[async_trait]
impl PaymentRepositoryTrait for InMemoryMarketplace {
    fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self.payment(payment_id))
    }

    async fn update_payment_status(
        &self,
        provider_order_id: &str,
        state: ProviderState,
    ) -> Result<Payment> {
        self.status_update_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.update_by_reference(provider_order_id, |payment| {
            if payment.apply_provider_state(state, now) {
                debug!(
                    "Payment {} is now {} (provider {})",
                    payment.id, payment.status, state
                );
            }
        })
    }

    async fn mark_payment_captured(
        &self,
        provider_order_id: &str,
        captured_minor: i64,
    ) -> Result<Payment> {
        let now = Utc::now();
        self.update_by_reference(provider_order_id, |payment| {
            payment.mark_captured(captured_minor, now);
        })
    }
}

impl RentalRepositoryTrait for InMemoryMarketplace {
    fn get_rental_details(&self, rental_id: &str) -> Result<Option<RentalDetails>> {
        let state = self.lock();
        let Some(rental) = state.rentals.get(rental_id) else {
            return Ok(None);
        };
        let stable = state.stables.get(&rental.stable_id);
        let Some(stable) = stable else {
            return Err(Error::Repository(format!(
                "Stable {} of rental {} not found",
                rental.stable_id, rental_id
            )));
        };
        Ok(Some(RentalDetails {
            rental: rental.clone(),
            owner_id: stable.owner_id.clone(),
            rider_name: state.users.get(&rental.rider_id).cloned(),
            owner_name: state.users.get(&stable.owner_id).cloned(),
            box_name: state.boxes.get(&rental.box_id).map(|b| b.name.clone()),
            stable_name: Some(stable.name.clone()),
        }))
    }

    fn list_box_rentals(&self, box_id: &str) -> Result<Vec<Rental>> {
        let mut rentals: Vec<Rental> = self
            .lock()
            .rentals
            .values()
            .filter(|r| r.box_id == box_id)
            .cloned()
            .collect();
        rentals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rentals)
    }

    fn get_stable_owner(&self, stable_id: &str) -> Result<Option<String>> {
        Ok(self.lock().stables.get(stable_id).map(|s| s.owner_id.clone()))
    }

    fn list_rider_rentals(
        &self,
        rider_id: &str,
        status: Option<RentalStatus>,
    ) -> Result<Vec<Rental>> {
        let mut rentals: Vec<Rental> = self
            .lock()
            .rentals
            .values()
            .filter(|r| r.rider_id == rider_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        rentals.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rentals)
    }
}

impl ConversationRepositoryTrait for InMemoryMarketplace {
    fn get_conversation(&self, conversation_id: &str) -> Result<Option<ConversationDetails>> {
        let state = self.lock();
        Ok(state.conversations.get(conversation_id).map(|c| {
            let stable = c.stable_id.as_ref().and_then(|id| state.stables.get(id));
            ConversationDetails {
                id: conversation_id.to_string(),
                rider_id: c.rider_id.clone(),
                owner_id: c.owner_id.clone(),
                stable_id: c.stable_id.clone(),
                stable_name: stable.map(|s| s.name.clone()),
                rider_name: state.users.get(&c.rider_id).cloned(),
                owner_name: state.users.get(&c.owner_id).cloned(),
            }
        }))
    }
}

impl UserDirectoryTrait for InMemoryMarketplace {
    fn get_display_name(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.lock().users.get(user_id).cloned())
    }
}
