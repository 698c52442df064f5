//! Stallplass Realtime - per-actor notification distributors.
//!
//! A distributor subscribes to the marketplace change feed on behalf of one
//! user, applies the owner or renter notification rules to each change, and
//! keeps the resulting notifications in a bounded, de-duplicated list that
//! listeners can follow live.

mod bus;
mod distributor;
mod hub;
mod observed;
mod owner;
mod renter;
mod store;
mod subscriptions;

pub use bus::NotificationBus;
pub use distributor::{
    DistributorConfig, DistributorDeps, NotificationDistributor, DEFAULT_BUS_CAPACITY,
    DEFAULT_ENDING_SOON_DAYS,
};
pub use hub::NotificationHub;
pub use owner::OwnerNotificationDistributor;
pub use renter::RenterNotificationDistributor;
pub use store::{NotificationStore, DEFAULT_MAX_NOTIFICATIONS};
pub use subscriptions::SubscriptionSet;
