//! Change-feed events.
//!
//! The realtime feed delivers untyped row changes and broadcast messages.
//! They are decoded once, at the boundary, into [`ChangeEvent`]; everything
//! downstream works on the typed union.
//!
//! - **Change** (`change.rs`) - Raw feed messages and the decoded event union
//! - **Feed** (`feed.rs`) - Subscription and broadcast contracts
//! - **Memory feed** (`memory_feed.rs`) - In-process feed used by the server and tests

mod change;
mod feed;
mod memory_feed;

pub use change::*;
pub use feed::*;
pub use memory_feed::*;
