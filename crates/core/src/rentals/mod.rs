//! Rentals module.
//!
//! - **Model** (`model.rs`) - Rental records and the rental status state machine
//! - **Conflict** (`conflict.rs`) - Double-booking detection
//! - **Traits** (`traits.rs`) - Read access to rentals, boxes and stables

mod conflict;
mod model;
mod traits;

pub use conflict::{detect_double_booking, ConflictType, RentalConflict};
pub use model::{Rental, RentalDetails, RentalError, RentalStatus, StatusChange};
pub use traits::RentalRepositoryTrait;
