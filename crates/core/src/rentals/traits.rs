use super::model::{Rental, RentalDetails, RentalStatus};
use crate::errors::Result;

/// Read access to rentals and the stables that own them.
pub trait RentalRepositoryTrait: Send + Sync {
    fn get_rental_details(&self, rental_id: &str) -> Result<Option<RentalDetails>>;

    /// All rentals of a box, in any status.
    fn list_box_rentals(&self, box_id: &str) -> Result<Vec<Rental>>;

    /// Owner (user id) of a stable.
    fn get_stable_owner(&self, stable_id: &str) -> Result<Option<String>>;

    fn list_rider_rentals(
        &self,
        rider_id: &str,
        status: Option<RentalStatus>,
    ) -> Result<Vec<Rental>>;
}
