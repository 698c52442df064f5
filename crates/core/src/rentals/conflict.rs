//! Double-booking detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Rental, RentalStatus};
use crate::notifications::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    DoubleBooking,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DoubleBooking => "double-booking",
        }
    }
}

/// Two or more rentals of the same box that are `ACTIVE` at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalConflict {
    /// Stable for the same set of rentals, so repeated scans collapse.
    pub id: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Priority,
    pub description: String,
    pub auto_resolvable: bool,
    pub suggested_actions: Vec<String>,
    pub box_id: String,
    pub rental_ids: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

const SUGGESTED_ACTIONS: &[&str] = &[
    "Contact the riders involved",
    "Cancel or end one of the overlapping rentals",
    "Move one rider to another available box",
];

/// Scans the rentals of a box after `activated` moved to `ACTIVE`.
///
/// Only rentals whose stored status is already `ACTIVE` count, so a conflict
/// can be reported late but never early. Returns `None` when `activated`
/// is alone.
pub fn detect_double_booking(
    activated: &Rental,
    box_rentals: &[Rental],
    now: DateTime<Utc>,
) -> Option<RentalConflict> {
    let others: Vec<&Rental> = box_rentals
        .iter()
        .filter(|r| r.id != activated.id && r.box_id == activated.box_id)
        .filter(|r| r.status == RentalStatus::Active)
        .collect();

    if others.is_empty() {
        return None;
    }

    let mut rental_ids: Vec<String> = others.iter().map(|r| r.id.clone()).collect();
    rental_ids.push(activated.id.clone());
    rental_ids.sort();
    rental_ids.dedup();

    let id = format!(
        "{}:{}:{}",
        ConflictType::DoubleBooking.as_str(),
        activated.box_id,
        rental_ids.join("+")
    );

    Some(RentalConflict {
        id,
        conflict_type: ConflictType::DoubleBooking,
        severity: Priority::Urgent,
        description: format!(
            "Box {} has {} active rentals at the same time",
            activated.box_id,
            rental_ids.len()
        ),
        auto_resolvable: false,
        suggested_actions: SUGGESTED_ACTIONS.iter().map(|s| s.to_string()).collect(),
        box_id: activated.box_id.clone(),
        rental_ids,
        detected_at: now,
    })
}
