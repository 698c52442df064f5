use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rental status.
///
/// Valid moves are `PENDING→CONFIRMED`, `PENDING→CANCELLED`,
/// `CONFIRMED→ACTIVE`, `CONFIRMED→CANCELLED` and `ACTIVE→COMPLETED`.
/// `COMPLETED` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl RentalStatus {
    pub const ALL: [RentalStatus; 5] = [
        Self::Pending,
        Self::Confirmed,
        Self::Active,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: RentalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Active)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Active, Self::Completed)
        )
    }

    /// Classifies an observed status write.
    ///
    /// `previous` is `None` when the prior status is unknown (first sighting
    /// of the row, or an update without the old record).
    pub fn classify_change(previous: Option<RentalStatus>, next: RentalStatus) -> StatusChange {
        match previous {
            None => StatusChange::FirstSeen(next),
            Some(from) if from == next => StatusChange::Unchanged,
            Some(from) if from.can_transition_to(next) => StatusChange::Transition { from, to: next },
            Some(from) => StatusChange::Invalid { from, to: next },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`RentalStatus::classify_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Status field did not change.
    Unchanged,
    /// No previous status known.
    FirstSeen(RentalStatus),
    Transition {
        from: RentalStatus,
        to: RentalStatus,
    },
    /// A move the state machine does not allow.
    Invalid {
        from: RentalStatus,
        to: RentalStatus,
    },
}

/// An occupancy of one box by one rider.
///
/// Serialized with the store's column names, so a change-feed row decodes
/// straight into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
    pub id: String,
    pub box_id: String,
    pub stable_id: String,
    pub rider_id: String,
    pub status: RentalStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub monthly_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A rental joined with the names needed for notification text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalDetails {
    pub rental: Rental,
    pub owner_id: String,
    pub rider_name: Option<String>,
    pub owner_name: Option<String>,
    pub box_name: Option<String>,
    pub stable_name: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RentalError {
    #[error("Rental not found: {0}")]
    NotFound(String),

    #[error("Invalid rental transition from {from} to {to}")]
    InvalidTransition { from: RentalStatus, to: RentalStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_moves() {
        for next in RentalStatus::ALL {
            assert!(!RentalStatus::Completed.can_transition_to(next));
            assert!(!RentalStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_classify_change() {
        use RentalStatus::*;
        assert_eq!(
            RentalStatus::classify_change(Some(Active), Active),
            StatusChange::Unchanged
        );
        assert_eq!(
            RentalStatus::classify_change(None, Pending),
            StatusChange::FirstSeen(Pending)
        );
        assert_eq!(
            RentalStatus::classify_change(Some(Confirmed), Active),
            StatusChange::Transition {
                from: Confirmed,
                to: Active
            }
        );
        assert_eq!(
            RentalStatus::classify_change(Some(Pending), Completed),
            StatusChange::Invalid {
                from: Pending,
                to: Completed
            }
        );
    }

    #[test]
    fn test_status_serde_uses_upper_case() {
        let json = serde_json::to_string(&RentalStatus::Confirmed).unwrap();
        assert_eq!(json, "\"CONFIRMED\"");
        let parsed: RentalStatus = serde_json::from_str("\"ACTIVE\"").unwrap();
        assert_eq!(parsed, RentalStatus::Active);
    }
}
