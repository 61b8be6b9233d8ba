use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum MatchError {
    /// A booking points at an occasion outside the loaded period.
    OccasionNotFound { booking: Ulid, occasion: Ulid },
    /// A booking's attendee was not loaded.
    AttendeeNotFound { booking: Ulid, attendee: Ulid },
    /// More accepted bookings were loaded than the occasion has spots.
    CapacityExceeded { occasion: Ulid, accepted: usize, max: usize },
    /// The engine produced an inconsistent result. Always a bug.
    InvariantViolation(String),
    /// The optional stability check found a blocking pair.
    Unstable,
    BudgetExhausted { ticks: usize },
    Store(StoreError),
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchError::OccasionNotFound { booking, occasion } => {
                write!(f, "booking {booking} references unknown occasion {occasion}")
            }
            MatchError::AttendeeNotFound { booking, attendee } => {
                write!(f, "booking {booking} references unknown attendee {attendee}")
            }
            MatchError::CapacityExceeded { occasion, accepted, max } => {
                write!(f, "occasion {occasion} has {accepted} accepted bookings but only {max} spots")
            }
            MatchError::InvariantViolation(msg) => write!(f, "invariant violated: {msg}"),
            MatchError::Unstable => write!(f, "matching is not stable"),
            MatchError::BudgetExhausted { ticks } => {
                write!(f, "loop budget of {ticks} passes exhausted")
            }
            MatchError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for MatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MatchError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for MatchError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
