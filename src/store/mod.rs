//! Where periods, occasions, attendees and bookings live between runs.

mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::InMemoryStore;

use ulid::Ulid;

use crate::model::*;

/// Everything one matching run reads: a period plus its occasions, the
/// attendees with bookings in it and those bookings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSnapshot {
    pub period: Period,
    pub occasions: Vec<Occasion>,
    pub attendees: Vec<Attendee>,
    /// Only `open`, `accepted` and `blocked` bookings.
    pub bookings: Vec<Booking>,
}

/// Target states of one run, written back as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub open: Vec<Ulid>,
    pub accepted: Vec<Ulid>,
    pub blocked: Vec<Ulid>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.accepted.is_empty() && self.blocked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.open.len() + self.accepted.len() + self.blocked.len()
    }
}

/// The two calls a matching run makes.
pub trait BookingStore {
    fn load_period(&self, period_id: Ulid) -> Result<PeriodSnapshot, StoreError>;

    /// Only bookings of the period that are currently open, accepted or
    /// blocked, and not already in their target state, are touched.
    fn apply_states(&self, period_id: Ulid, update: &StateUpdate) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Invalid(&'static str),
    Wal(String),
    Catalog(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Invalid(msg) => write!(f, "invalid: {msg}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::Catalog(e) => write!(f, "catalog error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
