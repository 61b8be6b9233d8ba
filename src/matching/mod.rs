//! Deferred-acceptance matching of attendees to occasions.
//!
//! Attendees propose their best remaining wish to the occasion. Occasions
//! accept while they have spots and, once full, trade a weaker holder for a
//! stronger candidate. The loop stops after a pass without any acceptance.

mod attendee;
mod driver;
mod error;
mod occasion;
mod overlap;
mod score;
#[cfg(test)]
mod tests;

pub use attendee::AttendeeAgent;
pub use driver::{deferred_acceptance, is_stable, run_period, LoopBudget};
pub use error::MatchError;
pub use occasion::{EvictionPolicy, OccasionAgent, Verdict};
pub use overlap::{overlaps, unblockable, OverlapRules};
pub use score::{
    Criterion, PreferAdminChildren, PreferInAgeBracket, PreferMotivated, PreferOrganiserChildren, Scoring,
    ScoringContext, ScoringSettings,
};

use std::collections::BTreeSet;

use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::store::StateUpdate;

/// The engine's working copy of a booking, carrying what the overlap test and
/// the occasions need so agents never look anything up.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchableBooking {
    pub id: Ulid,
    pub attendee_id: Ulid,
    pub occasion_id: Ulid,
    pub priority: i32,
    /// Fixed for the whole run.
    pub score: f64,
    pub state: BookingState,
    pub dates: Vec<Span>,
    pub exclude_from_overlap_check: bool,
    pub anti_affinity_group: Option<String>,
}

impl MatchableBooking {
    pub fn new(booking: &Booking, occasion: &Occasion, score: f64) -> Self {
        Self {
            id: booking.id,
            attendee_id: booking.attendee_id,
            occasion_id: booking.occasion_id,
            priority: booking.priority,
            score,
            state: booking.state,
            dates: occasion.dates.clone(),
            exclude_from_overlap_check: occasion.exclude_from_overlap_check,
            anti_affinity_group: occasion.anti_affinity_group.clone(),
        }
    }
}

#[derive(Debug)]
pub struct MatchOptions {
    pub scoring: Scoring,
    pub eviction: EvictionPolicy,
    /// Assert no attendee ends up with overlapping bookings and no occasion
    /// over capacity. Cheap; leave it on.
    pub validity_check: bool,
    /// Look for blocking pairs after convergence. O(n⁴), a testing tool.
    pub stability_check: bool,
    /// Fail instead of stopping quietly when the loop budget runs out.
    pub hard_budget: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            scoring: Scoring::default(),
            eviction: EvictionPolicy::default(),
            validity_check: true,
            stability_check: false,
            hard_budget: true,
        }
    }
}

/// Final partition of a period's bookings plus loop statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub open: BTreeSet<Ulid>,
    pub accepted: BTreeSet<Ulid>,
    pub blocked: BTreeSet<Ulid>,
    pub passes: usize,
    pub acceptances: usize,
    pub evictions: usize,
}

impl MatchOutcome {
    pub fn state_update(&self) -> StateUpdate {
        StateUpdate {
            open: self.open.iter().copied().collect(),
            accepted: self.accepted.iter().copied().collect(),
            blocked: self.blocked.iter().copied().collect(),
        }
    }

    pub fn state_of(&self, booking_id: &Ulid) -> Option<BookingState> {
        if self.accepted.contains(booking_id) {
            Some(BookingState::Accepted)
        } else if self.open.contains(booking_id) {
            Some(BookingState::Open)
        } else if self.blocked.contains(booking_id) {
            Some(BookingState::Blocked)
        } else {
            None
        }
    }
}
