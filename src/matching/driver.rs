use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::store::{BookingStore, PeriodSnapshot};

use super::attendee::AttendeeAgent;
use super::occasion::{OccasionAgent, Verdict};
use super::overlap::OverlapRules;
use super::score::ScoringContext;
use super::{MatchError, MatchOptions, MatchOutcome, MatchableBooking};

/// Upper bound on convergence passes, a fallback for the termination argument.
#[derive(Debug, Clone, Copy)]
pub struct LoopBudget {
    max_ticks: usize,
    ticks: usize,
}

impl LoopBudget {
    pub fn new(max_ticks: usize) -> Self {
        Self {
            max_ticks: max_ticks.max(1),
            ticks: 0,
        }
    }

    /// Charge one tick; true once the budget is spent.
    pub fn limit_reached(&mut self) -> bool {
        if self.ticks >= self.max_ticks {
            return true;
        }
        self.ticks += 1;
        false
    }

    pub fn max_ticks(&self) -> usize {
        self.max_ticks
    }
}

/// Load a period, match it and write the three state groups back.
///
/// Nothing is written unless matching succeeds. Callers serialize runs of the
/// same period.
pub fn run_period<S: BookingStore>(
    store: &S,
    period_id: Ulid,
    options: &MatchOptions,
) -> Result<MatchOutcome, MatchError> {
    let started = Instant::now();

    let result = store
        .load_period(period_id)
        .map_err(MatchError::from)
        .and_then(|snapshot| deferred_acceptance(&snapshot, options))
        .and_then(|outcome| {
            store.apply_states(period_id, &outcome.state_update())?;
            Ok(outcome)
        });

    metrics::histogram!(observability::MATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    match &result {
        Ok(outcome) => {
            metrics::counter!(observability::MATCH_RUNS_TOTAL, "status" => "ok").increment(1);
            metrics::histogram!(observability::MATCH_PASSES).record(outcome.passes as f64);
            metrics::counter!(observability::MATCH_ACCEPTANCES_TOTAL).increment(outcome.acceptances as u64);
            metrics::counter!(observability::MATCH_EVICTIONS_TOTAL).increment(outcome.evictions as u64);
            info!(
                %period_id,
                open = outcome.open.len(),
                accepted = outcome.accepted.len(),
                blocked = outcome.blocked.len(),
                passes = outcome.passes,
                "period matched"
            );
        }
        Err(e) => {
            metrics::counter!(observability::MATCH_RUNS_TOTAL, "status" => "error").increment(1);
            warn!(%period_id, "matching failed: {e}");
        }
    }

    result
}

/// Match all open bookings of a snapshot; pure, the snapshot is not touched.
pub fn deferred_acceptance(snapshot: &PeriodSnapshot, options: &MatchOptions) -> Result<MatchOutcome, MatchError> {
    let rules = OverlapRules::for_period(&snapshot.period);
    let occasions_by_id: HashMap<Ulid, &Occasion> = snapshot.occasions.iter().map(|o| (o.id, o)).collect();
    let attendees_by_id: HashMap<Ulid, &Attendee> = snapshot.attendees.iter().map(|a| (a.id, a)).collect();

    // ── Load ─────────────────────────────────────────────────────

    let mut grouped: BTreeMap<Ulid, Vec<MatchableBooking>> = BTreeMap::new();
    let mut booking_count = 0usize;
    for booking in snapshot.bookings.iter().filter(|b| b.state.is_matchable()) {
        let occasion = occasions_by_id
            .get(&booking.occasion_id)
            .copied()
            .ok_or(MatchError::OccasionNotFound {
                booking: booking.id,
                occasion: booking.occasion_id,
            })?;
        let attendee = attendees_by_id
            .get(&booking.attendee_id)
            .copied()
            .ok_or(MatchError::AttendeeNotFound {
                booking: booking.id,
                attendee: booking.attendee_id,
            })?;

        let score = options.scoring.score(&ScoringContext {
            booking,
            attendee: Some(attendee),
            occasion,
        });
        grouped
            .entry(booking.attendee_id)
            .or_default()
            .push(MatchableBooking::new(booking, occasion, score));
        booking_count += 1;
    }

    let mut attendees: BTreeMap<Ulid, AttendeeAgent> = grouped
        .into_iter()
        .map(|(attendee_id, bookings)| {
            let limit = snapshot
                .period
                .max_bookings_per_attendee
                .filter(|limit| *limit > 0)
                .or_else(|| attendees_by_id.get(&attendee_id).and_then(|a| a.limit));
            (attendee_id, AttendeeAgent::new(attendee_id, bookings, limit, rules))
        })
        .collect();

    let mut occasions: BTreeMap<Ulid, OccasionAgent> = BTreeMap::new();
    for occasion in &snapshot.occasions {
        let agent = OccasionAgent::new(occasion, &attendees, options.eviction)?;
        occasions.insert(occasion.id, agent);
    }

    // ── Converge ─────────────────────────────────────────────────

    let mut budget = LoopBudget::new(booking_count * attendees.len());
    let mut outcome = MatchOutcome::default();

    while attendees.values().any(|a| a.has_wishes()) {
        if budget.limit_reached() {
            if options.hard_budget {
                return Err(MatchError::BudgetExhausted { ticks: budget.max_ticks() });
            }
            warn!(ticks = budget.max_ticks(), "loop budget exhausted, stopping early");
            break;
        }

        let candidates: Vec<Ulid> = attendees
            .values()
            .filter(|a| a.has_wishes())
            .map(|a| a.id())
            .collect();
        let mut matched = 0usize;

        for candidate in candidates {
            // failed proposals change nothing, so a copy of the wishlist stays accurate
            let wishes: Vec<(Ulid, Ulid)> = match attendees.get(&candidate) {
                Some(agent) => agent.wishlist().map(|b| (b.id, b.occasion_id)).collect(),
                None => continue,
            };

            for (booking_id, occasion_id) in wishes {
                let occasion = occasions.get_mut(&occasion_id).ok_or(MatchError::OccasionNotFound {
                    booking: booking_id,
                    occasion: occasion_id,
                })?;
                match occasion.match_booking(&mut attendees, candidate, booking_id)? {
                    Verdict::Accepted => {}
                    Verdict::Displaced(evicted) => {
                        debug!(%booking_id, %evicted, %occasion_id, "evicted weaker booking");
                        outcome.evictions += 1;
                    }
                    Verdict::Rejected => continue,
                }
                outcome.acceptances += 1;
                matched += 1;
                break;
            }
        }

        outcome.passes += 1;
        debug!(pass = outcome.passes, matched, "matching pass finished");

        // no proposal went through, nothing further can change
        if matched == 0 {
            break;
        }
    }

    // ── Validate ─────────────────────────────────────────────────

    if options.validity_check {
        if let Some(agent) = attendees.values().find(|a| !a.is_valid()) {
            return Err(MatchError::InvariantViolation(format!(
                "attendee {} holds overlapping bookings",
                agent.id()
            )));
        }
        if let Some(agent) = occasions.values().find(|o| o.len() > o.max_spots()) {
            return Err(MatchError::InvariantViolation(format!(
                "occasion {} holds {} bookings for {} spots",
                agent.id(),
                agent.len(),
                agent.max_spots()
            )));
        }
    }

    if options.stability_check && !is_stable(&attendees, &occasions) {
        return Err(MatchError::Unstable);
    }

    for agent in attendees.values() {
        outcome.open.extend(agent.wishlist_ids());
        outcome.accepted.extend(agent.accepted_ids().iter().copied());
        outcome.blocked.extend(agent.blocked_ids().iter().copied());
    }

    Ok(outcome)
}

/// True if no accepted booking could start a chain of swaps that every
/// occasion along it prefers. O(n⁴); meant for tests.
pub fn is_stable(attendees: &BTreeMap<Ulid, AttendeeAgent>, occasions: &BTreeMap<Ulid, OccasionAgent>) -> bool {
    for attendee in attendees.values() {
        for booking in attendee.accepted() {
            for occasion in occasions.values() {
                if occasion.holds(&booking.id) {
                    continue;
                }

                // the occasion would rather have this booking than `over`..
                let Some((_, over)) = occasion.preferred(booking.score) else {
                    continue;
                };

                for other in occasions.values() {
                    if other.id() == occasion.id() {
                        continue;
                    }
                    // ..another occasion would rather have `over`, and so on
                    if let Some((_, switch)) = other.preferred(over)
                        && occasion.preferred(switch).is_some() {
                            return false;
                        }
                }
            }
        }
    }
    true
}
