use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::store::PeriodSnapshot;

const H: Ms = 3_600_000; // 1 hour in ms
const BASE: Ms = 1_487_203_200_000; // 2017-02-16T00:00:00Z

fn at(day: i64, hour: i64) -> Ms {
    BASE + day * 24 * H + hour * H
}

/// Small period builder; ids are handed out in creation order.
struct Fixture {
    snapshot: PeriodSnapshot,
    next: u128,
}

impl Fixture {
    fn new() -> Self {
        Self {
            snapshot: PeriodSnapshot {
                period: Period::new(Ulid::from(1u128), "Summer"),
                occasions: Vec::new(),
                attendees: Vec::new(),
                bookings: Vec::new(),
            },
            next: 100,
        }
    }

    fn id(&mut self) -> Ulid {
        self.next += 1;
        Ulid::from(self.next)
    }

    fn attendee(&mut self) -> Ulid {
        let id = self.id();
        self.snapshot.attendees.push(Attendee::new(id, "kid"));
        id
    }

    /// `max_spots` usable spots.
    fn occasion(&mut self, dates: &[(Ms, Ms)], max_spots: u32) -> Ulid {
        let id = self.id();
        let dates = dates.iter().map(|(s, e)| Span::new(*s, *e)).collect();
        let occasion = Occasion::new(id, self.snapshot.period.id, "trip", dates, SpotRange::new(0, max_spots + 1));
        self.snapshot.occasions.push(occasion);
        id
    }

    fn occasion_mut(&mut self, id: Ulid) -> &mut Occasion {
        self.snapshot.occasions.iter_mut().find(|o| o.id == id).unwrap()
    }

    fn attendee_mut(&mut self, id: Ulid) -> &mut Attendee {
        self.snapshot.attendees.iter_mut().find(|a| a.id == id).unwrap()
    }

    fn book(&mut self, attendee: Ulid, occasion: Ulid, priority: i32) -> Ulid {
        self.book_in(attendee, occasion, priority, BookingState::Open)
    }

    fn book_in(&mut self, attendee: Ulid, occasion: Ulid, priority: i32, state: BookingState) -> Ulid {
        let id = self.id();
        self.snapshot.bookings.push(Booking::new(id, attendee, occasion, priority, state));
        id
    }

    fn run(&self) -> MatchOutcome {
        self.run_with(&MatchOptions::default()).unwrap()
    }

    fn run_with(&self, options: &MatchOptions) -> Result<MatchOutcome, MatchError> {
        deferred_acceptance(&self.snapshot, options)
    }

    /// Write the outcome back the way a store would.
    fn apply(&mut self, outcome: &MatchOutcome) {
        for booking in &mut self.snapshot.bookings {
            if let Some(state) = outcome.state_of(&booking.id) {
                booking.state = state;
            }
        }
    }
}

fn set(ids: &[Ulid]) -> BTreeSet<Ulid> {
    ids.iter().copied().collect()
}

fn stable_options() -> MatchOptions {
    MatchOptions {
        stability_check: true,
        ..Default::default()
    }
}

// ── Scenarios ────────────────────────────────────────────

#[test]
fn eviction_returns_weaker_booking_to_wishlist() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 10), at(0, 12))], 1);
    let a = f.attendee();
    let b = f.attendee();
    let booking_a = f.book(a, o, 10);
    let booking_b = f.book(b, o, 5);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[booking_a]));
    assert_eq!(outcome.open, set(&[booking_b]));
    assert!(outcome.blocked.is_empty());
}

#[test]
fn eviction_when_weaker_attendee_proposes_first() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 10), at(0, 12))], 1);
    let weak = f.attendee();
    let strong = f.attendee();
    let booking_weak = f.book(weak, o, 5);
    let booking_strong = f.book(strong, o, 10);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[booking_strong]));
    assert_eq!(outcome.open, set(&[booking_weak]));
    assert_eq!(outcome.evictions, 1);
}

#[test]
fn overlapping_wish_is_blocked_not_dropped() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(0, 10), at(0, 12))], 10);
    let o2 = f.occasion(&[(at(0, 11), at(0, 13))], 10);
    let kid = f.attendee();
    let high = f.book(kid, o1, 1);
    let low = f.book(kid, o2, 0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[high]));
    assert_eq!(outcome.blocked, set(&[low]));
    assert!(outcome.open.is_empty());
}

#[test]
fn satisfied_attendee_is_left_alone() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(0, 10), at(0, 12))], 10);
    let o2 = f.occasion(&[(at(1, 10), at(1, 12))], 10);
    let done = f.attendee();
    let kept = f.book_in(done, o1, 0, BookingState::Accepted);
    let busy = f.attendee();
    let wish = f.book(busy, o2, 0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[kept, wish]));
    assert_eq!(outcome.acceptances, 1);

    // nothing to do at all
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 10), at(0, 12))], 10);
    let done = f.attendee();
    let kept = f.book_in(done, o, 0, BookingState::Accepted);

    let outcome = f.run();
    assert_eq!(outcome.passes, 0);
    assert_eq!(outcome.accepted, set(&[kept]));
}

// ── Overlaps ─────────────────────────────────────────────

#[test]
fn overlapping_bookings_favor_priority() {
    let mut f = Fixture::new();
    let daytrip = f.occasion(&[(at(0, 0), at(1, 0))], 10);
    let camp = f.occasion(&[(at(0, 0), at(2, 0))], 10);
    let zoo = f.occasion(&[(at(1, 0), at(2, 0))], 10);
    let kid = f.attendee();

    let b0 = f.book(kid, daytrip, 0);
    let b1 = f.book(kid, camp, 1);
    let b2 = f.book(kid, zoo, 0);

    // the camp wins even though it blocks two others
    let outcome = f.run();
    assert!(outcome.open.is_empty());
    assert_eq!(outcome.accepted, set(&[b1]));
    assert_eq!(outcome.blocked, set(&[b0, b2]));
}

#[test]
fn overlapping_bookings_equal_priority_are_predictable() {
    let mut f = Fixture::new();
    let daytrip = f.occasion(&[(at(0, 0), at(1, 0))], 10);
    let camp = f.occasion(&[(at(0, 0), at(2, 0))], 10);
    let zoo = f.occasion(&[(at(1, 0), at(2, 0))], 10);
    let kid = f.attendee();

    let b0 = f.book(kid, daytrip, 0);
    let b1 = f.book(kid, camp, 0);
    let b2 = f.book(kid, zoo, 0);

    let outcome = f.run_with(&stable_options()).unwrap();
    assert_eq!(outcome.accepted, set(&[b0, b2]));
    assert_eq!(outcome.blocked, set(&[b1]));
}

#[test]
fn overlapping_bookings_with_multiple_dates() {
    let mut f = Fixture::new();
    let daytrip = f.occasion(&[(at(0, 8), at(0, 16)), (at(1, 8), at(1, 16))], 10);
    let camp = f.occasion(&[(at(1, 8), at(1, 16)), (at(2, 8), at(2, 16))], 10);
    let kid = f.attendee();
    let b0 = f.book(kid, daytrip, 1);
    let b1 = f.book(kid, camp, 0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[b0]));
    assert_eq!(outcome.blocked, set(&[b1]));
}

#[test]
fn overlap_exclusion() {
    let mut f = Fixture::new();
    let a = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let b = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    f.occasion_mut(b).exclude_from_overlap_check = true;
    let kid = f.attendee();
    let b0 = f.book(kid, a, 1);
    let b1 = f.book(kid, b, 0);

    assert_eq!(f.run().accepted, set(&[b0, b1]));
}

#[test]
fn minutes_between_blocks_back_to_back() {
    let mut f = Fixture::new();
    let a = f.occasion(&[(at(0, 10), at(0, 11))], 10);
    let b = f.occasion(&[(at(0, 11), at(0, 12))], 10);
    let c = f.occasion(&[(at(0, 12), at(0, 13))], 10);
    let kid = f.attendee();
    let b0 = f.book(kid, a, 2);
    let b1 = f.book(kid, b, 1);
    let b2 = f.book(kid, c, 0);

    let outcome = f.run_with(&stable_options()).unwrap();
    assert_eq!(outcome.accepted, set(&[b0, b1, b2]));

    for minutes in [1, 60] {
        f.snapshot.period.minutes_between = minutes;
        let outcome = f.run();
        assert!(outcome.open.is_empty());
        assert_eq!(outcome.accepted, set(&[b0, b2]), "{minutes} minutes between");
        assert_eq!(outcome.blocked, set(&[b1]));
    }

    f.snapshot.period.minutes_between = 61;
    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[b0]));
    assert_eq!(outcome.blocked, set(&[b1, b2]));
}

#[test]
fn minutes_between_follows_priority() {
    let mut f = Fixture::new();
    f.snapshot.period.minutes_between = 1;
    let a = f.occasion(&[(at(0, 10), at(0, 11))], 10);
    let b = f.occasion(&[(at(0, 11), at(0, 12))], 10);
    let c = f.occasion(&[(at(0, 12), at(0, 13))], 10);
    let kid = f.attendee();
    let b0 = f.book(kid, a, 1);
    let b1 = f.book(kid, b, 2);
    let b2 = f.book(kid, c, 0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[b1]));
    assert_eq!(outcome.blocked, set(&[b0, b2]));
}

#[test]
fn day_alignment() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(4, 8), at(4, 16))], 10);
    let o2 = f.occasion(&[(at(5, 8), at(5, 16)), (at(6, 8), at(6, 12))], 10);
    let o3 = f.occasion(&[(at(6, 13), at(6, 16))], 10);
    let kid = f.attendee();
    for o in [o1, o2, o3] {
        f.book(kid, o, 0);
    }

    // o2 and o3 don't overlap, but share a day
    assert_eq!(f.run().accepted.len(), 3);
    f.snapshot.period.alignment = Some(Alignment::Day);
    assert_eq!(f.run().accepted.len(), 2);
}

#[test]
fn split_day_occasion_does_not_block_itself() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(4, 8), at(4, 16))], 10);
    let o2 = f.occasion(&[(at(5, 8), at(5, 12)), (at(5, 13), at(5, 16))], 10);
    let kid = f.attendee();
    f.book(kid, o1, 0);
    f.book(kid, o2, 0);

    assert_eq!(f.run().accepted.len(), 2);
    f.snapshot.period.alignment = Some(Alignment::Day);
    assert_eq!(f.run().accepted.len(), 2);
}

#[test]
fn multi_day_alignment() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(4, 8), at(5, 16))], 10);
    let o2 = f.occasion(&[(at(5, 17), at(5, 18))], 10);
    let kid = f.attendee();
    f.book(kid, o1, 0);
    f.book(kid, o2, 0);

    assert_eq!(f.run().accepted.len(), 2);
    f.snapshot.period.alignment = Some(Alignment::Day);
    assert_eq!(f.run().accepted.len(), 1);
}

#[test]
fn anti_affinity_groups() {
    let mut f = Fixture::new();
    let foo = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let bar = f.occasion(&[(at(1, 8), at(1, 16))], 10);
    let kid = f.attendee();
    f.book(kid, foo, 0);
    f.book(kid, bar, 1);

    assert_eq!(f.run().accepted.len(), 2);

    f.occasion_mut(foo).anti_affinity_group = Some("xyz".into());
    f.occasion_mut(bar).anti_affinity_group = Some("zyx".into());
    assert_eq!(f.run().accepted.len(), 2);

    f.occasion_mut(bar).anti_affinity_group = Some("xyz".into());
    assert_eq!(f.run().accepted.len(), 1);

    // the group wins over the exclusion flag
    f.occasion_mut(foo).exclude_from_overlap_check = true;
    f.occasion_mut(bar).exclude_from_overlap_check = true;
    assert_eq!(f.run().accepted.len(), 1);
}

// ── Capacity and priority ────────────────────────────────

#[test]
fn accept_highest_priority() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 2);
    let tick = f.attendee();
    let trick = f.attendee();
    let track = f.attendee();
    let b0 = f.book(tick, o, 0);
    let b1 = f.book(trick, o, 1);
    let b2 = f.book(track, o, 1);

    let outcome = f.run_with(&stable_options()).unwrap();
    assert_eq!(outcome.open, set(&[b0]));
    assert_eq!(outcome.accepted, set(&[b1, b2]));
    assert!(outcome.blocked.is_empty());
}

#[test]
fn equal_scores_evict_first_in_booking_order() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 2);
    let tick = f.attendee();
    let trick = f.attendee();
    let track = f.attendee();
    let b0 = f.book(tick, o, 0);
    let b1 = f.book(trick, o, 0);
    let b2 = f.book(track, o, 1);

    let outcome = f.run();
    assert_eq!(outcome.open, set(&[b0]));
    assert_eq!(outcome.accepted, set(&[b1, b2]));
}

#[test]
fn eviction_policies_converge_with_different_churn() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 2);
    let x = f.attendee();
    let y = f.attendee();
    let z = f.attendee();
    let b_mid = f.book_in(x, o, 2, BookingState::Accepted);
    let b_low = f.book_in(y, o, 1, BookingState::Accepted);
    let b_new = f.book(z, o, 3);

    // b_mid is evicted first, then comes back at b_low's expense
    let first = f.run();
    assert_eq!(first.accepted, set(&[b_mid, b_new]));
    assert_eq!(first.open, set(&[b_low]));
    assert_eq!(first.evictions, 2);

    let weakest = f
        .run_with(&MatchOptions {
            eviction: EvictionPolicy::Weakest,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(weakest.accepted, set(&[b_mid, b_new]));
    assert_eq!(weakest.open, set(&[b_low]));
    assert_eq!(weakest.evictions, 1);
}

// ── Limits ───────────────────────────────────────────────

fn four_days(f: &mut Fixture) -> [Ulid; 4] {
    [0, 1, 2, 3].map(|day| f.occasion(&[(at(day, 8), at(day, 16))], 10))
}

#[test]
fn booking_limit() {
    let mut f = Fixture::new();
    let occasions = four_days(&mut f);
    let tom = f.attendee();
    let bookings = occasions.map(|o| f.book(tom, o, 0));

    for limit in 1..=4u32 {
        f.snapshot.period.max_bookings_per_attendee = Some(limit);
        let outcome = f.run();
        assert!(outcome.open.is_empty());
        assert_eq!(outcome.accepted, set(&bookings[..limit as usize]), "limit {limit}");
        assert_eq!(outcome.blocked, set(&bookings[limit as usize..]), "limit {limit}");
    }
}

#[test]
fn booking_limit_takes_highest_priority() {
    let mut f = Fixture::new();
    let [o1, o2, o3, o4] = four_days(&mut f);
    let tom = f.attendee();
    let b0 = f.book(tom, o1, 0);
    let b1 = f.book(tom, o2, 0);
    let b2 = f.book(tom, o3, 1);
    let b3 = f.book(tom, o4, 0);
    f.snapshot.period.max_bookings_per_attendee = Some(1);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[b2]));
    assert_eq!(outcome.blocked, set(&[b0, b1, b3]));
}

#[test]
fn booking_limit_with_two_attendees() {
    let mut f = Fixture::new();
    let [o1, o2, o3, _] = four_days(&mut f);
    let tom = f.attendee();
    let harry = f.attendee();
    let t0 = f.book(tom, o1, 2);
    let t1 = f.book(tom, o2, 1);
    f.book(tom, o3, 0);
    f.book(harry, o1, 0);
    let h1 = f.book(harry, o2, 2);
    let h2 = f.book(harry, o3, 1);

    f.snapshot.period.max_bookings_per_attendee = Some(1);
    let outcome = f.run_with(&stable_options()).unwrap();
    assert!(outcome.open.is_empty());
    assert_eq!(outcome.accepted, set(&[t0, h1]));
    assert_eq!(outcome.blocked.len(), 4);

    f.snapshot.period.max_bookings_per_attendee = Some(2);
    let outcome = f.run_with(&stable_options()).unwrap();
    assert!(outcome.open.is_empty());
    assert_eq!(outcome.accepted, set(&[t0, t1, h1, h2]));
    assert_eq!(outcome.blocked.len(), 2);
}

#[test]
fn attendee_limits_apply_without_period_limit() {
    let mut f = Fixture::new();
    let [o1, o2, _, _] = four_days(&mut f);
    let tom = f.attendee();
    let dick = f.attendee();
    let harry = f.attendee();
    f.attendee_mut(tom).limit = Some(1);
    f.attendee_mut(dick).limit = Some(1);
    f.attendee_mut(harry).limit = Some(2);

    let t0 = f.book(tom, o1, 1);
    f.book(tom, o2, 0);
    let d0 = f.book(dick, o1, 1);
    f.book(dick, o2, 0);
    let h0 = f.book(harry, o1, 1);
    let h1 = f.book(harry, o2, 0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[t0, d0, h0, h1]));

    // the period limit overrides the attendee's own
    f.snapshot.period.max_bookings_per_attendee = Some(1);
    assert_eq!(f.run().accepted, set(&[t0, d0, h0]));
}

#[test]
fn zero_period_limit_falls_back_to_attendee_limit() {
    let mut f = Fixture::new();
    let [o1, o2, o3, _] = four_days(&mut f);
    let tom = f.attendee();
    f.attendee_mut(tom).limit = Some(1);
    let first = f.book(tom, o1, 2);
    f.book(tom, o2, 1);
    f.book(tom, o3, 0);
    f.snapshot.period.max_bookings_per_attendee = Some(0);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[first]));
    assert_eq!(outcome.blocked.len(), 2);
}

#[test]
fn eviction_reopens_limit_blocked_wishes() {
    // a two-day occasion for one person, plus two single days
    let mut f = Fixture::new();
    let long = f.occasion(&[(at(0, 8), at(1, 16))], 1);
    let second = f.occasion(&[(at(1, 8), at(1, 16))], 1);
    let third = f.occasion(&[(at(2, 8), at(2, 16))], 1);
    let abed = f.attendee();
    let evil = f.attendee();
    f.book(abed, long, 0);
    f.book(abed, second, 1);
    f.book(abed, third, 2);
    f.book(evil, long, 3);
    f.book(evil, second, 4);
    f.book(evil, third, 5);
    f.snapshot.period.max_bookings_per_attendee = Some(2);

    assert_eq!(f.run().accepted.len(), 3);
}

// ── Scoring ──────────────────────────────────────────────

#[test]
fn organiser_children_win_ties() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 1);
    let regular = f.attendee();
    let organiser = f.attendee();
    f.attendee_mut(organiser).organiser_child = true;
    let b_regular = f.book(regular, o, 0);
    let b_organiser = f.book(organiser, o, 0);

    assert_eq!(f.run().accepted, set(&[b_regular]));

    let options = MatchOptions {
        scoring: Scoring::default().with(PreferOrganiserChildren),
        ..Default::default()
    };
    let outcome = f.run_with(&options).unwrap();
    assert_eq!(outcome.accepted, set(&[b_organiser]));
    assert_eq!(outcome.open, set(&[b_regular]));
}

#[test]
fn age_bracket_prefers_fitting_attendee() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 1);
    f.occasion_mut(o).age = Some(AgeRange { min: 8, max: 10 });
    let older = f.attendee();
    let fitting = f.attendee();
    f.attendee_mut(older).age = Some(14);
    f.attendee_mut(fitting).age = Some(9);
    f.book(older, o, 0);
    let b_fitting = f.book(fitting, o, 0);

    let options = MatchOptions {
        scoring: Scoring::from_settings(&ScoringSettings {
            prefer_in_age_bracket: true,
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(f.run_with(&options).unwrap().accepted, set(&[b_fitting]));
}

// ── Reruns ───────────────────────────────────────────────

#[test]
fn rerun_is_idempotent() {
    let mut f = Fixture::new();
    let [o1, o2, o3, _] = four_days(&mut f);
    let small = f.occasion(&[(at(1, 9), at(1, 10))], 1);
    for priority in 0..4 {
        let kid = f.attendee();
        f.book(kid, o1, priority);
        f.book(kid, o2, 3 - priority);
        f.book(kid, small, priority % 2);
        f.book(kid, o3, 1);
    }

    let first = f.run();
    f.apply(&first);
    let second = f.run();

    assert_eq!(second.open, first.open);
    assert_eq!(second.accepted, first.accepted);
    assert_eq!(second.blocked, first.blocked);
    assert_eq!(second.acceptances, 0);
    assert_eq!(second.evictions, 0);
}

#[test]
fn open_booking_conflicting_with_carried_acceptance_is_blocked() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let o2 = f.occasion(&[(at(0, 12), at(0, 18))], 10);
    let kid = f.attendee();
    let kept = f.book_in(kid, o1, 0, BookingState::Accepted);
    let late = f.book(kid, o2, 5);

    let outcome = f.run();
    assert_eq!(outcome.accepted, set(&[kept]));
    assert_eq!(outcome.blocked, set(&[late]));
}

#[test]
fn denied_and_cancelled_bookings_are_ignored() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let kid = f.attendee();
    let denied = f.book_in(kid, o, 0, BookingState::Denied);
    let cancelled = f.book_in(kid, o, 0, BookingState::Cancelled);

    let outcome = f.run();
    assert_eq!(outcome.state_of(&denied), None);
    assert_eq!(outcome.state_of(&cancelled), None);
    assert_eq!(outcome.passes, 0);
}

// ── Errors ───────────────────────────────────────────────

#[test]
fn unknown_occasion_is_reported() {
    let mut f = Fixture::new();
    let kid = f.attendee();
    let ghost = Ulid::from(9_999u128);
    let booking = f.book(kid, ghost, 0);

    let err = f.run_with(&MatchOptions::default()).unwrap_err();
    assert!(matches!(err, MatchError::OccasionNotFound { booking: b, occasion } if b == booking && occasion == ghost));

    // bookings the engine never reads can point anywhere
    f.snapshot.bookings[0].state = BookingState::Cancelled;
    assert!(f.run_with(&MatchOptions::default()).is_ok());
}

#[test]
fn unknown_attendee_is_reported() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let ghost = Ulid::from(9_999u128);
    f.book(ghost, o, 0);

    let err = f.run_with(&MatchOptions::default()).unwrap_err();
    assert!(matches!(err, MatchError::AttendeeNotFound { attendee, .. } if attendee == ghost));
}

#[test]
fn loaded_over_capacity_is_reported() {
    let mut f = Fixture::new();
    let o = f.occasion(&[(at(0, 8), at(0, 16))], 1);
    for _ in 0..2 {
        let kid = f.attendee();
        f.book_in(kid, o, 0, BookingState::Accepted);
    }

    let err = f.run_with(&MatchOptions::default()).unwrap_err();
    assert!(matches!(err, MatchError::CapacityExceeded { accepted: 2, max: 1, .. }));
}

#[test]
fn overlapping_loaded_acceptances_fail_validity_check() {
    let mut f = Fixture::new();
    let o1 = f.occasion(&[(at(0, 8), at(0, 16))], 10);
    let o2 = f.occasion(&[(at(0, 12), at(0, 18))], 10);
    let kid = f.attendee();
    f.book_in(kid, o1, 0, BookingState::Accepted);
    f.book_in(kid, o2, 0, BookingState::Accepted);

    let err = f.run_with(&MatchOptions::default()).unwrap_err();
    assert!(matches!(err, MatchError::InvariantViolation(_)));

    let lenient = MatchOptions {
        validity_check: false,
        ..Default::default()
    };
    assert_eq!(f.run_with(&lenient).unwrap().accepted.len(), 2);
}

#[test]
fn loop_budget() {
    let mut budget = LoopBudget::new(0);
    assert_eq!(budget.max_ticks(), 1);
    assert!(!budget.limit_reached());
    assert!(budget.limit_reached());

    let mut budget = LoopBudget::new(3);
    assert!((0..3).all(|_| !budget.limit_reached()));
    assert!(budget.limit_reached());
}

// ── Stability ────────────────────────────────────────────

fn held(attendee: u128, booking: u128, occasion: Ulid, score: f64) -> AttendeeAgent {
    let b = MatchableBooking {
        id: Ulid::from(booking),
        attendee_id: Ulid::from(attendee),
        occasion_id: occasion,
        priority: 0,
        score,
        state: BookingState::Accepted,
        dates: vec![Span::new(at(0, attendee as i64), at(0, attendee as i64 + 1))],
        exclude_from_overlap_check: false,
        anti_affinity_group: None,
    };
    AttendeeAgent::new(Ulid::from(attendee), vec![b], None, OverlapRules::default())
}

#[test]
fn cascade_of_priorities_is_stable() {
    let mut f = Fixture::new();
    let a = f.occasion(&[(at(0, 10), at(0, 11))], 10);
    let b = f.occasion(&[(at(0, 11), at(0, 12))], 10);
    let c = f.occasion(&[(at(0, 13), at(0, 14))], 10);
    let kid = f.attendee();
    f.book(kid, a, 2);
    f.book(kid, b, 1);
    f.book(kid, c, 0);

    assert_eq!(f.run_with(&stable_options()).unwrap().accepted.len(), 3);
}

#[test]
fn swap_chain_is_unstable() {
    let mut f = Fixture::new();
    let first = f.occasion(&[(at(0, 8), at(0, 9))], 2);
    let second = f.occasion(&[(at(0, 10), at(0, 11))], 2);
    let occasions: Vec<Occasion> = f.snapshot.occasions.clone();

    // `first` holds 3 and 1, `second` holds 5 and 2
    let agents: BTreeMap<Ulid, AttendeeAgent> = [
        held(1, 11, first, 3.0),
        held(2, 12, first, 1.0),
        held(3, 13, second, 5.0),
        held(4, 14, second, 2.0),
    ]
    .into_iter()
    .map(|a| (a.id(), a))
    .collect();

    let build = |agents: &BTreeMap<Ulid, AttendeeAgent>| -> BTreeMap<Ulid, OccasionAgent> {
        occasions
            .iter()
            .map(|o| (o.id, OccasionAgent::new(o, agents, EvictionPolicy::FirstWeaker).unwrap()))
            .collect()
    };

    assert!(!is_stable(&agents, &build(&agents)));

    // without a weaker holder to fall back on the chain breaks
    let agents: BTreeMap<Ulid, AttendeeAgent> = [held(1, 11, first, 3.0), held(3, 13, second, 5.0)]
        .into_iter()
        .map(|a| (a.id(), a))
        .collect();
    assert!(is_stable(&agents, &build(&agents)));
}

// ── Properties ───────────────────────────────────────────

#[derive(Debug, Clone)]
struct RandomPeriod {
    /// (day, start hour, hours, max spots)
    occasions: Vec<(i64, i64, i64, u32)>,
    /// per attendee: (occasion index, priority)
    wishes: Vec<Vec<(usize, i32)>>,
    limit: Option<u32>,
    minutes_between: u32,
}

fn random_period() -> impl Strategy<Value = RandomPeriod> {
    let occasions = prop::collection::vec((0i64..4, 0i64..20, 1i64..5, 1u32..4), 1..7);
    occasions.prop_flat_map(|occasions| {
        let n = occasions.len();
        let wishes = prop::collection::vec(prop::collection::btree_map(0..n, 0i32..4, 0..=n), 1..8)
            .prop_map(|attendees: Vec<BTreeMap<usize, i32>>| -> Vec<Vec<(usize, i32)>> {
                attendees.into_iter().map(|w| w.into_iter().collect()).collect()
            });
        (
            Just(occasions),
            wishes,
            prop::option::of(0u32..4),
            prop::sample::select(vec![0u32, 30, 90]),
        )
            .prop_map(|(occasions, wishes, limit, minutes_between)| RandomPeriod {
                occasions,
                wishes,
                limit,
                minutes_between,
            })
    })
}

impl RandomPeriod {
    fn fixture(&self) -> Fixture {
        let mut f = Fixture::new();
        f.snapshot.period.max_bookings_per_attendee = self.limit;
        f.snapshot.period.minutes_between = self.minutes_between;
        let occasions: Vec<Ulid> = self
            .occasions
            .iter()
            .map(|(day, hour, hours, spots)| f.occasion(&[(at(*day, *hour), at(*day, hour + hours))], *spots))
            .collect();
        for wishes in &self.wishes {
            let kid = f.attendee();
            for (occasion, priority) in wishes {
                f.book(kid, occasions[*occasion], *priority);
            }
        }
        f
    }
}

proptest! {
    #[test]
    fn accepted_bookings_never_overlap(period in random_period()) {
        let f = period.fixture();
        let outcome = f.run();
        let rules = OverlapRules::for_period(&f.snapshot.period);
        let occasions: BTreeMap<Ulid, &Occasion> = f.snapshot.occasions.iter().map(|o| (o.id, o)).collect();

        let accepted: Vec<MatchableBooking> = f
            .snapshot
            .bookings
            .iter()
            .filter(|b| outcome.accepted.contains(&b.id))
            .map(|b| MatchableBooking::new(b, occasions[&b.occasion_id], 0.0))
            .collect();
        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                if a.attendee_id == b.attendee_id {
                    prop_assert!(!overlaps(a, b, &rules));
                }
            }
        }
    }

    #[test]
    fn occasions_stay_within_capacity(period in random_period()) {
        let f = period.fixture();
        let outcome = f.run();
        for occasion in &f.snapshot.occasions {
            let held = f
                .snapshot
                .bookings
                .iter()
                .filter(|b| b.occasion_id == occasion.id && outcome.accepted.contains(&b.id))
                .count();
            prop_assert!(held <= occasion.spots.max_spots());
        }
    }

    #[test]
    fn every_booking_ends_in_exactly_one_group(period in random_period()) {
        let f = period.fixture();
        let outcome = f.run();
        for booking in &f.snapshot.bookings {
            let hits = [&outcome.open, &outcome.accepted, &outcome.blocked]
                .iter()
                .filter(|group| group.contains(&booking.id))
                .count();
            prop_assert_eq!(hits, 1);
        }
        let total = outcome.open.len() + outcome.accepted.len() + outcome.blocked.len();
        prop_assert_eq!(total, f.snapshot.bookings.len());
    }

    #[test]
    fn second_run_changes_nothing(period in random_period()) {
        let mut f = period.fixture();
        let first = f.run();
        f.apply(&first);
        let second = f.run();
        prop_assert_eq!(&second.open, &first.open);
        prop_assert_eq!(&second.accepted, &first.accepted);
        prop_assert_eq!(&second.blocked, &first.blocked);
        prop_assert_eq!(second.acceptances, 0);
        prop_assert_eq!(second.evictions, 0);
    }

    #[test]
    fn loaded_order_does_not_matter(period in random_period()) {
        let f = period.fixture();
        let mut shuffled = period.fixture();
        shuffled.snapshot.occasions.reverse();
        shuffled.snapshot.attendees.reverse();
        shuffled.snapshot.bookings.reverse();
        prop_assert_eq!(f.run(), shuffled.run());
    }
}
