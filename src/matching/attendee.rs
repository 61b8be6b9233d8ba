use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use ulid::Ulid;

use crate::model::BookingState;

use super::overlap::{overlaps, unblockable, OverlapRules};
use super::MatchableBooking;

/// Wishlist order: highest priority first, ties by ascending booking id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct WishKey {
    priority: Reverse<i32>,
    id: Ulid,
}

impl WishKey {
    fn of(booking: &MatchableBooking) -> Self {
        Self {
            priority: Reverse(booking.priority),
            id: booking.id,
        }
    }
}

/// Acts on behalf of one attendee, trying to get a stable set of bookings.
///
/// Every booking the agent was built with sits in exactly one of `wishlist`,
/// `accepted` or `blocked` for the whole run.
#[derive(Debug, Clone)]
pub struct AttendeeAgent {
    id: Ulid,
    limit: Option<u32>,
    rules: OverlapRules,
    bookings: BTreeMap<Ulid, MatchableBooking>,
    wishlist: BTreeSet<WishKey>,
    accepted: BTreeSet<Ulid>,
    blocked: BTreeSet<Ulid>,
}

impl AttendeeAgent {
    /// Partition the attendee's bookings by their loaded state.
    ///
    /// Blocked bookings are carried over as they are. Open bookings that already
    /// conflict with a carried-over acceptance (or exceed the limit) start out
    /// blocked instead of on the wishlist. A limit of zero means no limit.
    pub fn new(id: Ulid, bookings: Vec<MatchableBooking>, limit: Option<u32>, rules: OverlapRules) -> Self {
        let mut agent = Self {
            id,
            limit: limit.filter(|l| *l > 0),
            rules,
            bookings: BTreeMap::new(),
            wishlist: BTreeSet::new(),
            accepted: BTreeSet::new(),
            blocked: BTreeSet::new(),
        };

        let mut open = Vec::new();
        for booking in bookings {
            match booking.state {
                BookingState::Accepted => {
                    agent.accepted.insert(booking.id);
                }
                BookingState::Blocked => {
                    agent.blocked.insert(booking.id);
                }
                BookingState::Open => open.push(booking.id),
                BookingState::Denied | BookingState::Cancelled => continue,
            }
            agent.bookings.insert(booking.id, booking);
        }

        for booking_id in open {
            if agent.limit_reached() || agent.conflicts_with_accepted(&booking_id) {
                agent.blocked.insert(booking_id);
            } else if let Some(booking) = agent.bookings.get(&booking_id) {
                agent.wishlist.insert(WishKey::of(booking));
            }
        }

        agent
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn booking(&self, id: &Ulid) -> Option<&MatchableBooking> {
        self.bookings.get(id)
    }

    pub fn has_wishes(&self) -> bool {
        !self.wishlist.is_empty()
    }

    /// Open bookings in proposal order.
    pub fn wishlist(&self) -> impl Iterator<Item = &MatchableBooking> {
        self.wishlist.iter().filter_map(|key| self.bookings.get(&key.id))
    }

    pub fn wishlist_ids(&self) -> BTreeSet<Ulid> {
        self.wishlist.iter().map(|key| key.id).collect()
    }

    pub fn accepted_ids(&self) -> &BTreeSet<Ulid> {
        &self.accepted
    }

    pub fn blocked_ids(&self) -> &BTreeSet<Ulid> {
        &self.blocked
    }

    pub fn accepted(&self) -> impl Iterator<Item = &MatchableBooking> {
        self.accepted.iter().filter_map(|id| self.bookings.get(id))
    }

    pub fn blocked(&self) -> impl Iterator<Item = &MatchableBooking> {
        self.blocked.iter().filter_map(|id| self.bookings.get(id))
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.accepted.len() >= limit as usize)
    }

    fn conflicts_with_accepted(&self, booking_id: &Ulid) -> bool {
        let Some(booking) = self.bookings.get(booking_id) else {
            return false;
        };
        self.accepted()
            .any(|accepted| accepted.id != booking.id && overlaps(accepted, booking, &self.rules))
    }

    /// Move a wishlist booking to `accepted`, then block whatever it rules out.
    pub fn accept(&mut self, booking_id: Ulid) {
        let Some(booking) = self.bookings.get(&booking_id) else {
            debug_assert!(false, "accept: unknown booking {booking_id}");
            return;
        };
        let removed = self.wishlist.remove(&WishKey::of(booking));
        debug_assert!(removed, "accept: booking {booking_id} is not on the wishlist");
        self.accepted.insert(booking_id);

        let newly_blocked: Vec<WishKey> = if self.limit_reached() {
            self.wishlist.iter().copied().collect()
        } else {
            self.wishlist
                .iter()
                .filter(|key| {
                    self.bookings
                        .get(&key.id)
                        .is_some_and(|other| overlaps(booking, other, &self.rules))
                })
                .copied()
                .collect()
        };

        for key in newly_blocked {
            self.wishlist.remove(&key);
            self.blocked.insert(key.id);
        }
    }

    /// Evict an accepted booking back onto the wishlist.
    ///
    /// Afterwards every blocked booking is re-tested against what is still
    /// accepted; the ones nothing blocks any more return to the wishlist too.
    pub fn deny(&mut self, booking_id: Ulid) {
        let removed = self.accepted.remove(&booking_id);
        debug_assert!(removed, "deny: booking {booking_id} is not accepted");
        let Some(booking) = self.bookings.get(&booking_id) else {
            return;
        };
        self.wishlist.insert(WishKey::of(booking));

        let accepted: Vec<&MatchableBooking> = self.accepted().collect();
        let blocked: Vec<&MatchableBooking> = self.blocked().collect();
        let released = unblockable(&accepted, &blocked, &self.rules);

        for id in released {
            self.blocked.remove(&id);
            if let Some(booking) = self.bookings.get(&id) {
                self.wishlist.insert(WishKey::of(booking));
            }
        }
    }

    /// False if two accepted bookings conflict. Never expected; a safety net.
    pub fn is_valid(&self) -> bool {
        let accepted: Vec<&MatchableBooking> = self.accepted().collect();
        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                if overlaps(a, b, &self.rules) {
                    return false;
                }
            }
        }
        true
    }
}

impl PartialEq for AttendeeAgent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AttendeeAgent {}

impl Hash for AttendeeAgent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
