use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::{Occasion, SpotRange};

use super::attendee::AttendeeAgent;
use super::MatchError;

/// Which holder a full occasion gives up for a stronger candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// The first holder (by booking id) scoring below the candidate.
    #[default]
    FirstWeaker,
    /// The lowest scoring holder; ties go to the lowest booking id.
    Weakest,
}

/// Result of offering one booking to an occasion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Taken into a free spot.
    Accepted,
    /// Taken by evicting the given booking.
    Displaced(Ulid),
    Rejected,
}

/// The occasion's side of the matching: holds accepted bookings up to capacity
/// and trades a holder for a better scoring candidate once full.
#[derive(Debug, Clone)]
pub struct OccasionAgent {
    id: Ulid,
    spots: SpotRange,
    policy: EvictionPolicy,
    /// Accepted booking id → score.
    bookings: BTreeMap<Ulid, f64>,
    /// Accepted booking id → owning attendee.
    attendees: BTreeMap<Ulid, Ulid>,
}

impl OccasionAgent {
    /// Pick up the occasion's accepted bookings from the attendee agents, which
    /// therefore have to be built first.
    pub fn new(
        occasion: &Occasion,
        agents: &BTreeMap<Ulid, AttendeeAgent>,
        policy: EvictionPolicy,
    ) -> Result<Self, MatchError> {
        let mut agent = Self {
            id: occasion.id,
            spots: occasion.spots,
            policy,
            bookings: BTreeMap::new(),
            attendees: BTreeMap::new(),
        };

        for attendee in agents.values() {
            for booking in attendee.accepted().filter(|b| b.occasion_id == occasion.id) {
                agent.bookings.insert(booking.id, booking.score);
                agent.attendees.insert(booking.id, attendee.id());
            }
        }

        if agent.bookings.len() > agent.max_spots() {
            return Err(MatchError::CapacityExceeded {
                occasion: occasion.id,
                accepted: agent.bookings.len(),
                max: agent.max_spots(),
            });
        }

        Ok(agent)
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn max_spots(&self) -> usize {
        self.spots.max_spots()
    }

    pub fn holds(&self, booking_id: &Ulid) -> bool {
        self.bookings.contains_key(booking_id)
    }

    pub fn booking_ids(&self) -> impl Iterator<Item = &Ulid> {
        self.bookings.keys()
    }

    /// Enough accepted bookings for the occasion to take place.
    pub fn operable(&self) -> bool {
        self.bookings.len() >= self.spots.min_spots()
    }

    pub fn full(&self) -> bool {
        self.bookings.len() >= self.max_spots()
    }

    /// Score of a held booking.
    pub fn score(&self, booking_id: &Ulid) -> Option<f64> {
        self.bookings.get(booking_id).copied()
    }

    /// The holder a candidate with `score` would displace, with its score.
    pub fn preferred(&self, score: f64) -> Option<(Ulid, f64)> {
        let mut weaker = self
            .bookings
            .iter()
            .filter(|(_, held)| **held < score)
            .map(|(id, held)| (*id, *held));
        match self.policy {
            EvictionPolicy::FirstWeaker => weaker.next(),
            EvictionPolicy::Weakest => weaker.min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))),
        }
    }

    /// Offer `booking_id` (from `attendee_id`'s wishlist) to this occasion.
    pub fn match_booking(
        &mut self,
        agents: &mut BTreeMap<Ulid, AttendeeAgent>,
        attendee_id: Ulid,
        booking_id: Ulid,
    ) -> Result<Verdict, MatchError> {
        let score = agents
            .get(&attendee_id)
            .and_then(|agent| agent.booking(&booking_id))
            .map(|booking| booking.score)
            .ok_or_else(|| {
                MatchError::InvariantViolation(format!(
                    "booking {booking_id} is not known to attendee {attendee_id}"
                ))
            })?;

        // as long as there are spots, accept unconditionally
        if !self.full() {
            self.accept(agents, attendee_id, booking_id, score)?;
            return Ok(Verdict::Accepted);
        }

        let Some((over, _)) = self.preferred(score) else {
            return Ok(Verdict::Rejected);
        };
        self.deny(agents, over)?;
        self.accept(agents, attendee_id, booking_id, score)?;
        Ok(Verdict::Displaced(over))
    }

    fn accept(
        &mut self,
        agents: &mut BTreeMap<Ulid, AttendeeAgent>,
        attendee_id: Ulid,
        booking_id: Ulid,
        score: f64,
    ) -> Result<(), MatchError> {
        let agent = agents
            .get_mut(&attendee_id)
            .ok_or_else(|| MatchError::InvariantViolation(format!("no agent for attendee {attendee_id}")))?;
        self.bookings.insert(booking_id, score);
        self.attendees.insert(booking_id, attendee_id);
        agent.accept(booking_id);
        Ok(())
    }

    fn deny(&mut self, agents: &mut BTreeMap<Ulid, AttendeeAgent>, booking_id: Ulid) -> Result<(), MatchError> {
        let owner = self
            .attendees
            .remove(&booking_id)
            .ok_or_else(|| MatchError::InvariantViolation(format!("booking {booking_id} has no owner")))?;
        self.bookings.remove(&booking_id);
        let agent = agents
            .get_mut(&owner)
            .ok_or_else(|| MatchError::InvariantViolation(format!("no agent for attendee {owner}")))?;
        agent.deny(booking_id);
        Ok(())
    }
}

impl PartialEq for OccasionAgent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OccasionAgent {}
