use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;

use super::{BookingStore, PeriodSnapshot, StateUpdate, StoreError};

/// Tables plus the two indexes a period load needs.
pub struct InMemoryStore {
    periods: DashMap<Ulid, Period>,
    occasions: DashMap<Ulid, Occasion>,
    attendees: DashMap<Ulid, Attendee>,
    bookings: DashMap<Ulid, Booking>,
    /// period id → occasion ids
    period_occasions: DashMap<Ulid, Vec<Ulid>>,
    /// occasion id → booking ids
    occasion_bookings: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_text(text: &str, max: usize, what: &'static str) -> Result<(), StoreError> {
    if text.len() > max {
        return Err(StoreError::Invalid(what));
    }
    Ok(())
}

fn validate_span(span: &Span) -> Result<(), StoreError> {
    if span.start >= span.end {
        return Err(StoreError::Invalid("date ends before it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(StoreError::Invalid("timestamp out of range"));
    }
    Ok(())
}

fn validate_occasion(occasion: &Occasion) -> Result<(), StoreError> {
    validate_text(&occasion.title, MAX_TITLE_LEN, "title too long")?;
    if occasion.dates.is_empty() {
        return Err(StoreError::Invalid("occasion has no dates"));
    }
    if occasion.dates.len() > MAX_DATES_PER_OCCASION {
        return Err(StoreError::Invalid("too many dates"));
    }
    for date in &occasion.dates {
        validate_span(date)?;
    }
    if occasion.spots.upper == 0 || occasion.spots.min_spots() > occasion.spots.max_spots() {
        return Err(StoreError::Invalid("inverted spot range"));
    }
    if let Some(age) = occasion.age
        && age.min > age.max {
            return Err(StoreError::Invalid("inverted age range"));
        }
    if let Some(group) = &occasion.anti_affinity_group {
        validate_text(group, MAX_GROUP_LEN, "anti-affinity group too long")?;
    }
    Ok(())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            periods: DashMap::new(),
            occasions: DashMap::new(),
            attendees: DashMap::new(),
            bookings: DashMap::new(),
            period_occasions: DashMap::new(),
            occasion_bookings: DashMap::new(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn period(&self, id: &Ulid) -> Option<Period> {
        self.periods.get(id).map(|e| e.value().clone())
    }

    pub fn occasion(&self, id: &Ulid) -> Option<Occasion> {
        self.occasions.get(id).map(|e| e.value().clone())
    }

    pub fn attendee(&self, id: &Ulid) -> Option<Attendee> {
        self.attendees.get(id).map(|e| e.value().clone())
    }

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Drop every table and index, ahead of re-applying a log.
    pub(crate) fn clear(&self) {
        self.periods.clear();
        self.occasions.clear();
        self.attendees.clear();
        self.bookings.clear();
        self.period_occasions.clear();
        self.occasion_bookings.clear();
    }

    fn period_of_booking(&self, booking: &Booking) -> Option<Ulid> {
        self.occasions.get(&booking.occasion_id).map(|o| o.period_id)
    }

    /// Occasion ids of a period in id order.
    fn occasion_ids(&self, period_id: &Ulid) -> Vec<Ulid> {
        let mut ids = self
            .period_occasions
            .get(period_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn bookings_of_occasion(&self, occasion_id: &Ulid) -> Vec<Booking> {
        self.occasion_bookings
            .get(occasion_id)
            .map(|ids| ids.iter().filter_map(|id| self.booking(id)).collect())
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    /// Reject an event that would break the store's references or limits.
    pub fn check_event(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::PeriodCreated(period) => {
                if self.periods.contains_key(&period.id) {
                    return Err(StoreError::AlreadyExists(period.id));
                }
                validate_text(&period.title, MAX_TITLE_LEN, "title too long")?;
                if period.minutes_between > MAX_MINUTES_BETWEEN {
                    return Err(StoreError::Invalid("minutes between too large"));
                }
            }
            Event::OccasionCreated(occasion) => {
                if self.occasions.contains_key(&occasion.id) {
                    return Err(StoreError::AlreadyExists(occasion.id));
                }
                if !self.periods.contains_key(&occasion.period_id) {
                    return Err(StoreError::NotFound(occasion.period_id));
                }
                if self.occasion_ids(&occasion.period_id).len() >= MAX_OCCASIONS_PER_PERIOD {
                    return Err(StoreError::Invalid("too many occasions in period"));
                }
                validate_occasion(occasion)?;
            }
            Event::AttendeeCreated(attendee) => {
                if self.attendees.contains_key(&attendee.id) {
                    return Err(StoreError::AlreadyExists(attendee.id));
                }
                validate_text(&attendee.name, MAX_NAME_LEN, "name too long")?;
            }
            Event::BookingCreated(booking) => {
                if self.bookings.contains_key(&booking.id) {
                    return Err(StoreError::AlreadyExists(booking.id));
                }
                if !self.attendees.contains_key(&booking.attendee_id) {
                    return Err(StoreError::NotFound(booking.attendee_id));
                }
                if !self.occasions.contains_key(&booking.occasion_id) {
                    return Err(StoreError::NotFound(booking.occasion_id));
                }
                let count = self.occasion_bookings.get(&booking.occasion_id).map_or(0, |ids| ids.len());
                if count >= MAX_BOOKINGS_PER_OCCASION {
                    return Err(StoreError::Invalid("too many bookings for occasion"));
                }
            }
            Event::BookingPriorityChanged { id, .. } | Event::BookingCancelled { id } => {
                if !self.bookings.contains_key(id) {
                    return Err(StoreError::NotFound(*id));
                }
            }
            Event::StatesAssigned { period_id, .. } => {
                if !self.periods.contains_key(period_id) {
                    return Err(StoreError::NotFound(*period_id));
                }
            }
        }
        Ok(())
    }

    /// Apply an event that already passed `check_event` (or comes from replay).
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::PeriodCreated(period) => {
                self.periods.insert(period.id, period.clone());
            }
            Event::OccasionCreated(occasion) => {
                self.period_occasions
                    .entry(occasion.period_id)
                    .or_default()
                    .push(occasion.id);
                self.occasions.insert(occasion.id, occasion.clone());
            }
            Event::AttendeeCreated(attendee) => {
                self.attendees.insert(attendee.id, attendee.clone());
            }
            Event::BookingCreated(booking) => {
                self.occasion_bookings
                    .entry(booking.occasion_id)
                    .or_default()
                    .push(booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingPriorityChanged { id, priority } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.priority = *priority;
                }
            }
            Event::BookingCancelled { id } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.state = BookingState::Cancelled;
                }
            }
            Event::StatesAssigned {
                period_id,
                open,
                accepted,
                blocked,
            } => {
                let changed = self.assign_states(period_id, open, BookingState::Open)
                    + self.assign_states(period_id, accepted, BookingState::Accepted)
                    + self.assign_states(period_id, blocked, BookingState::Blocked);
                debug!(%period_id, changed, "booking states assigned");
            }
        }
    }

    pub fn apply_checked(&self, event: &Event) -> Result<(), StoreError> {
        self.check_event(event)?;
        self.apply_event(event);
        Ok(())
    }

    /// Move bookings of `period_id` into `state`, returning how many changed.
    fn assign_states(&self, period_id: &Ulid, ids: &[Ulid], state: BookingState) -> usize {
        let mut changed = 0;
        for id in ids {
            let Some(mut booking) = self.bookings.get_mut(id) else {
                continue;
            };
            if !booking.state.is_matchable() || booking.state == state {
                continue;
            }
            if self.period_of_booking(&booking) != Some(*period_id) {
                continue;
            }
            booking.state = state;
            changed += 1;
        }
        changed
    }

    // ── Mutations ────────────────────────────────────────────

    pub fn create_period(&self, period: Period) -> Result<(), StoreError> {
        self.apply_checked(&Event::PeriodCreated(period))
    }

    pub fn create_occasion(&self, occasion: Occasion) -> Result<(), StoreError> {
        self.apply_checked(&Event::OccasionCreated(occasion))
    }

    pub fn create_attendee(&self, attendee: Attendee) -> Result<(), StoreError> {
        self.apply_checked(&Event::AttendeeCreated(attendee))
    }

    pub fn create_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.apply_checked(&Event::BookingCreated(booking))
    }

    pub fn set_priority(&self, id: Ulid, priority: i32) -> Result<(), StoreError> {
        self.apply_checked(&Event::BookingPriorityChanged { id, priority })
    }

    pub fn cancel_booking(&self, id: Ulid) -> Result<(), StoreError> {
        self.apply_checked(&Event::BookingCancelled { id })
    }

    /// Apply a catalog record by record. Stops at the first invalid record;
    /// everything before it stays.
    pub fn import(&self, catalog: Catalog) -> Result<usize, StoreError> {
        let events = catalog.into_events();
        for event in &events {
            self.apply_checked(event)?;
        }
        Ok(events.len())
    }

    // ── Queries ──────────────────────────────────────────────

    /// All bookings of a period, any state, in id order.
    pub fn bookings_in_period(&self, period_id: &Ulid) -> Vec<BookingInfo> {
        let mut bookings: Vec<BookingInfo> = self
            .occasion_ids(period_id)
            .iter()
            .flat_map(|occasion_id| self.bookings_of_occasion(occasion_id))
            .map(|b| BookingInfo {
                id: b.id,
                attendee_id: b.attendee_id,
                occasion_id: b.occasion_id,
                priority: b.priority,
                state: b.state,
            })
            .collect();
        bookings.sort_by_key(|b| b.id);
        bookings
    }

    pub fn occasion_summaries(&self, period_id: &Ulid) -> Result<Vec<OccasionSummary>, StoreError> {
        if !self.periods.contains_key(period_id) {
            return Err(StoreError::NotFound(*period_id));
        }
        let summaries = self
            .occasion_ids(period_id)
            .iter()
            .filter_map(|id| self.occasion(id))
            .map(|occasion| {
                let accepted = self
                    .bookings_of_occasion(&occasion.id)
                    .iter()
                    .filter(|b| b.state == BookingState::Accepted)
                    .count();
                OccasionSummary {
                    id: occasion.id,
                    title: occasion.title.clone(),
                    accepted,
                    max_spots: occasion.spots.max_spots(),
                    operable: occasion.is_operable(accepted),
                    full: occasion.is_full(accepted),
                }
            })
            .collect();
        Ok(summaries)
    }

    /// Priority-weighted share of an attendee's active bookings that got
    /// accepted, in `[0, 1]`. `None` without active bookings.
    pub fn attendee_happiness(&self, period_id: &Ulid, attendee_id: &Ulid) -> Option<f64> {
        let weight = |b: &BookingInfo| (b.priority.max(0) + 1) as f64;
        let active: Vec<BookingInfo> = self
            .bookings_in_period(period_id)
            .into_iter()
            .filter(|b| b.attendee_id == *attendee_id && b.state.is_matchable())
            .collect();
        if active.is_empty() {
            return None;
        }
        let total: f64 = active.iter().map(weight).sum();
        let accepted: f64 = active
            .iter()
            .filter(|b| b.state == BookingState::Accepted)
            .map(weight)
            .sum();
        Some(accepted / total)
    }

    /// Minimal event list recreating the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        fn sorted<T: Clone>(map: &DashMap<Ulid, T>) -> Vec<T> {
            let mut entries: Vec<(Ulid, T)> = map.iter().map(|e| (*e.key(), e.value().clone())).collect();
            entries.sort_by_key(|(id, _)| *id);
            entries.into_iter().map(|(_, v)| v).collect()
        }

        let mut events = Vec::new();
        events.extend(sorted(&self.periods).into_iter().map(Event::PeriodCreated));
        events.extend(sorted(&self.attendees).into_iter().map(Event::AttendeeCreated));
        events.extend(sorted(&self.occasions).into_iter().map(Event::OccasionCreated));
        // bookings carry their current state and priority
        events.extend(sorted(&self.bookings).into_iter().map(Event::BookingCreated));
        events
    }
}

impl BookingStore for InMemoryStore {
    fn load_period(&self, period_id: Ulid) -> Result<PeriodSnapshot, StoreError> {
        let period = self.period(&period_id).ok_or(StoreError::NotFound(period_id))?;

        let occasion_ids = self.occasion_ids(&period_id);
        let occasions: Vec<Occasion> = occasion_ids.iter().filter_map(|id| self.occasion(id)).collect();

        let mut bookings: Vec<Booking> = occasion_ids
            .iter()
            .flat_map(|id| self.bookings_of_occasion(id))
            .filter(|b| b.state.is_matchable())
            .collect();
        bookings.sort_by_key(|b| b.id);

        let mut attendee_ids: Vec<Ulid> = bookings.iter().map(|b| b.attendee_id).collect();
        attendee_ids.sort();
        attendee_ids.dedup();
        let attendees = attendee_ids.iter().filter_map(|id| self.attendee(id)).collect();

        Ok(PeriodSnapshot {
            period,
            occasions,
            attendees,
            bookings,
        })
    }

    fn apply_states(&self, period_id: Ulid, update: &StateUpdate) -> Result<(), StoreError> {
        self.apply_checked(&Event::StatesAssigned {
            period_id,
            open: update.open.clone(),
            accepted: update.accepted.clone(),
            blocked: update.blocked.clone(),
        })
    }
}
