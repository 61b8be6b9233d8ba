use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Stretch to whole UTC days: floor the start, ceil the end.
    pub fn align_to_day(&self) -> Span {
        let start = self.start.div_euclid(DAY_MS) * DAY_MS;
        let end = (self.end + DAY_MS - 1).div_euclid(DAY_MS) * DAY_MS;
        Span { start, end }
    }

    /// Extend the end by `ms` (transfer time after an occasion).
    pub fn extend_end(&self, ms: Ms) -> Span {
        Span {
            start: self.start,
            end: self.end + ms,
        }
    }
}

/// How occasion dates are stretched before the overlap test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Day,
}

/// Half-open capacity range `[lower, upper)`; the usable maximum is `upper - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRange {
    pub lower: u32,
    pub upper: u32,
}

impl SpotRange {
    pub fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }

    pub fn max_spots(&self) -> usize {
        self.upper.saturating_sub(1) as usize
    }

    pub fn min_spots(&self) -> usize {
        self.lower as usize
    }
}

/// Inclusive age bracket of an occasion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeRange {
    /// Years between `age` and the closest edge of the bracket (0 when inside).
    pub fn distance(&self, age: u32) -> u32 {
        if age < self.min {
            self.min - age
        } else if age > self.max {
            age - self.max
        } else {
            0
        }
    }
}

/// Scoping key of one matching run plus its matching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: Ulid,
    pub title: String,
    /// Overrides the per-attendee limits when set.
    #[serde(default)]
    pub max_bookings_per_attendee: Option<u32>,
    #[serde(default)]
    pub minutes_between: u32,
    #[serde(default)]
    pub alignment: Option<Alignment>,
}

impl Period {
    pub fn new(id: Ulid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            max_bookings_per_attendee: None,
            minutes_between: 0,
            alignment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub organiser_child: bool,
    #[serde(default)]
    pub admin_child: bool,
}

impl Attendee {
    pub fn new(id: Ulid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            limit: None,
            age: None,
            organiser_child: false,
            admin_child: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occasion {
    pub id: Ulid,
    pub period_id: Ulid,
    pub title: String,
    /// Never empty; each date is a half-open span.
    pub dates: Vec<Span>,
    pub spots: SpotRange,
    #[serde(default)]
    pub age: Option<AgeRange>,
    #[serde(default)]
    pub exclude_from_overlap_check: bool,
    #[serde(default)]
    pub anti_affinity_group: Option<String>,
}

impl Occasion {
    pub fn new(id: Ulid, period_id: Ulid, title: impl Into<String>, dates: Vec<Span>, spots: SpotRange) -> Self {
        Self {
            id,
            period_id,
            title: title.into(),
            dates,
            spots,
            age: None,
            exclude_from_overlap_check: false,
            anti_affinity_group: None,
        }
    }

    pub fn is_full(&self, accepted: usize) -> bool {
        accepted >= self.spots.max_spots()
    }

    pub fn is_operable(&self, accepted: usize) -> bool {
        accepted >= self.spots.min_spots()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingState {
    Open,
    Accepted,
    Blocked,
    Denied,
    Cancelled,
}

impl BookingState {
    /// States the matching engine reads and writes; everything else is invisible to it.
    pub fn is_matchable(&self) -> bool {
        matches!(self, BookingState::Open | BookingState::Accepted | BookingState::Blocked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub attendee_id: Ulid,
    pub occasion_id: Ulid,
    #[serde(default)]
    pub priority: i32,
    pub state: BookingState,
}

impl Booking {
    pub fn new(id: Ulid, attendee_id: Ulid, occasion_id: Ulid, priority: i32, state: BookingState) -> Self {
        Self {
            id,
            attendee_id,
            occasion_id,
            priority,
            state,
        }
    }
}

/// Flat event types; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PeriodCreated(Period),
    OccasionCreated(Occasion),
    AttendeeCreated(Attendee),
    BookingCreated(Booking),
    BookingPriorityChanged {
        id: Ulid,
        priority: i32,
    },
    BookingCancelled {
        id: Ulid,
    },
    /// Outcome of one matching run. One record, so a torn write drops the whole run.
    StatesAssigned {
        period_id: Ulid,
        open: Vec<Ulid>,
        accepted: Vec<Ulid>,
        blocked: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccasionSummary {
    pub id: Ulid,
    pub title: String,
    pub accepted: usize,
    pub max_spots: usize,
    pub operable: bool,
    pub full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub attendee_id: Ulid,
    pub occasion_id: Ulid,
    pub priority: i32,
    pub state: BookingState,
}
