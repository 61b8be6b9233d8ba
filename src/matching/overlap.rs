use ulid::Ulid;

use crate::model::*;

use super::MatchableBooking;

/// Period-wide settings that widen occasion dates before they are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapRules {
    /// Transfer time appended to the end of every date.
    pub minutes_between: u32,
    pub alignment: Option<Alignment>,
}

impl OverlapRules {
    pub fn for_period(period: &Period) -> Self {
        Self {
            minutes_between: period.minutes_between,
            alignment: period.alignment,
        }
    }

    /// Alignment first, then transfer time: `10:00-19:00` becomes `00:00-24:00 + n`.
    pub fn expand(&self, span: &Span) -> Span {
        let aligned = match self.alignment {
            Some(Alignment::Day) => span.align_to_day(),
            None => *span,
        };
        aligned.extend_end(self.minutes_between as Ms * MINUTE_MS)
    }
}

/// True if two bookings of the same attendee can't both be accepted.
///
/// A shared anti-affinity group always conflicts, even when the occasions opt
/// out of the overlap check. Otherwise any pair of (expanded) dates intersecting
/// as half-open ranges is a conflict.
pub fn overlaps(a: &MatchableBooking, b: &MatchableBooking, rules: &OverlapRules) -> bool {
    debug_assert_ne!(a.id, b.id, "a booking is never compared with itself");

    if let (Some(ga), Some(gb)) = (&a.anti_affinity_group, &b.anti_affinity_group)
        && ga == gb {
            return true;
        }

    if a.exclude_from_overlap_check || b.exclude_from_overlap_check {
        return false;
    }

    a.dates.iter().any(|da| {
        let da = rules.expand(da);
        b.dates.iter().any(|db| da.overlaps(&rules.expand(db)))
    })
}

/// Blocked bookings that no longer conflict with any accepted booking.
///
/// Full rescan of `blocked × accepted`; callers rely on it being a re-derivation.
pub fn unblockable<'a>(
    accepted: &[&'a MatchableBooking],
    blocked: &[&'a MatchableBooking],
    rules: &OverlapRules,
) -> Vec<Ulid> {
    blocked
        .iter()
        .filter(|b| !accepted.iter().any(|a| overlaps(a, b, rules)))
        .map(|b| b.id)
        .collect()
}
