use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::store::StoreError;

/// Bulk input: one JSON document describing periods and everything in them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub occasions: Vec<Occasion>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Catalog(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Catalog(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.periods.len() + self.occasions.len() + self.attendees.len() + self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creation events, referenced records first.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        events.extend(self.periods.into_iter().map(Event::PeriodCreated));
        events.extend(self.attendees.into_iter().map(Event::AttendeeCreated));
        events.extend(self.occasions.into_iter().map(Event::OccasionCreated));
        events.extend(self.bookings.into_iter().map(Event::BookingCreated));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "periods": [
            { "id": "01ARZ3NDEKTSV4RRFFQ69G5FAV", "title": "Summer", "minutes_between": 30, "alignment": "day" }
        ],
        "occasions": [
            {
                "id": "01BX5ZZKBKACTAV9WEVGEMMVRZ",
                "period_id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
                "title": "Zoo",
                "dates": [{ "start": 1519635600000, "end": 1519646400000 }],
                "spots": { "lower": 2, "upper": 11 },
                "age": { "min": 8, "max": 12 }
            }
        ],
        "attendees": [
            { "id": "01BX5ZZKBKACTAV9WEVGEMMVS0", "name": "Tom", "age": 9 }
        ],
        "bookings": [
            {
                "id": "01BX5ZZKBKACTAV9WEVGEMMVS1",
                "attendee_id": "01BX5ZZKBKACTAV9WEVGEMMVS0",
                "occasion_id": "01BX5ZZKBKACTAV9WEVGEMMVRZ",
                "priority": 1,
                "state": "open"
            }
        ]
    }"#;

    #[test]
    fn parses_with_defaults() {
        let catalog = Catalog::from_json(JSON).unwrap();
        assert_eq!(catalog.len(), 4);

        let period = &catalog.periods[0];
        assert_eq!(period.minutes_between, 30);
        assert_eq!(period.alignment, Some(Alignment::Day));
        assert_eq!(period.max_bookings_per_attendee, None);

        let occasion = &catalog.occasions[0];
        assert_eq!(occasion.spots.max_spots(), 10);
        assert!(!occasion.exclude_from_overlap_check);
        assert_eq!(occasion.anti_affinity_group, None);

        let attendee = &catalog.attendees[0];
        assert_eq!(attendee.age, Some(9));
        assert!(!attendee.organiser_child);

        assert_eq!(catalog.bookings[0].state, BookingState::Open);
    }

    #[test]
    fn events_come_in_dependency_order() {
        let events = Catalog::from_json(JSON).unwrap().into_events();
        assert!(matches!(events[0], Event::PeriodCreated(_)));
        assert!(matches!(events[1], Event::AttendeeCreated(_)));
        assert!(matches!(events[2], Event::OccasionCreated(_)));
        assert!(matches!(events[3], Event::BookingCreated(_)));
    }

    #[test]
    fn empty_and_broken_documents() {
        assert!(Catalog::from_json("{}").unwrap().is_empty());
        assert!(matches!(Catalog::from_json("{\"periods\": 3}"), Err(StoreError::Catalog(_))));
        assert!(matches!(
            Catalog::from_path(Path::new("/nonexistent/catalog.json")),
            Err(StoreError::Catalog(_))
        ));
    }
}
