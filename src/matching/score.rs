use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Attendee, Booking, Occasion};

/// Everything a criterion may look at when scoring one booking.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub booking: &'a Booking,
    pub attendee: Option<&'a Attendee>,
    pub occasion: &'a Occasion,
}

/// One ingredient of a booking's score. Occasions prefer higher scores.
///
/// Scores are computed once per run, before matching starts.
pub trait Criterion: fmt::Debug + Send + Sync {
    fn score(&self, ctx: &ScoringContext<'_>) -> f64;

    /// The `ScoringSettings` flag enabling this criterion, if it is optional.
    fn setting(&self) -> Option<&'static str> {
        None
    }
}

/// Prefers bookings the attendee marked with a higher priority.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferMotivated;

impl Criterion for PreferMotivated {
    fn score(&self, ctx: &ScoringContext<'_>) -> f64 {
        ctx.booking.priority as f64
    }
}

/// 1.0 inside the occasion's age bracket, 0.1 less per year outside it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferInAgeBracket;

impl Criterion for PreferInAgeBracket {
    fn score(&self, ctx: &ScoringContext<'_>) -> f64 {
        let (Some(range), Some(age)) = (ctx.occasion.age, ctx.attendee.and_then(|a| a.age)) else {
            return 0.0;
        };
        let distance = range.distance(age).min(10);
        (10 - distance) as f64 / 10.0
    }

    fn setting(&self) -> Option<&'static str> {
        Some("prefer_in_age_bracket")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreferOrganiserChildren;

impl Criterion for PreferOrganiserChildren {
    fn score(&self, ctx: &ScoringContext<'_>) -> f64 {
        if ctx.attendee.is_some_and(|a| a.organiser_child) { 1.5 } else { 0.0 }
    }

    fn setting(&self) -> Option<&'static str> {
        Some("prefer_organiser")
    }
}

/// Children of admins and association members.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferAdminChildren;

impl Criterion for PreferAdminChildren {
    fn score(&self, ctx: &ScoringContext<'_>) -> f64 {
        if ctx.attendee.is_some_and(|a| a.admin_child) { 1.5 } else { 0.0 }
    }

    fn setting(&self) -> Option<&'static str> {
        Some("prefer_admins")
    }
}

/// Which optional criteria are on. Serializable form of a `Scoring`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringSettings {
    #[serde(default)]
    pub prefer_in_age_bracket: bool,
    #[serde(default)]
    pub prefer_organiser: bool,
    #[serde(default)]
    pub prefer_admins: bool,
}

/// Sum of criteria. The default is priority alone.
#[derive(Debug)]
pub struct Scoring {
    criteria: Vec<Box<dyn Criterion>>,
}

impl Default for Scoring {
    fn default() -> Self {
        Self::new(vec![Box::new(PreferMotivated)])
    }
}

impl Scoring {
    pub fn new(criteria: Vec<Box<dyn Criterion>>) -> Self {
        Self { criteria }
    }

    pub fn with(mut self, criterion: impl Criterion + 'static) -> Self {
        self.criteria.push(Box::new(criterion));
        self
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn score(&self, ctx: &ScoringContext<'_>) -> f64 {
        self.criteria.iter().map(|c| c.score(ctx)).sum()
    }

    pub fn settings(&self) -> ScoringSettings {
        let mut settings = ScoringSettings::default();
        for setting in self.criteria.iter().filter_map(|c| c.setting()) {
            match setting {
                "prefer_in_age_bracket" => settings.prefer_in_age_bracket = true,
                "prefer_organiser" => settings.prefer_organiser = true,
                "prefer_admins" => settings.prefer_admins = true,
                _ => {}
            }
        }
        settings
    }

    pub fn from_settings(settings: &ScoringSettings) -> Self {
        let mut scoring = Self::default();
        if settings.prefer_in_age_bracket {
            scoring = scoring.with(PreferInAgeBracket);
        }
        if settings.prefer_organiser {
            scoring = scoring.with(PreferOrganiserChildren);
        }
        if settings.prefer_admins {
            scoring = scoring.with(PreferAdminChildren);
        }
        scoring
    }
}
