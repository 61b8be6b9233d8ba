use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ulid::Ulid;

use crate::matching::{EvictionPolicy, MatchOptions, Scoring, ScoringSettings};

#[derive(Parser, Debug)]
#[command(
    name = "allotment",
    about = "Match attendees to occasions by deferred acceptance",
    version
)]
pub struct Cli {
    /// Directory holding the write-ahead log
    #[arg(long, env = "ALLOTMENT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,
    /// Serve Prometheus metrics on this port
    #[arg(long, env = "ALLOTMENT_METRICS_PORT")]
    pub metrics_port: Option<u16>,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("allotment.wal")
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load periods, occasions, attendees and bookings from a JSON catalog
    Import { catalog: PathBuf },
    /// Run the matching for one period and store the resulting states
    Match {
        period: Ulid,
        #[command(flatten)]
        options: MatchArgs,
    },
    /// Print occasion summaries and booking states of a period as JSON
    Report { period: Ulid },
    /// Rewrite the log as the minimal event list for the current state
    Compact,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EvictionArg {
    /// Evict the first holder scoring below the candidate
    #[default]
    First,
    /// Evict the lowest scoring holder
    Weakest,
}

impl From<EvictionArg> for EvictionPolicy {
    fn from(value: EvictionArg) -> Self {
        match value {
            EvictionArg::First => EvictionPolicy::FirstWeaker,
            EvictionArg::Weakest => EvictionPolicy::Weakest,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct MatchArgs {
    /// Which holder a full occasion gives up
    #[arg(long, value_enum, default_value_t = EvictionArg::First, env = "ALLOTMENT_EVICTION")]
    pub eviction: EvictionArg,
    /// Fail if the result contains a blocking pair (slow)
    #[arg(long, env = "ALLOTMENT_STABILITY_CHECK")]
    pub stability_check: bool,
    /// Stop with a warning instead of failing when the loop budget runs out
    #[arg(long, env = "ALLOTMENT_SOFT_BUDGET")]
    pub soft_budget: bool,
    /// Prefer attendees inside the occasion's age bracket
    #[arg(long, env = "ALLOTMENT_PREFER_IN_AGE_BRACKET")]
    pub prefer_in_age_bracket: bool,
    /// Prefer children of organisers
    #[arg(long, env = "ALLOTMENT_PREFER_ORGANISER")]
    pub prefer_organiser: bool,
    /// Prefer children of admins and association members
    #[arg(long, env = "ALLOTMENT_PREFER_ADMINS")]
    pub prefer_admins: bool,
}

impl MatchArgs {
    pub fn scoring_settings(&self) -> ScoringSettings {
        ScoringSettings {
            prefer_in_age_bracket: self.prefer_in_age_bracket,
            prefer_organiser: self.prefer_organiser,
            prefer_admins: self.prefer_admins,
        }
    }

    pub fn to_options(&self) -> MatchOptions {
        MatchOptions {
            scoring: Scoring::from_settings(&self.scoring_settings()),
            eviction: self.eviction.into(),
            stability_check: self.stability_check,
            hard_budget: !self.soft_budget,
            ..Default::default()
        }
    }
}
