//! Multi-run confirmation and the actions it drives
//!
//! A single scan can be wrong: a server hiccup makes files look missing, a
//! slow catalog dump makes new files look dark. Nothing is acted on until it
//! has been seen in every qualifying run of a confirmation window, and even
//! then the action is refused when the confirmed set is implausibly large.

pub mod action;
pub mod engine;

pub use action::{
    ActionReport, ConfirmedAction, DeclareMissingAction, OutputTarget, QuarantineAction,
    RemoveEmptyDirectoriesAction, UnconfiguredCatalog,
};
pub use engine::{ActionOptions, ActionOutcome, Evaluation, RunConfirmationEngine, Verdict};

use crate::path::ancestors;
use crate::runs::{stages, Artifact, RunStats};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Which list is being confirmed and acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Dark,
    Missing,
    EmptyDirectories,
}

impl ActionKind {
    /// Stage record the action writes
    pub fn stage(&self) -> &'static str {
        match self {
            ActionKind::Dark => stages::DARK_ACTION,
            ActionKind::Missing => stages::MISSING_ACTION,
            ActionKind::EmptyDirectories => stages::EMPTY_ACTION,
        }
    }

    /// Stage that produces the list, which must be done for a run to qualify
    pub fn source_stage(&self) -> &'static str {
        match self {
            ActionKind::Dark | ActionKind::Missing => stages::CMP3,
            ActionKind::EmptyDirectories => stages::SCANNER,
        }
    }

    /// Per-run list artifact
    pub fn artifact(&self) -> Artifact {
        match self {
            ActionKind::Dark => Artifact::Dark,
            ActionKind::Missing => Artifact::Missing,
            ActionKind::EmptyDirectories => Artifact::EmptyDirs,
        }
    }

    /// Population the confirmed count is compared against
    pub fn total(&self, stats: &RunStats) -> Option<u64> {
        match self {
            ActionKind::Dark => stats.get_u64(stages::SCANNER, "files"),
            ActionKind::Missing => stats
                .get_u64(stages::DBDUMP_BEFORE, "files")
                .or_else(|| stats.get_u64(stages::CMP3, "catalog_before")),
            ActionKind::EmptyDirectories => stats.get_u64(stages::SCANNER, "directories"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Dark => "dark",
            ActionKind::Missing => "missing",
            ActionKind::EmptyDirectories => "empty",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmation thresholds for one action
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationPolicy {
    /// Runs older than this are not consulted
    pub window: chrono::Duration,

    /// Qualifying runs required
    pub min_runs: usize,

    /// The newest qualifying run must be at most this old
    pub max_age_last_run: chrono::Duration,

    /// The oldest qualifying run must be at least this old (dark only)
    pub min_age_first_run: Option<chrono::Duration>,

    /// Largest allowed confirmed / total ratio
    pub max_fraction: f64,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            window: chrono::Duration::days(35),
            min_runs: 2,
            max_age_last_run: chrono::Duration::days(2),
            min_age_first_run: None,
            max_fraction: 0.05,
        }
    }
}

/// Policy stop of a confirmation
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    InsufficientHistory { found: usize, required: usize },
    StaleRun { run: String, age_hours: i64, max_hours: i64 },
    FirstRunTooRecent { run: String, age_hours: i64, min_hours: i64 },
    ThresholdExceeded { confirmed: u64, total: u64, ratio: f64, max: f64 },
    UnknownTotal { confirmed: u64 },
}

impl AbortReason {
    /// Short machine-readable code recorded in stats
    pub fn code(&self) -> &'static str {
        match self {
            AbortReason::InsufficientHistory { .. } => "insufficient_history",
            AbortReason::StaleRun { .. } => "stale_run",
            AbortReason::FirstRunTooRecent { .. } => "first_run_too_recent",
            AbortReason::ThresholdExceeded { .. } => "threshold_exceeded",
            AbortReason::UnknownTotal { .. } => "unknown_total",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::InsufficientHistory { found, required } => write!(
                f,
                "only {} qualifying runs in the window, {} required",
                found, required
            ),
            AbortReason::StaleRun {
                run,
                age_hours,
                max_hours,
            } => write!(
                f,
                "latest run {} is {}h old, limit {}h",
                run, age_hours, max_hours
            ),
            AbortReason::FirstRunTooRecent {
                run,
                age_hours,
                min_hours,
            } => write!(
                f,
                "first run {} is only {}h old, {}h required",
                run, age_hours, min_hours
            ),
            AbortReason::ThresholdExceeded {
                confirmed,
                total,
                ratio,
                max,
            } => write!(
                f,
                "{} of {} confirmed ({:.4}) exceeds the limit {:.4}",
                confirmed, total, ratio, max
            ),
            AbortReason::UnknownTotal { confirmed } => write!(
                f,
                "{} confirmed but the total population of the latest run is unknown",
                confirmed
            ),
        }
    }
}

/// Intersection of every set, oldest first
pub fn intersect_all<I>(sets: I) -> HashSet<String>
where
    I: IntoIterator<Item = HashSet<String>>,
{
    let mut sets = sets.into_iter();
    let Some(mut confirmed) = sets.next() else {
        return HashSet::new();
    };
    for set in sets {
        confirmed.retain(|p| set.contains(p));
    }
    confirmed
}

/// Directional intersection of empty-directory sets, oldest first.
///
/// A directory that drops out of a later run takes every one of its
/// ancestors out with it: a parent cannot be empty while a child
/// reappeared as non-empty. The result is finally intersected with the
/// newest set.
pub fn confirm_empty_directories(sets: &[HashSet<String>]) -> HashSet<String> {
    let Some((first, rest)) = sets.split_first() else {
        return HashSet::new();
    };

    let mut confirmed = first.clone();
    for current in rest {
        revoke_missing(&mut confirmed, current);
    }
    if let Some(latest) = sets.last() {
        confirmed.retain(|d| latest.contains(d));
    }
    confirmed
}

/// Drop every directory absent from `current`, together with its ancestors
pub fn revoke_missing(confirmed: &mut HashSet<String>, current: &HashSet<String>) {
    let revoked: Vec<String> = confirmed
        .iter()
        .filter(|d| !current.contains(*d))
        .cloned()
        .collect();
    for dir in &revoked {
        confirmed.remove(dir);
        for ancestor in ancestors(dir) {
            confirmed.remove(ancestor);
        }
    }
}

/// Whether `confirmed / total` stays within `max_fraction`.
///
/// Equal to the limit is allowed.
pub fn within_fraction(confirmed: u64, total: u64, max_fraction: f64) -> bool {
    if confirmed == 0 {
        return true;
    }
    if total == 0 {
        return false;
    }
    (confirmed as f64 / total as f64) <= max_fraction
}
