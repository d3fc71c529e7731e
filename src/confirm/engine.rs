//! Run confirmation engine
//!
//! ```text
//!            ┌─────────┐
//!            │ started │
//!            └────┬────┘
//!     ┌───────────┼──────────────┐
//!     ▼           ▼              ▼
//! ┌───────┐  ┌─────────┐    ┌────────┐
//! │ done  │  │ aborted │    │ failed │
//! └───────┘  └─────────┘    └────────┘
//!  acted or   policy stop    the action
//!  nothing    (history,      itself broke
//!  to do      age, ratio)
//! ```
//!
//! The engine only reads earlier runs. Its own stage record goes into the
//! newest qualifying run (or the newest run at all when none qualifies).

use crate::confirm::action::{ActionReport, ConfirmedAction, OutputTarget, DEFAULT_BATCH_SIZE};
use crate::confirm::{
    confirm_empty_directories, within_fraction, AbortReason, ActionKind, ConfirmationPolicy,
};
use crate::error::Result;
use crate::runs::{RunDir, RunId, StageStatus};
use crate::store::{read_list, PathLines};
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Confirmed list and the numbers the threshold is computed from
#[derive(Debug, Clone, Default)]
pub struct ConfirmedSet {
    /// Sorted confirmed paths
    pub paths: Vec<String>,

    /// Size of the newest run's list
    pub detected: u64,

    /// Total population of the newest run, if recorded
    pub total: Option<u64>,
}

impl ConfirmedSet {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.paths.len() as f64 / total as f64),
            _ => None,
        }
    }
}

/// Result of evaluating the confirmation window
#[derive(Debug, Clone)]
pub enum Verdict {
    Proceed(ConfirmedSet),
    Abort {
        reason: AbortReason,
        confirmed: Option<ConfirmedSet>,
    },
}

/// Runs consulted and the verdict reached
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Run the stage record is written to
    pub latest: Option<RunId>,

    /// Qualifying runs, oldest first
    pub runs: Vec<RunId>,

    pub verdict: Verdict,
}

/// How an action is carried out
#[derive(Debug, Clone)]
pub struct ActionOptions {
    /// Write the list instead of acting
    pub dry_run: bool,

    /// Where the confirmed list goes in dry-run mode, or for inspection
    /// when the action aborts
    pub output: Option<OutputTarget>,

    pub batch_size: usize,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            output: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Terminal record of one action
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action: ActionKind,
    pub status: StageStatus,
    pub reason: Option<String>,
    pub abort_code: Option<&'static str>,
    pub run: Option<String>,
    pub runs: Vec<String>,
    pub detected: Option<u64>,
    pub confirmed: Option<u64>,
    pub total: Option<u64>,
    pub ratio: Option<f64>,
    pub max_fraction: f64,
    pub dry_run: bool,
    pub list_written: Option<String>,
    pub report: Option<ActionReport>,

    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ActionOutcome {
    /// Stage record fields for the stats document
    pub fn stage_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Confirms per-run lists of one RSE and drives the action on them
pub struct RunConfirmationEngine {
    runs: RunDir,
    rse: String,
}

impl RunConfirmationEngine {
    pub fn new(runs: RunDir, rse: impl Into<String>) -> Self {
        Self {
            runs,
            rse: rse.into(),
        }
    }

    /// Runs inside the window whose list for `kind` is complete, oldest first
    pub fn qualifying_runs(
        &self,
        kind: ActionKind,
        policy: &ConfirmationPolicy,
        now: NaiveDateTime,
    ) -> Result<Vec<RunId>> {
        let mut qualifying = Vec::new();
        for run in self.runs.runs(&self.rse)? {
            if run.age(now) > policy.window {
                continue;
            }
            let stats = self.runs.load_stats(&run)?;
            if stats.stage_status(kind.source_stage()) != Some(StageStatus::Done) {
                continue;
            }
            if kind == ActionKind::EmptyDirectories
                && stats.get_bool(kind.source_stage(), "root_failed") == Some(true)
            {
                continue;
            }
            if self.runs.find_list(&run, kind.artifact()).is_none() {
                warn!(run = %run, action = %kind, "Run has no list, skipping");
                continue;
            }
            qualifying.push(run);
        }
        Ok(qualifying)
    }

    /// Apply the history checks, compute the confirmed set and check it
    /// against the threshold
    pub fn evaluate(
        &self,
        kind: ActionKind,
        policy: &ConfirmationPolicy,
        now: NaiveDateTime,
    ) -> Result<Evaluation> {
        let runs = self.qualifying_runs(kind, policy, now)?;
        let latest = match runs.last() {
            Some(run) => Some(run.clone()),
            None => self.runs.runs(&self.rse)?.pop(),
        };
        let abort = |reason: AbortReason, runs: Vec<RunId>, latest: Option<RunId>| Evaluation {
            latest,
            runs,
            verdict: Verdict::Abort {
                reason,
                confirmed: None,
            },
        };

        if runs.len() < policy.min_runs.max(1) {
            let reason = AbortReason::InsufficientHistory {
                found: runs.len(),
                required: policy.min_runs.max(1),
            };
            return Ok(abort(reason, runs, latest));
        }

        // Non-empty from here on
        let (first, last) = (&runs[0], &runs[runs.len() - 1]);
        let last_age = last.age(now);
        if last_age > policy.max_age_last_run {
            let reason = AbortReason::StaleRun {
                run: last.name(),
                age_hours: last_age.num_hours(),
                max_hours: policy.max_age_last_run.num_hours(),
            };
            return Ok(abort(reason, runs, latest));
        }
        if kind == ActionKind::Dark {
            if let Some(min_age) = policy.min_age_first_run {
                let first_age = first.age(now);
                if first_age < min_age {
                    let reason = AbortReason::FirstRunTooRecent {
                        run: first.name(),
                        age_hours: first_age.num_hours(),
                        min_hours: min_age.num_hours(),
                    };
                    return Ok(abort(reason, runs, latest));
                }
            }
        }

        let mut confirmed = self.intersect(kind, &runs)?;
        confirmed.total = kind.total(&self.runs.load_stats(last)?);

        let count = confirmed.len() as u64;
        let total = confirmed.total;
        let verdict = match total {
            _ if count == 0 => Verdict::Proceed(confirmed),
            None | Some(0) => Verdict::Abort {
                reason: AbortReason::UnknownTotal { confirmed: count },
                confirmed: Some(confirmed),
            },
            Some(total) if !within_fraction(count, total, policy.max_fraction) => {
                Verdict::Abort {
                    reason: AbortReason::ThresholdExceeded {
                        confirmed: count,
                        total,
                        ratio: count as f64 / total as f64,
                        max: policy.max_fraction,
                    },
                    confirmed: Some(confirmed),
                }
            }
            Some(_) => Verdict::Proceed(confirmed),
        };

        Ok(Evaluation {
            latest,
            runs,
            verdict,
        })
    }

    /// Intersect the lists of `runs`, oldest first
    fn intersect(&self, kind: ActionKind, runs: &[RunId]) -> Result<ConfirmedSet> {
        let lists: Vec<_> = runs
            .iter()
            .filter_map(|run| self.runs.find_list(run, kind.artifact()))
            .collect();

        let (confirmed, detected) = match kind {
            ActionKind::EmptyDirectories => {
                let sets = lists
                    .iter()
                    .map(|p| read_list(p).map(|l| l.into_iter().collect::<HashSet<_>>()))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let detected = sets.last().map(|s| s.len() as u64).unwrap_or(0);
                (confirm_empty_directories(&sets), detected)
            }
            ActionKind::Dark | ActionKind::Missing => {
                let mut lists = lists.iter();
                let mut confirmed: HashSet<String> = match lists.next() {
                    Some(first) => read_list(first)?.into_iter().collect(),
                    None => HashSet::new(),
                };
                let mut detected = confirmed.len() as u64;
                for list in lists {
                    let (next, seen) = intersect_with(confirmed, list)?;
                    confirmed = next;
                    detected = seen;
                }
                (confirmed, detected)
            }
        };

        let mut paths: Vec<String> = confirmed.into_iter().collect();
        paths.sort_unstable();
        Ok(ConfirmedSet {
            paths,
            detected,
            total: None,
        })
    }

    /// Evaluate, act, and record the stage in the newest run
    pub fn execute(
        &self,
        kind: ActionKind,
        policy: &ConfirmationPolicy,
        action: &dyn ConfirmedAction,
        options: &ActionOptions,
        now: NaiveDateTime,
    ) -> Result<ActionOutcome> {
        let start = Instant::now();
        info!(rse = %self.rse, action = %kind, dry_run = options.dry_run, "Starting action");

        let evaluation = self.evaluate(kind, policy, now)?;
        if let Some(run) = &evaluation.latest {
            let mut fields = Map::new();
            fields.insert("status".into(), json!(StageStatus::Started));
            fields.insert("start_time".into(), json!(now.to_string()));
            self.runs.update_stage(run, kind.stage(), fields)?;
        }

        let mut outcome = ActionOutcome {
            action: kind,
            status: StageStatus::Started,
            reason: None,
            abort_code: None,
            run: evaluation.latest.as_ref().map(RunId::name),
            runs: evaluation.runs.iter().map(RunId::name).collect(),
            detected: None,
            confirmed: None,
            total: None,
            ratio: None,
            max_fraction: policy.max_fraction,
            dry_run: options.dry_run,
            list_written: None,
            report: None,
            elapsed: Duration::ZERO,
        };

        let acted = self.act(kind, evaluation.verdict, action, options, &mut outcome);
        if let Err(e) = &acted {
            error!(rse = %self.rse, action = %kind, error = %e, "Action output failed");
            outcome.status = StageStatus::Failed;
            outcome.reason = Some(e.to_string());
        }

        outcome.elapsed = start.elapsed();
        if let Some(run) = &evaluation.latest {
            let mut fields = outcome.stage_fields();
            fields.insert(
                "end_time".into(),
                json!((now
                    + chrono::Duration::from_std(outcome.elapsed)
                        .unwrap_or_else(|_| chrono::Duration::zero()))
                .to_string()),
            );
            if let Err(e) = &acted {
                fields.insert("error".into(), json!(e.to_string()));
            }
            self.runs.update_stage(run, kind.stage(), fields)?;
        }
        acted?;

        info!(
            rse = %self.rse,
            action = %kind,
            status = %outcome.status,
            confirmed = ?outcome.confirmed,
            "Action finished"
        );
        Ok(outcome)
    }

    /// Apply the verdict: write the list and run the action as needed
    fn act(
        &self,
        kind: ActionKind,
        verdict: Verdict,
        action: &dyn ConfirmedAction,
        options: &ActionOptions,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        match verdict {
            Verdict::Abort { reason, confirmed } => {
                warn!(rse = %self.rse, action = %kind, reason = %reason, "Action aborted");
                outcome.status = StageStatus::Aborted;
                outcome.abort_code = Some(reason.code());
                outcome.reason = Some(reason.to_string());
                if let Some(set) = confirmed {
                    record_set(outcome, &set);
                    if let Some(target) = &options.output {
                        target.write_paths(&set.paths)?;
                        outcome.list_written = Some(target.to_string());
                    }
                }
            }
            Verdict::Proceed(set) => {
                record_set(outcome, &set);
                if options.dry_run {
                    let target = options.output.clone().unwrap_or(OutputTarget::Stdout);
                    target.write_paths(&set.paths)?;
                    outcome.list_written = Some(target.to_string());
                    outcome.status = StageStatus::Done;
                } else if set.is_empty() {
                    outcome.status = StageStatus::Done;
                } else {
                    match action.apply(&set.paths) {
                        Ok(report) => {
                            outcome.report = Some(report);
                            outcome.status = StageStatus::Done;
                        }
                        Err(e) => {
                            error!(rse = %self.rse, action = %kind, error = %e, "Action failed");
                            outcome.status = StageStatus::Failed;
                            outcome.reason = Some(e.to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn record_set(outcome: &mut ActionOutcome, set: &ConfirmedSet) {
    outcome.detected = Some(set.detected);
    outcome.confirmed = Some(set.len() as u64);
    outcome.total = set.total;
    outcome.ratio = set.ratio();
}

/// Keep the members of `confirmed` that appear in the list at `path`,
/// streaming the list. Also returns the list's length.
fn intersect_with(confirmed: HashSet<String>, path: &Path) -> Result<(HashSet<String>, u64)> {
    let mut next = HashSet::with_capacity(confirmed.len());
    let mut seen = 0u64;
    for line in PathLines::open(path)? {
        let line = line?;
        seen += 1;
        if confirmed.contains(&line) {
            next.insert(line);
        }
    }
    Ok((next, seen))
}
