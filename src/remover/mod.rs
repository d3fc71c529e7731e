//! Leaves-first removal of confirmed empty directories
//!
//! The input is an unordered set of directories. They are removed in rounds:
//! each round takes the remaining directories that have no remaining
//! descendant, removes them concurrently, and waits for the whole round to
//! finish before the next one starts. A directory is therefore only attempted
//! after every listed directory beneath it has been attempted or skipped.
//!
//! Directories at or above the depth floor (`/a` has depth 2) are never
//! removed; they are reported as skipped.

use crate::error::{ListingError, WorkerError};
use crate::path::{ancestors, split_depth, strip_path};
use crate::remote::RemoteLister;
use crate::scanner::TaskQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Directories at this split depth or shallower are never removed
pub const DEFAULT_DEPTH_FLOOR: usize = 2;

/// A directory that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryRemovalFailure {
    pub path: String,

    /// Error text with the path removed
    pub reason: String,
}

/// Remover settings
#[derive(Debug, Clone)]
pub struct RemoverSettings {
    pub workers: usize,
    pub stagger: Duration,
    pub depth_floor: usize,

    /// Stop submitting once this many removals have been attempted
    pub max_removals: Option<usize>,
}

impl Default for RemoverSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            stagger: Duration::from_millis(100),
            depth_floor: DEFAULT_DEPTH_FLOOR,
            max_removals: None,
        }
    }
}

/// Outcome of a removal pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalReport {
    pub attempted: u64,
    pub removed: u64,
    pub retried: u64,
    pub skipped: Vec<String>,
    pub failures: Vec<DirectoryRemovalFailure>,

    /// Directories left unattempted because the cap was reached
    pub not_attempted: u64,
    pub capped: bool,

    #[serde(skip)]
    pub elapsed: Duration,
}

impl RemovalReport {
    /// Failure counts keyed by normalized reason
    pub fn failures_by_reason(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.reason.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Split the frontier into leaves (no remaining descendant) and inner nodes.
///
/// Both halves keep descending order.
pub fn split_leaves(frontier: &[String]) -> (Vec<String>, Vec<String>) {
    let mut has_descendant: HashSet<&str> = HashSet::new();
    for path in frontier {
        has_descendant.extend(ancestors(path));
    }
    frontier
        .iter()
        .cloned()
        .partition(|path| !has_descendant.contains(path.as_str()))
}

#[derive(Default)]
struct RemovalState {
    removed: u64,
    retried: u64,
    failures: Vec<DirectoryRemovalFailure>,
}

/// Removes confirmed empty directories through a bounded worker pool
pub struct EmptyDirectoryRemover {
    lister: Arc<dyn RemoteLister>,
    settings: RemoverSettings,
}

impl EmptyDirectoryRemover {
    pub fn new(lister: Arc<dyn RemoteLister>, settings: RemoverSettings) -> Self {
        Self { lister, settings }
    }

    /// Remove `paths`, deepest first
    pub fn remove(&self, paths: &[String]) -> Result<RemovalReport, WorkerError> {
        let start = Instant::now();
        let mut report = RemovalReport::default();

        let mut frontier: Vec<String> = paths
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        frontier.sort_unstable_by(|a, b| b.cmp(a));

        info!(
            directories = frontier.len(),
            workers = self.settings.workers,
            max_removals = ?self.settings.max_removals,
            "Removing empty directories"
        );

        let queue: TaskQueue<String> = TaskQueue::new(self.settings.stagger);
        let state = Arc::new(Mutex::new(RemovalState::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::new();
        for id in 0..self.settings.workers.max(1) {
            let queue = queue.clone();
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            let lister = Arc::clone(&self.lister);
            let handle = thread::Builder::new()
                .name(format!("remover-{}", id))
                .spawn(move || worker_loop(queue, lister.as_ref(), &state, &stop))
                .map_err(|e| WorkerError::SpawnFailed {
                    id,
                    reason: e.to_string(),
                })?;
            workers.push((id, handle));
        }

        let mut round = 0;
        while !frontier.is_empty() && !report.capped {
            let (leaves, inner) = split_leaves(&frontier);
            round += 1;
            debug!(round, leaves = leaves.len(), inner = inner.len(), "Removal round");

            for path in leaves {
                if split_depth(&path) <= self.settings.depth_floor {
                    info!(path = %path, "Skipping directory above the depth floor");
                    report.skipped.push(path);
                    continue;
                }
                if let Some(cap) = self.settings.max_removals {
                    if report.attempted as usize >= cap {
                        report.capped = true;
                        report.not_attempted += 1;
                        continue;
                    }
                }
                report.attempted += 1;
                queue.submit(path);
            }

            queue.wait_idle(POLL_INTERVAL);
            frontier = inner;
        }
        report.not_attempted += frontier.len() as u64;
        if report.capped {
            warn!(
                cap = ?self.settings.max_removals,
                not_attempted = report.not_attempted,
                "Removal cap reached"
            );
        }

        stop.store(true, Ordering::SeqCst);
        for (id, handle) in workers {
            if handle.join().is_err() {
                return Err(WorkerError::Panicked {
                    id,
                    message: "remover worker panicked".into(),
                });
            }
        }

        let mut state = state.lock();
        report.removed = state.removed;
        report.retried = state.retried;
        report.failures = std::mem::take(&mut state.failures);
        report.elapsed = start.elapsed();

        info!(
            attempted = report.attempted,
            removed = report.removed,
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            elapsed_secs = report.elapsed.as_secs(),
            "Removal complete"
        );

        Ok(report)
    }
}

fn worker_loop(
    queue: TaskQueue<String>,
    lister: &dyn RemoteLister,
    state: &Mutex<RemovalState>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        let Some(guard) = queue.take(POLL_INTERVAL) else {
            continue;
        };
        let path = guard.task();

        let mut result = lister.remove_dir(path);
        let mut retried = false;
        if matches!(result, Err(ListingError::Timeout { .. })) {
            debug!(path = %path, "Removal timed out, retrying once");
            retried = true;
            result = lister.remove_dir(path);
        }

        let mut state = state.lock();
        if retried {
            state.retried += 1;
        }
        match result {
            Ok(()) => {
                debug!(path = %path, "Directory removed");
                state.removed += 1;
            }
            Err(e) => {
                let reason = strip_path(&e.to_string(), path);
                warn!(path = %path, %reason, "Directory removal failed");
                state.failures.push(DirectoryRemovalFailure {
                    path: path.clone(),
                    reason,
                });
            }
        }
    }
}
