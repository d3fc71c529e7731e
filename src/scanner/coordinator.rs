//! Scan coordinator - drives the concurrent scan of one storage root
//!
//! The coordinator is responsible for:
//! - Scanning the root itself (flat, once; failure is fatal)
//! - Scheduling subdirectories, recursive or flat, on a staggered task queue
//! - Retrying failed directories and recording the ones given up
//! - Streaming files, directories and empty directories to a bounded channel
//! - Final statistics and the consistency check on the counters
//!
//! All shared mutable state lives in one [`ScanState`] behind one lock. The
//! output channel is bounded, so a slow consumer throttles the workers.

use crate::error::{ListingError, WorkerError};
use crate::path::{is_within, relative_depth};
use crate::remote::RemoteLister;
use crate::scanner::queue::TaskQueue;
use crate::scanner::task::{DirectoryScanner, ScanReport};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long an idle worker waits for a task before rechecking for completion
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One record of the scan output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRecord {
    File { path: String, size: Option<u64> },
    Directory(String),
    EmptyDirectory(String),
}

/// Paths excluded from the scan.
///
/// Entries starting with `/` exclude that path and everything beneath it;
/// any other entry is a regular expression matched against the full path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    subtrees: Vec<String>,
    patterns: Vec<Regex>,
}

impl IgnoreList {
    pub fn new(subtrees: Vec<String>, patterns: Vec<Regex>) -> Self {
        Self { subtrees, patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.subtrees.is_empty() && self.patterns.is_empty()
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.subtrees.iter().any(|dir| is_within(path, dir))
            || self.patterns.iter().any(|re| re.is_match(path))
    }
}

/// Settings for one root scan
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Root location, relative to the server root
    pub root: String,

    /// Number of worker threads
    pub workers: usize,

    /// Depth below the root at which directories are listed recursively
    pub recursion_threshold: usize,

    /// Request file sizes from the listing client
    pub include_sizes: bool,

    /// Whether a directory given up fails the whole root
    pub fail_on_dir_errors: bool,

    /// Spacing between task starts
    pub stagger: Duration,

    /// Capacity of the output channel
    pub output_buffer: usize,

    pub ignore: IgnoreList,
}

impl ScanSettings {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            workers: 8,
            recursion_threshold: 3,
            include_sizes: true,
            fail_on_dir_errors: false,
            stagger: Duration::from_millis(100),
            output_buffer: 10_000,
            ignore: IgnoreList::default(),
        }
    }
}

/// Final statistics of one root scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub root: String,
    pub files: u64,
    pub directories: u64,
    pub empty_directories: u64,
    pub ignored_files: u64,
    pub ignored_directories: u64,
    pub total_size: u64,

    /// Directories given up, with the reason of their last failure
    pub failed_directories: BTreeMap<String, String>,

    pub failure_reason: Option<String>,
    pub root_failed: bool,

    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Live counters for progress display
#[derive(Debug, Default)]
pub struct ScanProgress {
    pub directories_scanned: AtomicU64,
    pub files: AtomicU64,
    pub bytes: AtomicU64,
    pub retries: AtomicU64,
    pub given_up: AtomicU64,
}

impl ScanProgress {
    pub fn directories_scanned(&self) -> u64 {
        self.directories_scanned.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn given_up(&self) -> u64 {
        self.given_up.load(Ordering::Relaxed)
    }
}

/// Shared mutable state, guarded by one lock
#[derive(Debug, Default)]
struct ScanState {
    files_found: u64,
    files_emitted: u64,
    files_ignored: u64,
    dirs_found: u64,
    dirs_emitted: u64,
    dirs_ignored: u64,
    empty_emitted: u64,
    total_size: u64,
    gave_up: BTreeMap<String, String>,
    failure_reason: Option<String>,
    root_failed: bool,
}

impl ScanState {
    fn fail(&mut self, reason: String) {
        if !self.root_failed {
            self.root_failed = true;
            self.failure_reason = Some(reason);
        }
    }

    /// Every returned entry is either emitted or ignored
    fn check_counts(&mut self) {
        if self.files_found != self.files_emitted + self.files_ignored {
            let reason = format!(
                "file count mismatch: found {} != emitted {} + ignored {}",
                self.files_found, self.files_emitted, self.files_ignored
            );
            error!(%reason, "Scan counters inconsistent");
            self.fail(reason);
        }
        if self.dirs_found != self.dirs_emitted + self.dirs_ignored {
            let reason = format!(
                "directory count mismatch: found {} != emitted {} + ignored {}",
                self.dirs_found, self.dirs_emitted, self.dirs_ignored
            );
            error!(%reason, "Scan counters inconsistent");
            self.fail(reason);
        }
    }
}

/// Everything the workers share
struct Shared {
    lister: Arc<dyn RemoteLister>,
    settings: ScanSettings,
    queue: TaskQueue<DirectoryScanner>,
    state: Mutex<ScanState>,
    progress: Arc<ScanProgress>,

    /// Set once the root has failed; remaining tasks are drained unscanned
    stop: AtomicBool,
}

impl Shared {
    /// Emit a successful report and schedule what it found
    fn handle_report(
        &self,
        location: &str,
        report: ScanReport,
        output: &Sender<ScanRecord>,
    ) {
        let root = self.settings.root.as_str();
        let ignore = &self.settings.ignore;

        let files_found = report.files.len() as u64;
        let dirs_found = report.directories.len() as u64;

        let (files, ignored_files): (Vec<_>, Vec<_>) = report
            .files
            .into_iter()
            .partition(|f| !ignore.is_ignored(&f.path));
        let (directories, ignored_dirs): (Vec<_>, Vec<_>) = report
            .directories
            .into_iter()
            .partition(|d| !ignore.is_ignored(d));
        let empty: Vec<String> = report
            .empty_directories
            .into_iter()
            .filter(|d| d != root && !ignore.is_ignored(d))
            .collect();

        // Flat listings expand the frontier; recursive ones already cover it
        if !report.recursive {
            let siblings = directories.len();
            for dir in &directories {
                let depth = relative_depth(dir, root);
                let recursive = depth >= self.settings.recursion_threshold && siblings > 1;
                trace!(path = %dir, depth, recursive, "Scheduling directory");
                self.queue
                    .submit(DirectoryScanner::new(dir.clone(), depth, recursive));
            }
        }

        let size: u64 = files.iter().filter_map(|f| f.size).sum();
        let mut files_emitted = 0u64;
        let mut dirs_emitted = 0u64;
        let mut empty_emitted = 0u64;
        let mut closed = false;

        for file in files {
            if output
                .send(ScanRecord::File {
                    path: file.path,
                    size: file.size,
                })
                .is_err()
            {
                closed = true;
                break;
            }
            files_emitted += 1;
        }
        if !closed {
            for dir in directories {
                if output.send(ScanRecord::Directory(dir)).is_err() {
                    closed = true;
                    break;
                }
                dirs_emitted += 1;
            }
        }
        if !closed {
            for dir in empty {
                if output.send(ScanRecord::EmptyDirectory(dir)).is_err() {
                    closed = true;
                    break;
                }
                empty_emitted += 1;
            }
        }

        self.progress
            .directories_scanned
            .fetch_add(1, Ordering::Relaxed);
        self.progress
            .files
            .fetch_add(files_emitted, Ordering::Relaxed);
        self.progress.bytes.fetch_add(size, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.files_found += files_found;
        state.files_emitted += files_emitted;
        state.files_ignored += ignored_files.len() as u64;
        state.dirs_found += dirs_found;
        state.dirs_emitted += dirs_emitted;
        state.dirs_ignored += ignored_dirs.len() as u64;
        state.empty_emitted += empty_emitted;
        state.total_size += size;
        if closed {
            state.fail(format!("output stream closed while scanning {}", location));
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Retry a failed scanner or give it up
    fn handle_failure(&self, scanner: &DirectoryScanner, err: &ListingError) {
        if scanner.can_retry() {
            debug!(
                path = %scanner.location(),
                attempts = scanner.attempts(),
                error = %err,
                "Directory scan failed, retrying"
            );
            self.progress.retries.fetch_add(1, Ordering::Relaxed);
            self.queue.submit(scanner.clone());
            return;
        }

        warn!(
            path = %scanner.location(),
            attempts = scanner.attempts(),
            error = %err,
            "Giving up on directory"
        );
        self.progress.given_up.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state
            .gave_up
            .insert(scanner.location().to_string(), err.to_string());
        if self.settings.fail_on_dir_errors {
            state.fail(format!("failed to scan {}: {}", scanner.location(), err));
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Worker thread body
fn worker_loop(id: usize, shared: Arc<Shared>, output: Sender<ScanRecord>) {
    debug!(worker = id, "Scanner worker starting");
    let mut scanned = 0u64;

    while !shared.queue.is_idle() {
        let Some(mut guard) = shared.queue.take(POLL_INTERVAL) else {
            continue;
        };
        if shared.stop.load(Ordering::SeqCst) {
            continue;
        }

        let scanner = guard.task_mut();
        let Some(result) = scanner.attempt(shared.lister.as_ref(), shared.settings.include_sizes)
        else {
            continue;
        };
        scanned += 1;

        match result {
            Ok(report) => {
                let location = scanner.location().to_string();
                shared.handle_report(&location, report, &output);
            }
            Err(e) => shared.handle_failure(scanner, &e),
        }
    }

    debug!(worker = id, attempts = scanned, "Scanner worker done");
}

/// Handle to a running scan
pub struct ScanHandle {
    records: Receiver<ScanRecord>,
    progress: Arc<ScanProgress>,
    driver: JoinHandle<Result<ScanResult, WorkerError>>,
}

impl ScanHandle {
    /// Output stream; it ends once every worker has finished
    pub fn records(&self) -> &Receiver<ScanRecord> {
        &self.records
    }

    pub fn progress(&self) -> Arc<ScanProgress> {
        Arc::clone(&self.progress)
    }

    /// Wait for the scan to finish and collect its statistics
    pub fn join(self) -> Result<ScanResult, WorkerError> {
        drop(self.records);
        self.driver.join().map_err(|_| WorkerError::Panicked {
            id: 0,
            message: "scan driver panicked".into(),
        })?
    }
}

/// Coordinates the concurrent scan of one root
pub struct ScanCoordinator {
    lister: Arc<dyn RemoteLister>,
    settings: ScanSettings,
}

impl ScanCoordinator {
    pub fn new(lister: Arc<dyn RemoteLister>, settings: ScanSettings) -> Self {
        Self { lister, settings }
    }

    /// Start scanning in the background.
    ///
    /// Records can be consumed from the handle while the scan runs; the
    /// stream is closed after the last worker exits.
    pub fn start(self) -> Result<ScanHandle, WorkerError> {
        let (tx, rx) = bounded(self.settings.output_buffer.max(1));
        let progress = Arc::new(ScanProgress::default());

        let shared = Arc::new(Shared {
            queue: TaskQueue::new(self.settings.stagger),
            lister: self.lister,
            settings: self.settings,
            state: Mutex::new(ScanState::default()),
            progress: Arc::clone(&progress),
            stop: AtomicBool::new(false),
        });

        let driver = thread::Builder::new()
            .name("scan-driver".into())
            .spawn(move || drive(shared, tx))
            .map_err(|e| WorkerError::SpawnFailed {
                id: 0,
                reason: e.to_string(),
            })?;

        Ok(ScanHandle {
            records: rx,
            progress,
            driver,
        })
    }

    /// Run to completion, passing each record to `sink`
    pub fn run<F>(self, mut sink: F) -> Result<ScanResult, WorkerError>
    where
        F: FnMut(ScanRecord),
    {
        let handle = self.start()?;
        for record in handle.records().iter() {
            sink(record);
        }
        handle.join()
    }
}

/// Scan the root, then run the worker pool until the frontier is exhausted
fn drive(shared: Arc<Shared>, output: Sender<ScanRecord>) -> Result<ScanResult, WorkerError> {
    let start = Instant::now();
    let root = shared.settings.root.clone();

    info!(
        root = %root,
        workers = shared.settings.workers,
        recursion_threshold = shared.settings.recursion_threshold,
        "Starting scan"
    );

    // The root gets one flat attempt and no retries
    let mut root_scanner = DirectoryScanner::new(root.clone(), 0, false);
    match root_scanner.attempt(shared.lister.as_ref(), shared.settings.include_sizes) {
        Some(Ok(report)) => shared.handle_report(&root, report, &output),
        other => {
            let reason = other
                .and_then(|r| r.err())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".into());
            error!(root = %root, error = %reason, "Root scan failed");
            shared.state.lock().fail(format!("root scan failed: {}", reason));
        }
    }

    let mut workers = Vec::new();
    if !shared.state.lock().root_failed {
        for id in 0..shared.settings.workers.max(1) {
            let worker_shared = Arc::clone(&shared);
            let worker_output = output.clone();
            let handle = thread::Builder::new()
                .name(format!("scanner-{}", id))
                .spawn(move || worker_loop(id, worker_shared, worker_output))
                .map_err(|e| WorkerError::SpawnFailed {
                    id,
                    reason: e.to_string(),
                })?;
            workers.push((id, handle));
        }
        debug!(count = workers.len(), "Scanner workers spawned");
    }

    let mut panicked = None;
    for (id, handle) in workers {
        if handle.join().is_err() {
            error!(worker = id, "Scanner worker panicked");
            panicked.get_or_insert(id);
        }
    }
    drop(output);

    if let Some(id) = panicked {
        return Err(WorkerError::Panicked {
            id,
            message: "scanner worker panicked".into(),
        });
    }

    let mut state = shared.state.lock();
    state.check_counts();

    let result = ScanResult {
        root,
        files: state.files_emitted,
        directories: state.dirs_emitted,
        empty_directories: state.empty_emitted,
        ignored_files: state.files_ignored,
        ignored_directories: state.dirs_ignored,
        total_size: state.total_size,
        failed_directories: std::mem::take(&mut state.gave_up),
        failure_reason: state.failure_reason.clone(),
        root_failed: state.root_failed,
        elapsed: start.elapsed(),
    };

    info!(
        root = %result.root,
        files = result.files,
        dirs = result.directories,
        empty = result.empty_directories,
        failed = result.failed_directories.len(),
        root_failed = result.root_failed,
        elapsed_secs = result.elapsed.as_secs(),
        "Scan completed"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListingResult;
    use crate::path::parent;
    use crate::remote::{Listing, RemoteEntry};
    use std::collections::{HashMap, HashSet};

    /// In-memory namespace with programmable failures
    #[derive(Default)]
    struct FakeLister {
        dirs: HashSet<String>,
        files: HashMap<String, u64>,
        /// location -> number of calls that fail before success
        failures: Mutex<HashMap<String, u32>>,
        calls: Mutex<HashMap<String, Vec<bool>>>,
    }

    impl FakeLister {
        fn new(dirs: &[&str], files: &[(&str, u64)]) -> Self {
            Self {
                dirs: dirs.iter().map(|d| d.to_string()).collect(),
                files: files.iter().map(|(f, s)| (f.to_string(), *s)).collect(),
                ..Default::default()
            }
        }

        fn fail(self, location: &str, times: u32) -> Self {
            self.failures.lock().insert(location.to_string(), times);
            self
        }

        fn calls(&self, location: &str) -> Vec<bool> {
            self.calls.lock().get(location).cloned().unwrap_or_default()
        }

        fn children<'a>(
            &'a self,
            location: &'a str,
            recursive: bool,
        ) -> impl Fn(&str) -> bool + 'a {
            move |p: &str| {
                if recursive {
                    crate::path::is_descendant(p, location)
                } else {
                    parent(p) == Some(location)
                }
            }
        }
    }

    impl RemoteLister for FakeLister {
        fn list(&self, location: &str, recursive: bool, _: bool) -> ListingResult<Listing> {
            self.calls
                .lock()
                .entry(location.to_string())
                .or_default()
                .push(recursive);

            if let Some(left) = self.failures.lock().get_mut(location) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ListingError::Failed {
                        path: location.to_string(),
                        reason: "server error".into(),
                    });
                }
            }
            if !self.dirs.contains(location) {
                return Err(ListingError::Failed {
                    path: location.to_string(),
                    reason: "no such directory".into(),
                });
            }

            let wanted = self.children(location, recursive);
            let mut listing = Listing::default();
            for d in self.dirs.iter().filter(|d| wanted(d.as_str())) {
                listing.directories.push(RemoteEntry::new(d.clone(), Some(0)));
            }
            for (f, size) in self.files.iter().filter(|(f, _)| wanted(f.as_str())) {
                listing.files.push(RemoteEntry::new(f.clone(), Some(*size)));
            }
            Ok(listing)
        }

        fn remove_dir(&self, _: &str) -> ListingResult<()> {
            Ok(())
        }
    }

    fn settings(root: &str) -> ScanSettings {
        ScanSettings {
            workers: 3,
            stagger: Duration::ZERO,
            output_buffer: 4,
            ..ScanSettings::new(root)
        }
    }

    fn collect(
        lister: FakeLister,
        settings: ScanSettings,
    ) -> (Vec<ScanRecord>, ScanResult, Arc<FakeLister>) {
        let lister = Arc::new(lister);
        let mut records = Vec::new();
        let result = ScanCoordinator::new(lister.clone(), settings)
            .run(|r| records.push(r))
            .unwrap();
        (records, result, lister)
    }

    fn empties(records: &[ScanRecord]) -> HashSet<String> {
        records
            .iter()
            .filter_map(|r| match r {
                ScanRecord::EmptyDirectory(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    fn files(records: &[ScanRecord]) -> HashSet<String> {
        records
            .iter()
            .filter_map(|r| match r {
                ScanRecord::File { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_root_with_file_and_empty_subdirectory() {
        let lister = FakeLister::new(&["/root", "/root/sub"], &[("/root/f", 10)]);
        let (records, result, _) = collect(lister, settings("/root"));

        assert_eq!(empties(&records), HashSet::from(["/root/sub".to_string()]));
        assert_eq!(files(&records), HashSet::from(["/root/f".to_string()]));
        assert_eq!(result.files, 1);
        assert_eq!(result.directories, 1);
        assert_eq!(result.empty_directories, 1);
        assert_eq!(result.total_size, 10);
        assert!(!result.root_failed);
    }

    #[test]
    fn test_empty_root_is_not_reported() {
        let lister = FakeLister::new(&["/root"], &[]);
        let (records, result, _) = collect(lister, settings("/root"));
        assert!(records.is_empty());
        assert_eq!(result.empty_directories, 0);
        assert!(!result.root_failed);
    }

    #[test]
    fn test_recursive_below_threshold_with_siblings() {
        let lister = FakeLister::new(
            &["/root", "/root/a", "/root/b", "/root/a/x", "/root/a/y", "/root/a/y/deep"],
            &[("/root/a/x/f1", 1), ("/root/b/f2", 2)],
        );
        let mut s = settings("/root");
        s.recursion_threshold = 2;
        let (records, result, lister) = collect(lister, s);

        // Depth 1: flat. Depth 2 with two siblings: recursive.
        assert_eq!(lister.calls("/root/a"), vec![false]);
        assert_eq!(lister.calls("/root/a/x"), vec![true]);
        assert_eq!(lister.calls("/root/a/y"), vec![true]);
        // Covered by the recursive listing of /root/a/y
        assert!(lister.calls("/root/a/y/deep").is_empty());

        assert_eq!(
            empties(&records),
            HashSet::from(["/root/a/y".to_string(), "/root/a/y/deep".to_string()])
        );
        assert_eq!(result.files, 2);
        assert_eq!(result.directories, 5);
    }

    #[test]
    fn test_lone_subdirectory_stays_flat() {
        let lister = FakeLister::new(&["/root", "/root/a", "/root/a/b"], &[("/root/a/b/f", 1)]);
        let mut s = settings("/root");
        s.recursion_threshold = 0;
        let (_, _, lister) = collect(lister, s);
        assert_eq!(lister.calls("/root/a"), vec![false]);
        assert_eq!(lister.calls("/root/a/b"), vec![false]);
    }

    #[test]
    fn test_give_up_exactly_once() {
        let lister = FakeLister::new(
            &["/root", "/root/a", "/root/b", "/root/a/x", "/root/a/y"],
            &[("/root/b/f", 1)],
        )
        .fail("/root/a", 100);
        let (_, result, lister) = collect(lister, settings("/root"));

        assert_eq!(lister.calls("/root/a").len(), 3);
        assert_eq!(result.failed_directories.len(), 1);
        assert!(result.failed_directories["/root/a"].contains("server error"));
        assert!(!result.root_failed);
    }

    #[test]
    fn test_success_on_last_attempt_not_given_up() {
        let lister = FakeLister::new(
            &["/root", "/root/a", "/root/b", "/root/a/x", "/root/a/z"],
            &[],
        )
        .fail("/root/a/x", 4);
        let mut s = settings("/root");
        s.recursion_threshold = 2;
        let (records, result, lister) = collect(lister, s);

        assert_eq!(
            lister.calls("/root/a/x"),
            vec![true, true, false, false, false]
        );
        assert!(result.failed_directories.is_empty());
        assert!(empties(&records).contains("/root/a/x"));
    }

    #[test]
    fn test_fail_on_dir_errors() {
        let lister = FakeLister::new(&["/root", "/root/a"], &[]).fail("/root/a", 100);
        let mut s = settings("/root");
        s.fail_on_dir_errors = true;
        let (_, result, _) = collect(lister, s);
        assert!(result.root_failed);
        assert!(result.failure_reason.unwrap().contains("/root/a"));
    }

    #[test]
    fn test_root_failure_is_fatal_without_retry() {
        let lister = FakeLister::new(&["/root", "/root/a"], &[]).fail("/root", 1);
        let (records, result, lister) = collect(lister, settings("/root"));
        assert!(records.is_empty());
        assert!(result.root_failed);
        assert_eq!(lister.calls("/root"), vec![false]);
        assert!(lister.calls("/root/a").is_empty());
    }

    #[test]
    fn test_ignore_list() {
        let lister = FakeLister::new(
            &["/root", "/root/keep", "/root/skip", "/root/skip/inner"],
            &[("/root/keep/f", 1), ("/root/skip/f", 1), ("/root/keep/f.tmp", 1)],
        );
        let mut s = settings("/root");
        s.ignore = IgnoreList::new(
            vec!["/root/skip".into()],
            vec![Regex::new(r"\.tmp$").unwrap()],
        );
        let (records, result, lister) = collect(lister, s);

        assert_eq!(files(&records), HashSet::from(["/root/keep/f".to_string()]));
        assert_eq!(result.ignored_directories, 1);
        assert_eq!(result.ignored_files, 1);
        assert!(lister.calls("/root/skip").is_empty());
    }

    #[test]
    fn test_handle_streams_records() {
        let dirs: Vec<String> = (0..20).map(|i| format!("/root/d{}", i)).collect();
        let mut all: Vec<&str> = dirs.iter().map(String::as_str).collect();
        all.push("/root");
        let lister = Arc::new(FakeLister::new(&all, &[]));

        let handle = ScanCoordinator::new(lister, settings("/root")).start().unwrap();
        let count = handle.records().iter().count();
        let result = handle.join().unwrap();

        // 20 directories plus 20 empty-directory records
        assert_eq!(count, 40);
        assert_eq!(result.directories, 20);
        assert_eq!(result.empty_directories, 20);
    }
}
