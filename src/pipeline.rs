//! Run steps: scan, dump ingestion and comparison
//!
//! Each step works on one run of one RSE, writes its artifacts into the run
//! directory and records its stage in the run's stats document:
//!
//! ```text
//!  scan ──────────────► R (partitioned), ED list     stage "scanner"
//!  partition before ──► A (partitioned)              stage "dbdump_before"
//!  partition after ───► B (partitioned)              stage "dbdump_after"
//!  cmp3 (A, R, B) ────► D list, M list               stage "cmp3"
//! ```
//!
//! Actions on the lists are driven by [`crate::confirm::RunConfirmationEngine`].

use crate::config::{DumpKind, ListingSettings, SiteConfig};
use crate::error::{Result, RunError};
use crate::reconcile::{ReconcileResult, SetReconciler};
use crate::remote::{RemoteLister, ServerPool, XrdClient};
use crate::runs::{stages, utc_now, Artifact, RunDir, RunId, StageStatus};
use crate::scanner::{ScanCoordinator, ScanProgress, ScanRecord, ScanResult};
use crate::store::{IngestFilter, IngestStats, ListWriter, PartitionedReader, PartitionedWriter};
use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Interval between progress callbacks during a scan
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Listing client for the site, resolving the redirector when configured
pub fn listing_client(settings: &ListingSettings) -> XrdClient {
    let pool = if settings.resolve_servers {
        ServerPool::resolve(&settings.program, &settings.server, settings.timeout)
    } else {
        ServerPool::single(&settings.server)
    };
    XrdClient::new(&settings.program, pool, &settings.server_root, settings.timeout)
}

/// Run directory of the site
pub fn run_dir(site: &SiteConfig) -> RunDir {
    RunDir::new(&site.runs_dir).with_compression(site.compress)
}

/// Run named by `timestamp` (`YYYY_MM_DD_HH_MM`), or the newest existing
/// run, or a new run stamped `now` when there is none.
pub fn select_run(
    dir: &RunDir,
    rse: &str,
    timestamp: Option<&str>,
    now: NaiveDateTime,
) -> Result<RunId> {
    if let Some(ts) = timestamp {
        return Ok(RunId::parse(&format!("{}_{}", rse, ts))?);
    }
    Ok(dir
        .runs(rse)?
        .pop()
        .unwrap_or_else(|| RunId::new(rse, now)))
}

fn now_string() -> String {
    utc_now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn started() -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("status".into(), json!(StageStatus::Started));
    fields.insert("start_time".into(), json!(now_string()));
    fields
}

fn finished(status: StageStatus, mut fields: Map<String, Value>) -> Map<String, Value> {
    fields.insert("status".into(), json!(status));
    fields.insert("end_time".into(), json!(now_string()));
    fields
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| {
        RunError::Io {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// Totals of a scan over all roots
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub roots: Vec<ScanResult>,
    pub files: u64,
    pub directories: u64,
    pub empty_directories: u64,
    pub total_size: u64,
    pub failed: bool,
    pub elapsed: Duration,
}

/// Scan `roots` into `run`: scanned files go to the partitioned R store in
/// catalog names, empty directories to the ED list in site paths.
pub fn scan_run(
    site: &SiteConfig,
    lister: Arc<dyn RemoteLister>,
    run: &RunId,
    roots: &[String],
    mut observe: impl FnMut(&str, &ScanProgress),
) -> Result<ScanSummary> {
    let start = Instant::now();
    let dir = run_dir(site);
    ensure_dir(dir.root())?;
    dir.update_stage(run, stages::SCANNER, started())?;

    let (mut summary, stored) = match scan_roots(site, lister, &dir, run, roots, &mut observe) {
        Ok(scanned) => scanned,
        Err(e) => {
            error!(run = %run, error = %e, "Scan aborted");
            let mut fields = Map::new();
            fields.insert("error".into(), json!(e.to_string()));
            dir.update_stage(run, stages::SCANNER, finished(StageStatus::Failed, fields))?;
            return Err(e);
        }
    };
    summary.elapsed = start.elapsed();

    let mut fields = Map::new();
    fields.insert("files".into(), json!(summary.files));
    fields.insert("directories".into(), json!(summary.directories));
    fields.insert("empty_directories".into(), json!(summary.empty_directories));
    fields.insert("total_size".into(), json!(summary.total_size));
    fields.insert("stored".into(), json!(stored));
    fields.insert("partitions".into(), json!(site.partitions));
    fields.insert("root_failed".into(), json!(summary.failed));
    fields.insert("roots".into(), json!(summary.roots));
    fields.insert("elapsed".into(), json!(summary.elapsed.as_secs_f64()));
    let status = if summary.failed {
        StageStatus::Failed
    } else {
        StageStatus::Done
    };
    dir.update_stage(run, stages::SCANNER, finished(status, fields))?;

    info!(
        run = %run,
        files = summary.files,
        directories = summary.directories,
        empty = summary.empty_directories,
        status = %status,
        "Scan recorded"
    );
    Ok(summary)
}

/// Scan every root into the run's R store and ED list.
/// Returns the totals and the number of paths stored in R.
fn scan_roots(
    site: &SiteConfig,
    lister: Arc<dyn RemoteLister>,
    dir: &RunDir,
    run: &RunId,
    roots: &[String],
    observe: &mut impl FnMut(&str, &ScanProgress),
) -> Result<(ScanSummary, u64)> {
    let mut files_out = PartitionedWriter::create(
        site.partitions,
        dir.path(run, Artifact::Scan),
        site.compress,
    )?;
    let mut empty_out = ListWriter::create(dir.path(run, Artifact::EmptyDirs))?;
    let mut summary = ScanSummary::default();

    for root in roots {
        let coordinator = ScanCoordinator::new(Arc::clone(&lister), site.scan_settings(root));
        let handle = coordinator.start()?;
        let progress = handle.progress();
        let mut last_update = Instant::now();

        for record in handle.records().iter() {
            match record {
                ScanRecord::File { path, .. } => files_out.add(&site.rewrite.apply(&path))?,
                ScanRecord::EmptyDirectory(path) => empty_out.add(&path)?,
                ScanRecord::Directory(_) => {}
            }
            if last_update.elapsed() >= PROGRESS_INTERVAL {
                observe(root.as_str(), progress.as_ref());
                last_update = Instant::now();
            }
        }
        observe(root.as_str(), progress.as_ref());

        let result = handle.join()?;
        if result.root_failed {
            error!(
                root = %result.root,
                reason = result.failure_reason.as_deref().unwrap_or("unknown"),
                "Root scan failed"
            );
            summary.failed = true;
        }
        summary.files += result.files;
        summary.directories += result.directories;
        summary.empty_directories += result.empty_directories;
        summary.total_size += result.total_size;
        summary.roots.push(result);
    }

    let stored = files_out.close()?;
    empty_out.close()?;
    Ok((summary, stored))
}

/// Ingest a flat catalog dump into `run`'s A or B store
pub fn partition_dump(
    site: &SiteConfig,
    run: &RunId,
    dump: DumpKind,
    input: &Path,
) -> Result<IngestStats> {
    let (stage, artifact) = match dump {
        DumpKind::Before => (stages::DBDUMP_BEFORE, Artifact::CatalogBefore),
        DumpKind::After => (stages::DBDUMP_AFTER, Artifact::CatalogAfter),
    };
    let dir = run_dir(site);
    ensure_dir(dir.root())?;
    dir.update_stage(run, stage, started())?;

    let filter = IngestFilter {
        prefix: site.dump_prefix.clone(),
        rewrite: None,
    };
    let ingested = PartitionedWriter::create(site.partitions, dir.path(run, artifact), site.compress)
        .and_then(|mut writer| {
            let stats = writer.ingest_file(input, &filter)?;
            writer.close()?;
            Ok(stats)
        });

    match ingested {
        Ok(stats) => {
            let mut fields = Map::new();
            fields.insert("files".into(), json!(stats.stored));
            fields.insert("lines".into(), json!(stats.lines));
            fields.insert("dropped".into(), json!(stats.dropped));
            fields.insert("input".into(), json!(input.display().to_string()));
            dir.update_stage(run, stage, finished(StageStatus::Done, fields))?;
            info!(run = %run, stage, files = stats.stored, "Catalog dump partitioned");
            Ok(stats)
        }
        Err(e) => {
            let mut fields = Map::new();
            fields.insert("error".into(), json!(e.to_string()));
            dir.update_stage(run, stage, finished(StageStatus::Failed, fields))?;
            Err(e.into())
        }
    }
}

/// Three-way comparison of `run`'s A, R and B stores into its D and M lists
pub fn compare_run(site: &SiteConfig, run: &RunId) -> Result<ReconcileResult> {
    let dir = run_dir(site);
    let stats = dir.load_stats(run)?;
    for stage in [stages::DBDUMP_BEFORE, stages::SCANNER, stages::DBDUMP_AFTER] {
        if stats.stage_status(stage) != Some(StageStatus::Done) {
            return Err(RunError::StageNotDone {
                run: run.name(),
                stage: stage.to_string(),
            }
            .into());
        }
    }
    dir.update_stage(run, stages::CMP3, started())?;

    let compared = (|| -> Result<ReconcileResult> {
        let reconciler = SetReconciler::new(
            PartitionedReader::open(dir.path(run, Artifact::CatalogBefore))?,
            PartitionedReader::open(dir.path(run, Artifact::Scan))?,
            PartitionedReader::open(dir.path(run, Artifact::CatalogAfter))?,
        )?;
        Ok(reconciler.run(
            &dir.path(run, Artifact::Dark),
            &dir.path(run, Artifact::Missing),
        )?)
    })();

    match compared {
        Ok(result) => {
            let mut fields = match serde_json::to_value(&result) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            fields.insert("elapsed".into(), json!(result.elapsed.as_secs_f64()));
            dir.update_stage(run, stages::CMP3, finished(StageStatus::Done, fields))?;
            Ok(result)
        }
        Err(e) => {
            warn!(run = %run, error = %e, "Comparison failed");
            let mut fields = Map::new();
            fields.insert("error".into(), json!(e.to_string()));
            dir.update_stage(run, stages::CMP3, finished(StageStatus::Failed, fields))?;
            Err(e)
        }
    }
}
