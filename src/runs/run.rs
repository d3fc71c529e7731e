//! Run identifiers and the run directory

use crate::error::{RunError, RunResult};
use crate::runs::stats::RunStats;
use chrono::{NaiveDateTime, Timelike};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Timestamp layout embedded in run names
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M";

const TIMESTAMP_FIELDS: usize = 5;
const STATS_SUFFIX: &str = "_stats.json";

/// Clock for run names, run ages and stage stamps.
///
/// Always UTC, so that run names and ages agree whatever the host timezone.
pub fn utc_now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// One audit cycle of one RSE
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    rse: String,
    timestamp: NaiveDateTime,
}

impl RunId {
    /// Create a run id; seconds are dropped since names carry minutes only
    pub fn new(rse: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        let timestamp = timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(timestamp);
        Self {
            rse: rse.into(),
            timestamp,
        }
    }

    /// Run id for the current UTC minute
    pub fn now(rse: impl Into<String>) -> Self {
        Self::new(rse, utc_now())
    }

    /// Parse `{RSE}_{YYYY_MM_DD_HH_MM}`.
    ///
    /// RSE names may contain underscores, so the timestamp is always taken
    /// from the last five fields.
    pub fn parse(name: &str) -> RunResult<Self> {
        let invalid = |reason: &str| RunError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = name.split('_').collect();
        if fields.len() <= TIMESTAMP_FIELDS {
            return Err(invalid("expected {RSE}_{YYYY_MM_DD_HH_MM}"));
        }
        let split = fields.len() - TIMESTAMP_FIELDS;
        let rse = fields[..split].join("_");
        if rse.is_empty() {
            return Err(invalid("empty RSE name"));
        }
        let stamp = fields[split..].join("_");
        let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
            .map_err(|e| invalid(&format!("bad timestamp '{}': {}", stamp, e)))?;

        Ok(Self { rse, timestamp })
    }

    pub fn rse(&self) -> &str {
        &self.rse
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// `{RSE}_{YYYY_MM_DD_HH_MM}`
    pub fn name(&self) -> String {
        format!("{}_{}", self.rse, self.timestamp.format(TIMESTAMP_FORMAT))
    }

    /// Age of the run at `now`
    pub fn age(&self, now: NaiveDateTime) -> chrono::Duration {
        now - self.timestamp
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Ord for RunId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.rse.cmp(&other.rse))
    }
}

impl PartialOrd for RunId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Artifacts a run owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Stage records (`_stats.json`)
    Stats,
    /// Dark list (`_D.list`)
    Dark,
    /// Missing list (`_M.list`)
    Missing,
    /// Empty directory list (`_ED.list`)
    EmptyDirs,
    /// Catalog dump before the scan (partitioned, `_A.NNNNN`)
    CatalogBefore,
    /// Storage scan (partitioned, `_R.NNNNN`)
    Scan,
    /// Catalog dump after the scan (partitioned, `_B.NNNNN`)
    CatalogAfter,
}

impl Artifact {
    pub fn tag(&self) -> &'static str {
        match self {
            Artifact::Stats => "stats",
            Artifact::Dark => "D",
            Artifact::Missing => "M",
            Artifact::EmptyDirs => "ED",
            Artifact::CatalogBefore => "A",
            Artifact::Scan => "R",
            Artifact::CatalogAfter => "B",
        }
    }

    /// Partitioned artifacts are addressed by prefix, not by file
    pub fn is_partitioned(&self) -> bool {
        matches!(
            self,
            Artifact::CatalogBefore | Artifact::Scan | Artifact::CatalogAfter
        )
    }
}

/// Directory holding every run of one or more RSEs
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
    compress_lists: bool,
}

impl RunDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress_lists: false,
        }
    }

    /// Write new lists gzip-compressed
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress_lists = compress;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compresses_lists(&self) -> bool {
        self.compress_lists
    }

    /// Path an artifact of `run` is written to.
    ///
    /// For partitioned artifacts this is the store prefix.
    pub fn path(&self, run: &RunId, artifact: Artifact) -> PathBuf {
        let base = format!("{}_{}", run.name(), artifact.tag());
        let name = match artifact {
            Artifact::Stats => format!("{}.json", base),
            a if a.is_partitioned() => base,
            _ if self.compress_lists => format!("{}.list.gz", base),
            _ => format!("{}.list", base),
        };
        self.root.join(name)
    }

    /// Existing list file of `run`, compressed or not
    pub fn find_list(&self, run: &RunId, artifact: Artifact) -> Option<PathBuf> {
        let base = format!("{}_{}.list", run.name(), artifact.tag());
        [base.clone(), format!("{}.gz", base)]
            .into_iter()
            .map(|name| self.root.join(name))
            .find(|p| p.is_file())
    }

    /// All runs of `rse`, oldest first
    pub fn runs(&self, rse: &str) -> RunResult<Vec<RunId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RunError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RunError::Io {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(STATS_SUFFIX)) else {
                continue;
            };
            match RunId::parse(stem) {
                Ok(run) if run.rse() == rse => runs.push(run),
                Ok(_) => {}
                Err(e) => debug!(file = %stem, error = %e, "Skipping unrecognized stats file"),
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Stats document of `run`; a run without one has empty stats
    pub fn load_stats(&self, run: &RunId) -> RunResult<RunStats> {
        let path = self.path(run, Artifact::Stats);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RunStats::new()),
            Err(source) => return Err(RunError::Io { path, source }),
        };
        RunStats::from_json(&text).map_err(|reason| RunError::InvalidStats { path, reason })
    }

    /// Replace the stats document of `run`.
    ///
    /// Written to a temporary file and renamed so readers never see a
    /// partial document.
    pub fn save_stats(&self, run: &RunId, stats: &RunStats) -> RunResult<()> {
        let path = self.path(run, Artifact::Stats);
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| RunError::Io {
            path: tmp.clone(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(|source| RunError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(stats.to_json_pretty().as_bytes())
            .map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(|source| RunError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Merge `fields` into one stage of `run`'s stats
    pub fn update_stage(
        &self,
        run: &RunId,
        stage: &str,
        fields: Map<String, Value>,
    ) -> RunResult<RunStats> {
        let mut stats = match self.load_stats(run) {
            Ok(s) => s,
            Err(RunError::InvalidStats { path, reason }) => {
                warn!(path = %path.display(), %reason, "Replacing unreadable stats file");
                RunStats::new()
            }
            Err(e) => return Err(e),
        };
        stats.merge_stage(stage, fields);
        self.save_stats(run, &stats)?;
        Ok(stats)
    }
}
