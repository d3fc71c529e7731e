//! Actions taken on a confirmed list

use crate::catalog::ReplicaCatalog;
use crate::error::{ConfigError, ConsistencyError, Result};
use crate::path::strip_path;
use crate::remover::EmptyDirectoryRemover;
use crate::store::write_list;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Paths sent to the catalog per call
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// What an action did with the confirmed list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionReport {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,

    /// Failure counts keyed by reason (with the path removed)
    pub failures: BTreeMap<String, u64>,
}

impl ActionReport {
    pub fn failed(&self) -> u64 {
        self.failures.values().sum()
    }
}

/// Destructive or declarative step applied to a confirmed list.
///
/// An `Err` means the action itself broke (the stage is recorded failed);
/// per-item refusals are reported in [`ActionReport::failures`].
pub trait ConfirmedAction {
    fn apply(&self, paths: &[String]) -> Result<ActionReport>;
}

/// Quarantine confirmed dark replicas
pub struct QuarantineAction<'a> {
    catalog: &'a dyn ReplicaCatalog,
    rse: String,
    batch_size: usize,
}

impl<'a> QuarantineAction<'a> {
    pub fn new(catalog: &'a dyn ReplicaCatalog, rse: impl Into<String>, batch_size: usize) -> Self {
        Self {
            catalog,
            rse: rse.into(),
            batch_size: batch_size.max(1),
        }
    }
}

impl ConfirmedAction for QuarantineAction<'_> {
    fn apply(&self, paths: &[String]) -> Result<ActionReport> {
        let mut report = ActionReport::default();
        for (i, batch) in paths.chunks(self.batch_size).enumerate() {
            debug!(rse = %self.rse, batch = i, size = batch.len(), "Quarantining batch");
            report.attempted += batch.len() as u64;
            self.catalog.quarantine(&self.rse, batch)?;
            report.succeeded += batch.len() as u64;
        }
        info!(rse = %self.rse, quarantined = report.succeeded, "Dark replicas quarantined");
        Ok(report)
    }
}

/// Declare confirmed missing replicas
pub struct DeclareMissingAction<'a> {
    catalog: &'a dyn ReplicaCatalog,
    rse: String,
    reason: String,
    batch_size: usize,
}

impl<'a> DeclareMissingAction<'a> {
    pub fn new(
        catalog: &'a dyn ReplicaCatalog,
        rse: impl Into<String>,
        reason: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            catalog,
            rse: rse.into(),
            reason: reason.into(),
            batch_size: batch_size.max(1),
        }
    }
}

impl ConfirmedAction for DeclareMissingAction<'_> {
    fn apply(&self, paths: &[String]) -> Result<ActionReport> {
        let mut report = ActionReport::default();
        for (i, batch) in paths.chunks(self.batch_size).enumerate() {
            debug!(rse = %self.rse, batch = i, size = batch.len(), "Declaring batch missing");
            report.attempted += batch.len() as u64;
            let refused = self
                .catalog
                .declare_missing(&self.rse, batch, &self.reason)?;
            report.succeeded += (batch.len() - refused.len().min(batch.len())) as u64;
            for failure in refused {
                *report
                    .failures
                    .entry(strip_path(&failure.reason, &failure.path))
                    .or_insert(0) += 1;
            }
        }
        info!(
            rse = %self.rse,
            declared = report.succeeded,
            refused = report.failed(),
            "Missing replicas declared"
        );
        Ok(report)
    }
}

/// Remove confirmed empty directories
pub struct RemoveEmptyDirectoriesAction<'a> {
    remover: &'a EmptyDirectoryRemover,
}

impl<'a> RemoveEmptyDirectoriesAction<'a> {
    pub fn new(remover: &'a EmptyDirectoryRemover) -> Self {
        Self { remover }
    }
}

impl ConfirmedAction for RemoveEmptyDirectoriesAction<'_> {
    fn apply(&self, paths: &[String]) -> Result<ActionReport> {
        let removal = self.remover.remove(paths)?;
        Ok(ActionReport {
            attempted: removal.attempted,
            succeeded: removal.removed,
            skipped: removal.skipped.len() as u64 + removal.not_attempted,
            failures: removal.failures_by_reason(),
        })
    }
}

/// Catalog action of a site with no catalog command configured.
///
/// Dry runs never call it; acting fails with the missing parameter.
pub struct UnconfiguredCatalog {
    pub rse: String,
}

impl ConfirmedAction for UnconfiguredCatalog {
    fn apply(&self, _paths: &[String]) -> Result<ActionReport> {
        Err(ConfigError::Missing {
            rse: self.rse.clone(),
            param: "catalog_command".into(),
        }
        .into())
    }
}

/// Where a confirmed list is written: `-` for stdout, otherwise a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    pub fn parse(s: &str) -> Self {
        if s == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(s))
        }
    }

    /// Write one path per line
    pub fn write_paths(&self, paths: &[String]) -> Result<u64> {
        match self {
            OutputTarget::Stdout => {
                let stdout = io::stdout();
                let mut out = BufWriter::new(stdout.lock());
                for path in paths {
                    writeln!(out, "{}", path)?;
                }
                out.flush()?;
                Ok(paths.len() as u64)
            }
            OutputTarget::File(path) => write_list(path, paths).map_err(ConsistencyError::from),
        }
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("-"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeclarationFailure;
    use crate::error::CatalogError;
    use crate::store::read_list;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeCatalog {
        batches: Mutex<Vec<usize>>,
        fail_quarantine: bool,
    }

    impl ReplicaCatalog for FakeCatalog {
        fn quarantine(&self, _: &str, paths: &[String]) -> std::result::Result<(), CatalogError> {
            if self.fail_quarantine {
                return Err(CatalogError::Declaration("catalog unavailable".into()));
            }
            self.batches.lock().push(paths.len());
            Ok(())
        }

        fn declare_missing(
            &self,
            _: &str,
            paths: &[String],
            _: &str,
        ) -> std::result::Result<Vec<DeclarationFailure>, CatalogError> {
            self.batches.lock().push(paths.len());
            Ok(paths
                .iter()
                .filter(|p| p.ends_with("locked"))
                .map(|p| DeclarationFailure {
                    path: p.clone(),
                    reason: format!("replica {} is locked", p),
                })
                .collect())
        }
    }

    fn paths(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/store/f{}", i)).collect()
    }

    #[test]
    fn test_quarantine_batches() {
        let catalog = FakeCatalog::default();
        let report = QuarantineAction::new(&catalog, "SITE", DEFAULT_BATCH_SIZE)
            .apply(&paths(2500))
            .unwrap();
        assert_eq!(*catalog.batches.lock(), vec![1000, 1000, 500]);
        assert_eq!(report.succeeded, 2500);
    }

    #[test]
    fn test_quarantine_error_propagates() {
        let catalog = FakeCatalog {
            fail_quarantine: true,
            ..Default::default()
        };
        let err = QuarantineAction::new(&catalog, "SITE", 10)
            .apply(&paths(3))
            .unwrap_err();
        assert!(matches!(err, ConsistencyError::Catalog(_)));
    }

    #[test]
    fn test_declare_missing_aggregates_refusals() {
        let catalog = FakeCatalog::default();
        let mut list = paths(4);
        list.push("/store/a_locked".into());
        list.push("/store/b_locked".into());

        let report = DeclareMissingAction::new(&catalog, "SITE", "not on disk", 4)
            .apply(&list)
            .unwrap();
        assert_eq!(report.attempted, 6);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(*catalog.batches.lock(), vec![4, 2]);
    }

    #[test]
    fn test_output_target() {
        assert_eq!(OutputTarget::parse("-"), OutputTarget::Stdout);
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("out.list");
        let target = OutputTarget::parse(file.to_str().unwrap());
        assert_eq!(target.write_paths(&paths(3)).unwrap(), 3);
        assert_eq!(read_list(&file).unwrap(), paths(3));
    }
}
