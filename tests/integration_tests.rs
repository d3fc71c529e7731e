//! Integration tests for rse-consistency
//!
//! These tests drive whole runs (dump ingestion, scan, comparison and
//! confirmed actions) against an in-memory namespace and catalog.

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rse_consistency::catalog::{DeclarationFailure, ReplicaCatalog};
use rse_consistency::config::{DumpKind, RawConfig, SiteConfig};
use rse_consistency::confirm::{
    ActionKind, ActionOptions, DeclareMissingAction, QuarantineAction,
    RemoveEmptyDirectoriesAction, RunConfirmationEngine,
};
use rse_consistency::error::{CatalogError, ListingError, ListingResult};
use rse_consistency::path::{is_descendant, parent};
use rse_consistency::pipeline::{compare_run, partition_dump, run_dir, scan_run};
use rse_consistency::remote::{Listing, RemoteEntry, RemoteLister};
use rse_consistency::remover::EmptyDirectoryRemover;
use rse_consistency::runs::{Artifact, RunId, StageStatus};
use rse_consistency::store::read_list;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// In-memory storage namespace
#[derive(Default)]
struct Namespace {
    dirs: Mutex<BTreeSet<String>>,
    files: HashMap<String, u64>,
    removed: Mutex<Vec<String>>,
}

impl Namespace {
    fn new(dirs: &[&str], files: &[&str]) -> Self {
        Self {
            dirs: Mutex::new(dirs.iter().map(|d| d.to_string()).collect()),
            files: files.iter().map(|f| (f.to_string(), 100)).collect(),
            ..Default::default()
        }
    }
}

impl RemoteLister for Namespace {
    fn list(&self, location: &str, recursive: bool, _: bool) -> ListingResult<Listing> {
        let dirs = self.dirs.lock();
        if !dirs.contains(location) {
            return Err(ListingError::Failed {
                path: location.to_string(),
                reason: "no such directory".into(),
            });
        }
        let below = |p: &str| {
            if recursive {
                is_descendant(p, location)
            } else {
                parent(p) == Some(location)
            }
        };
        Ok(Listing {
            directories: dirs
                .iter()
                .filter(|d| below(d.as_str()))
                .map(|d| RemoteEntry::new(d.clone(), None))
                .collect(),
            files: self
                .files
                .iter()
                .filter(|(f, _)| below(f.as_str()))
                .map(|(f, size)| RemoteEntry::new(f.clone(), Some(*size)))
                .collect(),
        })
    }

    fn remove_dir(&self, location: &str) -> ListingResult<()> {
        if self.dirs.lock().remove(location) {
            self.removed.lock().push(location.to_string());
            Ok(())
        } else {
            Err(ListingError::Failed {
                path: location.to_string(),
                reason: "no such directory".into(),
            })
        }
    }
}

#[derive(Default)]
struct Catalog {
    quarantined: Mutex<Vec<String>>,
    declared: Mutex<Vec<String>>,
}

impl ReplicaCatalog for Catalog {
    fn quarantine(&self, _: &str, paths: &[String]) -> Result<(), CatalogError> {
        self.quarantined.lock().extend_from_slice(paths);
        Ok(())
    }

    fn declare_missing(
        &self,
        _: &str,
        paths: &[String],
        _: &str,
    ) -> Result<Vec<DeclarationFailure>, CatalogError> {
        self.declared.lock().extend_from_slice(paths);
        Ok(Vec::new())
    }
}

fn site(runs: &Path) -> SiteConfig {
    let text = format!(
        r#"
        [defaults]
        server = "localhost"
        runs_dir = "{}"
        partitions = 4
        compress = true
        stagger_ms = 0
        remove_stagger_ms = 0
        workers = 2

        [rse.SITE]
        roots = ["/site/store"]
        rewrite_remove = "/site"
        rewrite_add = ""

        [defaults.dark]
        max_fraction = 0.5
        [defaults.missing]
        max_fraction = 0.5
        [defaults.empty]
        max_fraction = 0.5
        "#,
        runs.display()
    );
    RawConfig::parse(&text, Path::new("test.toml"))
        .unwrap()
        .site("SITE")
        .unwrap()
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

struct Fixture {
    tmp: TempDir,
    site: SiteConfig,
    namespace: Arc<Namespace>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let site = site(&tmp.path().join("runs"));
        let namespace = Arc::new(Namespace::new(
            &[
                "/site/store",
                "/site/store/a",
                "/site/store/a/empty1",
                "/site/store/b",
            ],
            &[
                "/site/store/a/f1",
                "/site/store/a/dark1",
                "/site/store/b/f2",
            ],
        ));
        Self {
            tmp,
            site,
            namespace,
        }
    }

    fn dump(&self, name: &str, paths: &[&str]) -> std::path::PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, paths.join("\n")).unwrap();
        path
    }

    /// One complete run: dump before, scan, dump after, comparison
    fn full_run(&self, day: u32) -> RunId {
        let run = RunId::new("SITE", at(day, 0));
        let before = self.dump("before.txt", &["/store/a/f1", "/store/b/f2", "/store/b/lost"]);
        let after = self.dump(
            "after.txt",
            &["/store/a/f1", "/store/b/f2", "/store/b/lost", "/store/b/new"],
        );

        partition_dump(&self.site, &run, DumpKind::Before, &before).unwrap();
        let lister: Arc<dyn RemoteLister> = self.namespace.clone();
        let summary = scan_run(&self.site, lister, &run, &self.site.roots, |_, _| {}).unwrap();
        assert!(!summary.failed);
        partition_dump(&self.site, &run, DumpKind::After, &after).unwrap();
        compare_run(&self.site, &run).unwrap();
        run
    }
}

#[test]
fn test_single_run_lists() {
    let fx = Fixture::new();
    let run = fx.full_run(1);
    let dir = run_dir(&fx.site);

    let dark = read_list(dir.find_list(&run, Artifact::Dark).unwrap()).unwrap();
    let missing = read_list(dir.find_list(&run, Artifact::Missing).unwrap()).unwrap();
    let empty = read_list(dir.find_list(&run, Artifact::EmptyDirs).unwrap()).unwrap();
    assert_eq!(dark, vec!["/store/a/dark1"]);
    assert_eq!(missing, vec!["/store/b/lost"]);
    assert_eq!(empty, vec!["/site/store/a/empty1"]);

    let stats = dir.load_stats(&run).unwrap();
    for stage in ["dbdump_before", "scanner", "dbdump_after", "cmp3"] {
        assert_eq!(stats.stage_status(stage), Some(StageStatus::Done), "{}", stage);
    }
    assert_eq!(stats.get_u64("scanner", "files"), Some(3));
    assert_eq!(stats.get_u64("cmp3", "dark"), Some(1));
    assert_eq!(stats.get_u64("cmp3", "missing"), Some(1));
    assert_eq!(stats.overall_status(), Some(StageStatus::Done));
}

#[test]
fn test_confirmed_actions_over_three_runs() {
    let fx = Fixture::new();
    for day in 1..=3 {
        fx.full_run(day);
    }
    let now = at(3, 12);
    let engine = RunConfirmationEngine::new(run_dir(&fx.site), "SITE");
    let catalog = Catalog::default();
    let options = ActionOptions::default();

    let dark = engine
        .execute(
            ActionKind::Dark,
            fx.site.policy(ActionKind::Dark),
            &QuarantineAction::new(&catalog, "SITE", options.batch_size),
            &options,
            now,
        )
        .unwrap();
    assert_eq!(dark.status, StageStatus::Done);
    assert_eq!(dark.runs.len(), 3);
    assert_eq!(*catalog.quarantined.lock(), vec!["/store/a/dark1"]);

    let missing = engine
        .execute(
            ActionKind::Missing,
            fx.site.policy(ActionKind::Missing),
            &DeclareMissingAction::new(&catalog, "SITE", "lost", options.batch_size),
            &options,
            now,
        )
        .unwrap();
    assert_eq!(missing.status, StageStatus::Done);
    assert_eq!(*catalog.declared.lock(), vec!["/store/b/lost"]);

    let lister: Arc<dyn RemoteLister> = fx.namespace.clone();
    let remover = EmptyDirectoryRemover::new(lister, fx.site.remover.clone());
    let empty = engine
        .execute(
            ActionKind::EmptyDirectories,
            fx.site.policy(ActionKind::EmptyDirectories),
            &RemoveEmptyDirectoriesAction::new(&remover),
            &options,
            now,
        )
        .unwrap();
    assert_eq!(empty.status, StageStatus::Done);
    assert_eq!(*fx.namespace.removed.lock(), vec!["/site/store/a/empty1"]);

    // Stage records land in the newest run
    let latest = RunId::new("SITE", at(3, 0));
    let stats = run_dir(&fx.site).load_stats(&latest).unwrap();
    for stage in ["dark_action", "missing_action", "empty_action"] {
        assert_eq!(stats.stage_status(stage), Some(StageStatus::Done), "{}", stage);
    }
}

#[test]
fn test_single_run_is_not_enough() {
    let fx = Fixture::new();
    let run = fx.full_run(1);
    let catalog = Catalog::default();
    let engine = RunConfirmationEngine::new(run_dir(&fx.site), "SITE");

    let outcome = engine
        .execute(
            ActionKind::Dark,
            fx.site.policy(ActionKind::Dark),
            &QuarantineAction::new(&catalog, "SITE", 1000),
            &ActionOptions::default(),
            at(1, 6),
        )
        .unwrap();
    assert_eq!(outcome.status, StageStatus::Aborted);
    assert_eq!(outcome.abort_code, Some("insufficient_history"));
    assert!(catalog.quarantined.lock().is_empty());

    let stats = run_dir(&fx.site).load_stats(&run).unwrap();
    assert_eq!(stats.stage_status("dark_action"), Some(StageStatus::Aborted));
    assert_eq!(stats.overall_status(), Some(StageStatus::Aborted));
}

#[test]
fn test_cmp3_rejects_mismatched_partitions() {
    let fx = Fixture::new();
    let run = fx.full_run(1);

    // Re-ingest the after dump with a different partition count
    let mut other = fx.site.clone();
    other.partitions = 7;
    let after = fx.dump("after2.txt", &["/store/a/f1"]);
    partition_dump(&other, &run, DumpKind::After, &after).unwrap();

    let err = compare_run(&fx.site, &run).unwrap_err();
    assert!(err.to_string().contains("artition"), "{}", err);
    let stats = run_dir(&fx.site).load_stats(&run).unwrap();
    assert_eq!(stats.stage_status("cmp3"), Some(StageStatus::Failed));
}
