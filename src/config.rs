//! Configuration types for rse-consistency
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The TOML site configuration (`[defaults]` plus `[rse.NAME]` overrides)
//! - Per-RSE resolution into a validated [`SiteConfig`]

use crate::confirm::{ActionKind, ConfirmationPolicy, OutputTarget};
use crate::error::ConfigError;
use crate::path::{normalize, PrefixRewrite};
use crate::remover::{RemoverSettings, DEFAULT_DEPTH_FLOOR};
use crate::scanner::{IgnoreList, ScanSettings};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Default configuration file
pub const DEFAULT_CONFIG: &str = "rse-consistency.toml";

/// Storage consistency auditing for grid storage endpoints
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rse-consistency",
    version,
    about = "Storage consistency auditing: scan, reconcile, confirm and act",
    long_about = "Scans an RSE's namespace through xrdfs, reconciles it against catalog dumps \
                  taken before and after the scan, and acts on dark files, missing files and \
                  empty directories once they are confirmed across several runs.",
    after_help = "EXAMPLES:\n    \
        rse-consistency scan SITE_DISK\n    \
        rse-consistency partition SITE_DISK before dump_before.txt.gz\n    \
        rse-consistency partition SITE_DISK after dump_after.txt.gz\n    \
        rse-consistency cmp3 SITE_DISK\n    \
        rse-consistency action dark SITE_DISK --dry-run -o -\n    \
        rse-consistency runs SITE_DISK"
)]
pub struct CliArgs {
    /// Site configuration file
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG, value_name = "FILE")]
    pub config: PathBuf,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan the RSE's roots into a new run
    Scan {
        /// RSE name
        rse: String,

        /// Run timestamp (YYYY_MM_DD_HH_MM), now if not set
        #[arg(long, value_name = "TIMESTAMP")]
        run: Option<String>,

        /// Scan only these roots instead of the configured ones
        #[arg(long = "root", value_name = "PATH", action = clap::ArgAction::Append)]
        roots: Vec<String>,

        /// Number of scanner threads
        #[arg(short = 'w', long, value_name = "NUM")]
        workers: Option<usize>,
    },

    /// Split a flat catalog dump into a run's partitioned store
    Partition {
        /// RSE name
        rse: String,

        /// Which dump this is
        #[arg(value_enum)]
        dump: DumpKind,

        /// Flat dump file, one path per line (gzip when ending in .gz)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Run timestamp, the newest run if not set
        #[arg(long, value_name = "TIMESTAMP")]
        run: Option<String>,
    },

    /// Three-way comparison of catalog before, scan and catalog after
    Cmp3 {
        /// RSE name
        rse: String,

        /// Run timestamp, the newest run if not set
        #[arg(long, value_name = "TIMESTAMP")]
        run: Option<String>,
    },

    /// Confirm a list across runs and act on it
    Action {
        /// Which list to act on
        #[arg(value_enum)]
        kind: ActionArg,

        /// RSE name
        rse: String,

        /// Write the confirmed list instead of acting
        #[arg(long)]
        dry_run: bool,

        /// Confirmed list output ('-' for stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<String>,

        /// Stop after this many directory removals
        #[arg(long, value_name = "NUM")]
        max_removals: Option<usize>,
    },

    /// Show the run history of an RSE
    Runs {
        /// RSE name
        rse: String,
    },
}

/// Catalog dump position relative to the scan
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Before,
    After,
}

/// Action selector on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionArg {
    Dark,
    Missing,
    Empty,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Dark => ActionKind::Dark,
            ActionArg::Missing => ActionKind::Missing,
            ActionArg::Empty => ActionKind::EmptyDirectories,
        }
    }
}

impl CliArgs {
    /// Parsed `-o` target of an action
    pub fn output_target(&self) -> Option<OutputTarget> {
        match &self.command {
            Command::Action {
                output: Some(out), ..
            } => Some(OutputTarget::parse(out)),
            _ => None,
        }
    }
}

/// Confirmation parameters of one action, all optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyParams {
    pub window_days: Option<u32>,
    pub min_runs: Option<usize>,
    pub max_age_last_run_hours: Option<u32>,
    pub min_age_first_run_hours: Option<u32>,
    pub max_fraction: Option<f64>,
}

/// Parameters of one configuration level, all optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    // Where runs live
    pub runs_dir: Option<PathBuf>,
    pub partitions: Option<usize>,
    pub compress: Option<bool>,

    // Remote access
    pub xrdfs: Option<String>,
    pub server: Option<String>,
    pub server_root: Option<String>,
    pub resolve_servers: Option<bool>,
    pub timeout_secs: Option<u64>,

    // Scanner
    pub roots: Option<Vec<String>>,
    pub workers: Option<usize>,
    pub recursion_threshold: Option<usize>,
    pub include_sizes: Option<bool>,
    pub fail_on_dir_errors: Option<bool>,
    pub stagger_ms: Option<u64>,
    pub output_buffer: Option<usize>,
    pub ignore: Option<Vec<String>>,

    // Namespace mapping
    pub rewrite_remove: Option<String>,
    pub rewrite_add: Option<String>,
    pub dump_prefix: Option<String>,

    // Catalog
    pub catalog_command: Option<String>,
    pub catalog_timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub missing_reason: Option<String>,

    // Remover
    pub remove_workers: Option<usize>,
    pub remove_stagger_ms: Option<u64>,
    pub max_removals: Option<usize>,

    // Confirmation
    pub dark: Option<PolicyParams>,
    pub missing: Option<PolicyParams>,
    pub empty: Option<PolicyParams>,
}

impl Params {
    fn policy(&self, kind: ActionKind) -> Option<&PolicyParams> {
        match kind {
            ActionKind::Dark => self.dark.as_ref(),
            ActionKind::Missing => self.missing.as_ref(),
            ActionKind::EmptyDirectories => self.empty.as_ref(),
        }
    }
}

/// Site configuration file as written
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub defaults: Params,

    #[serde(default)]
    pub rse: BTreeMap<String, Params>,
}

/// The RSE-specific value if set, else the common one, else `default`
pub fn resolve<T>(specific: Option<T>, common: Option<T>, default: T) -> T {
    specific.or(common).unwrap_or(default)
}

impl RawConfig {
    pub fn parse(text: &str, source: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read the configuration file. A missing default file is an empty
    /// configuration; an explicitly named file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG) => {
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Resolve and validate the configuration of `rse`
    pub fn site(&self, rse: &str) -> Result<SiteConfig, ConfigError> {
        let empty = Params::default();
        let specific = self.rse.get(rse).unwrap_or(&empty);
        SiteConfig::resolve(rse, specific, &self.defaults)
    }
}

/// How the listing client reaches the storage
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSettings {
    pub program: String,
    pub server: String,
    pub server_root: String,
    pub resolve_servers: bool,
    pub timeout: Duration,
}

/// How catalog declarations are made
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    /// External catalog command; actions other than dry runs need it
    pub command: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
    pub missing_reason: String,
}

/// Validated configuration of one RSE
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub rse: String,
    pub runs_dir: PathBuf,
    pub partitions: usize,
    pub compress: bool,
    pub listing: ListingSettings,
    pub roots: Vec<String>,

    /// Scan settings shared by every root
    pub scan: ScanSettings,

    /// Site path to catalog name mapping, applied to scanned files
    pub rewrite: PrefixRewrite,

    /// Only dump lines inside this directory are ingested
    pub dump_prefix: Option<String>,

    pub catalog: CatalogSettings,
    pub remover: RemoverSettings,
    pub dark: ConfirmationPolicy,
    pub missing: ConfirmationPolicy,
    pub empty: ConfirmationPolicy,
}

impl SiteConfig {
    /// Resolve `specific` over `common` and validate the result
    pub fn resolve(rse: &str, specific: &Params, common: &Params) -> Result<Self, ConfigError> {
        let missing = |param: &str| ConfigError::Missing {
            rse: rse.to_string(),
            param: param.to_string(),
        };

        let server = specific
            .server
            .clone()
            .or_else(|| common.server.clone())
            .ok_or_else(|| missing("server"))?;
        let roots = specific
            .roots
            .clone()
            .or_else(|| common.roots.clone())
            .filter(|roots| !roots.is_empty())
            .ok_or_else(|| missing("roots"))?;

        let workers = resolve(specific.workers, common.workers, 8);
        validate_workers(workers)?;
        let remove_workers = resolve(specific.remove_workers, common.remove_workers, 4);
        validate_workers(remove_workers)?;

        let partitions = resolve(specific.partitions, common.partitions, 10);
        if partitions == 0 {
            return Err(ConfigError::InvalidPartitionCount(partitions));
        }

        let ignore = compile_ignore_list(
            specific
                .ignore
                .as_deref()
                .or(common.ignore.as_deref())
                .unwrap_or(&[]),
        )?;

        let scan = ScanSettings {
            root: String::new(),
            workers,
            recursion_threshold: resolve(
                specific.recursion_threshold,
                common.recursion_threshold,
                3,
            ),
            include_sizes: resolve(specific.include_sizes, common.include_sizes, true),
            fail_on_dir_errors: resolve(
                specific.fail_on_dir_errors,
                common.fail_on_dir_errors,
                false,
            ),
            stagger: Duration::from_millis(resolve(specific.stagger_ms, common.stagger_ms, 100)),
            output_buffer: resolve(specific.output_buffer, common.output_buffer, 10_000),
            ignore,
        };

        let listing = ListingSettings {
            program: resolve(specific.xrdfs.clone(), common.xrdfs.clone(), "xrdfs".into()),
            server,
            server_root: normalize(&resolve(
                specific.server_root.clone(),
                common.server_root.clone(),
                "/".into(),
            )),
            resolve_servers: resolve(specific.resolve_servers, common.resolve_servers, true),
            timeout: Duration::from_secs(resolve(specific.timeout_secs, common.timeout_secs, 300)),
        };

        let rewrite = PrefixRewrite::new(
            resolve(
                specific.rewrite_remove.clone(),
                common.rewrite_remove.clone(),
                String::new(),
            ),
            resolve(
                specific.rewrite_add.clone(),
                common.rewrite_add.clone(),
                String::new(),
            ),
        );

        let catalog = CatalogSettings {
            command: specific
                .catalog_command
                .clone()
                .or_else(|| common.catalog_command.clone()),
            timeout: Duration::from_secs(resolve(
                specific.catalog_timeout_secs,
                common.catalog_timeout_secs,
                600,
            )),
            batch_size: resolve(specific.batch_size, common.batch_size, 1000).max(1),
            missing_reason: resolve(
                specific.missing_reason.clone(),
                common.missing_reason.clone(),
                "detected missing by consistency check".into(),
            ),
        };

        let remover = RemoverSettings {
            workers: remove_workers,
            stagger: Duration::from_millis(resolve(
                specific.remove_stagger_ms,
                common.remove_stagger_ms,
                100,
            )),
            depth_floor: DEFAULT_DEPTH_FLOOR,
            max_removals: specific.max_removals.or(common.max_removals),
        };

        Ok(Self {
            rse: rse.to_string(),
            runs_dir: resolve(
                specific.runs_dir.clone(),
                common.runs_dir.clone(),
                PathBuf::from("runs"),
            ),
            partitions,
            compress: resolve(specific.compress, common.compress, true),
            listing,
            roots: roots.iter().map(|r| normalize(r)).collect(),
            scan,
            rewrite,
            dump_prefix: specific
                .dump_prefix
                .clone()
                .or_else(|| common.dump_prefix.clone()),
            catalog,
            remover,
            dark: resolve_policy(ActionKind::Dark, specific, common)?,
            missing: resolve_policy(ActionKind::Missing, specific, common)?,
            empty: resolve_policy(ActionKind::EmptyDirectories, specific, common)?,
        })
    }

    /// Scan settings for one root
    pub fn scan_settings(&self, root: &str) -> ScanSettings {
        ScanSettings {
            root: normalize(root),
            ..self.scan.clone()
        }
    }

    pub fn policy(&self, kind: ActionKind) -> &ConfirmationPolicy {
        match kind {
            ActionKind::Dark => &self.dark,
            ActionKind::Missing => &self.missing,
            ActionKind::EmptyDirectories => &self.empty,
        }
    }

    /// Override the scanner thread count from the command line
    pub fn with_workers(mut self, workers: Option<usize>) -> Result<Self, ConfigError> {
        if let Some(workers) = workers {
            validate_workers(workers)?;
            self.scan.workers = workers;
        }
        Ok(self)
    }
}

fn validate_workers(count: usize) -> Result<(), ConfigError> {
    if count == 0 || count > MAX_WORKERS {
        return Err(ConfigError::InvalidWorkerCount {
            count,
            max: MAX_WORKERS,
        });
    }
    Ok(())
}

/// Entries starting with `/` are subtrees, anything else a regex
pub fn compile_ignore_list(entries: &[String]) -> Result<IgnoreList, ConfigError> {
    let mut subtrees = Vec::new();
    let mut patterns = Vec::new();
    for entry in entries {
        if entry.starts_with('/') {
            subtrees.push(normalize(entry));
        } else {
            let re = Regex::new(entry).map_err(|e| ConfigError::InvalidIgnorePattern {
                pattern: entry.clone(),
                reason: e.to_string(),
            })?;
            patterns.push(re);
        }
    }
    Ok(IgnoreList::new(subtrees, patterns))
}

fn resolve_policy(
    kind: ActionKind,
    specific: &Params,
    common: &Params,
) -> Result<ConfirmationPolicy, ConfigError> {
    let empty = PolicyParams::default();
    let s = specific.policy(kind).unwrap_or(&empty);
    let c = common.policy(kind).unwrap_or(&empty);
    let defaults = ConfirmationPolicy::default();

    let max_fraction = resolve(s.max_fraction, c.max_fraction, defaults.max_fraction);
    if !(0.0..=1.0).contains(&max_fraction) {
        return Err(ConfigError::InvalidFraction {
            param: format!("{}.max_fraction", kind),
            value: max_fraction,
        });
    }

    let window = s
        .window_days
        .or(c.window_days)
        .map(|d| chrono::Duration::days(d as i64))
        .unwrap_or(defaults.window);
    let max_age_last_run = s
        .max_age_last_run_hours
        .or(c.max_age_last_run_hours)
        .map(|h| chrono::Duration::hours(h as i64))
        .unwrap_or(defaults.max_age_last_run);

    // Only dark files wait for the oldest run to age
    let min_age_first_run = match kind {
        ActionKind::Dark => s
            .min_age_first_run_hours
            .or(c.min_age_first_run_hours)
            .map(|h| chrono::Duration::hours(h as i64)),
        _ => None,
    };

    Ok(ConfirmationPolicy {
        window,
        min_runs: resolve(s.min_runs, c.min_runs, defaults.min_runs).max(1),
        max_age_last_run,
        min_age_first_run,
        max_fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [defaults]
        runs_dir = "/data/runs"
        server = "redirector.example.org:1094"
        workers = 16
        ignore = ["/store/unmerged", "\\.tmp$"]

        [defaults.dark]
        min_runs = 3
        min_age_first_run_hours = 240
        max_fraction = 0.02

        [defaults.missing]
        min_age_first_run_hours = 240

        [rse.SITE_DISK]
        server_root = "/eos/site/"
        roots = ["/store/mc", "/store/data/"]
        workers = 4
        rewrite_remove = "/eos/site"
        rewrite_add = ""

        [rse.SITE_DISK.dark]
        max_fraction = 0.1
    "#;

    fn sample() -> RawConfig {
        RawConfig::parse(SAMPLE, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_resolve_precedence() {
        assert_eq!(resolve(Some(1), Some(2), 3), 1);
        assert_eq!(resolve(None, Some(2), 3), 2);
        assert_eq!(resolve::<i32>(None, None, 3), 3);
    }

    #[test]
    fn test_site_overrides_defaults() {
        let site = sample().site("SITE_DISK").unwrap();
        assert_eq!(site.scan.workers, 4);
        assert_eq!(site.runs_dir, PathBuf::from("/data/runs"));
        assert_eq!(site.listing.server, "redirector.example.org:1094");
        assert_eq!(site.listing.server_root, "/eos/site");
        assert_eq!(site.roots, vec!["/store/mc", "/store/data"]);
        assert_eq!(site.partitions, 10);
        assert_eq!(site.scan.recursion_threshold, 3);
    }

    #[test]
    fn test_policies_merge_per_field() {
        let site = sample().site("SITE_DISK").unwrap();
        assert_eq!(site.dark.max_fraction, 0.1);
        assert_eq!(site.dark.min_runs, 3);
        assert_eq!(site.dark.min_age_first_run, Some(chrono::Duration::hours(240)));
        // Missing never waits on the first run's age
        assert_eq!(site.missing.min_age_first_run, None);
        assert_eq!(site.empty, ConfirmationPolicy::default());
    }

    #[test]
    fn test_ignore_list_split() {
        let site = sample().site("SITE_DISK").unwrap();
        let ignore = &site.scan.ignore;
        assert!(ignore.is_ignored("/store/unmerged/x/y"));
        assert!(ignore.is_ignored("/store/mc/file.tmp"));
        assert!(!ignore.is_ignored("/store/mc/file.root"));
    }

    #[test]
    fn test_missing_required_params() {
        let err = sample().site("OTHER").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref param, .. } if param == "roots"));

        let err = RawConfig::default().site("SITE").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref param, .. } if param == "server"));
    }

    #[test]
    fn test_validation_errors() {
        let bad_workers = r#"
            [defaults]
            server = "s"
            roots = ["/store"]
            workers = 0
        "#;
        let err = RawConfig::parse(bad_workers, Path::new("t"))
            .unwrap()
            .site("X")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerCount { count: 0, .. }));

        let bad_regex = r#"
            [defaults]
            server = "s"
            roots = ["/store"]
            ignore = ["(unclosed"]
        "#;
        let err = RawConfig::parse(bad_regex, Path::new("t"))
            .unwrap()
            .site("X")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIgnorePattern { .. }));

        let bad_fraction = r#"
            [defaults]
            server = "s"
            roots = ["/store"]
            [defaults.empty]
            max_fraction = 1.5
        "#;
        let err = RawConfig::parse(bad_fraction, Path::new("t"))
            .unwrap()
            .site("X")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFraction { .. }));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = RawConfig::parse("[defaults]\nwokers = 3\n", Path::new("t")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_worker_override() {
        let site = sample().site("SITE_DISK").unwrap();
        assert_eq!(site.clone().with_workers(Some(32)).unwrap().scan.workers, 32);
        assert!(site.with_workers(Some(10_000)).is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::parse_from([
            "rse-consistency",
            "action",
            "dark",
            "SITE_DISK",
            "--dry-run",
            "-o",
            "-",
        ]);
        assert_eq!(args.output_target(), Some(OutputTarget::Stdout));
        match args.command {
            Command::Action { kind, dry_run, .. } => {
                assert_eq!(ActionKind::from(kind), ActionKind::Dark);
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = CliArgs::parse_from(["rse-consistency", "-v", "scan", "SITE", "--root", "/a"]);
        assert!(args.verbose);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
    }
}
