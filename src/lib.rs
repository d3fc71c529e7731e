//! rse-consistency - Storage Consistency Auditing for Grid Storage
//!
//! Compares what a storage endpoint (RSE) actually holds with what the
//! replica catalog believes it holds, and acts on the differences once they
//! have been seen consistently over several runs.
//!
//! # Features
//!
//! - **Concurrent Namespace Scanning**: A pool of worker threads lists the
//!   remote namespace through `xrdfs`, switching between recursive and flat
//!   listings, retrying failed directories and failing over between servers.
//!
//! - **Partitioned Reconciliation**: Scan results and catalog dumps are
//!   split into CRC-32 partitions on disk, so the three-way comparison only
//!   ever holds one partition in memory.
//!
//! - **Multi-Run Confirmation**: Dark and missing files and empty
//!   directories are acted on only when every run in the confirmation window
//!   agrees, and only when the confirmed set is a plausible fraction of the
//!   site.
//!
//! # Architecture
//!
//! ```text
//!   catalog dump (before)      remote namespace       catalog dump (after)
//!           │                        │                         │
//!           │                        │ xrdfs ls / stat         │
//!           ▼                        ▼                         ▼
//!   ┌───────────────┐    ┌──────────────────────┐    ┌───────────────┐
//!   │  partition A  │    │   ScanCoordinator    │    │  partition B  │
//!   └───────┬───────┘    │  ┌────────┐┌───────┐ │    └───────┬───────┘
//!           │            │  │scanner ││scanner│ │            │
//!           │            │  └────────┘└───────┘ │            │
//!           │            └──────────┬───────────┘            │
//!           │                       │ R, ED                  │
//!           ▼                       ▼                        ▼
//!         ┌──────────────────────────────────────────────────────┐
//!         │             SetReconciler (per partition)            │
//!         │        D = R - A - B          M = (A - R) ∩ B        │
//!         └──────────────────────────┬───────────────────────────┘
//!                                    │ D, M, ED lists per run
//!                                    ▼
//!         ┌──────────────────────────────────────────────────────┐
//!         │   RunConfirmationEngine (window of earlier runs)     │
//!         └──────┬──────────────────┬──────────────────┬─────────┘
//!                ▼                  ▼                  ▼
//!           quarantine        declare missing    remove empty dirs
//! ```
//!
//! # Example
//!
//! ```bash
//! rse-consistency partition SITE_DISK before dump_before.gz --run 2024_05_01_00_00
//! rse-consistency scan SITE_DISK --run 2024_05_01_00_00
//! rse-consistency partition SITE_DISK after dump_after.gz --run 2024_05_01_00_00
//! rse-consistency cmp3 SITE_DISK
//! rse-consistency action missing SITE_DISK --dry-run -o missing.list
//! ```

pub mod catalog;
pub mod config;
pub mod confirm;
pub mod error;
pub mod path;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod remover;
pub mod runs;
pub mod scanner;
pub mod store;

pub use config::{CliArgs, RawConfig, SiteConfig};
pub use confirm::{ActionKind, ConfirmationPolicy, RunConfirmationEngine};
pub use error::{ConsistencyError, Result};
pub use reconcile::{ReconcileResult, SetReconciler};
pub use scanner::{ScanCoordinator, ScanResult};
