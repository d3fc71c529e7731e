//! Concurrent scanner for a remote storage namespace
//!
//! ```text
//!                      ┌──────────────────────┐
//!                      │   ScanCoordinator    │
//!                      │  root scan (flat)    │
//!                      └──────────┬───────────┘
//!                                 │ subdirectories
//!                                 ▼
//!                      ┌──────────────────────┐
//!                      │  TaskQueue (stagger) │◄──── retries, children
//!                      └──────────┬───────────┘
//!              ┌──────────────────┼──────────────────┐
//!              ▼                  ▼                  ▼
//!        ┌──────────┐       ┌──────────┐       ┌──────────┐
//!        │ worker 0 │       │ worker 1 │  ...  │ worker N │
//!        └────┬─────┘       └────┬─────┘       └────┬─────┘
//!             └──────────────────┼──────────────────┘
//!                                ▼
//!                   bounded channel of ScanRecord
//! ```

pub mod coordinator;
pub mod queue;
pub mod task;

pub use coordinator::{
    IgnoreList, ScanCoordinator, ScanHandle, ScanProgress, ScanRecord, ScanResult, ScanSettings,
};
pub use queue::{TaskGuard, TaskQueue};
pub use task::{DirectoryScanner, ScanMode, ScanReport};
