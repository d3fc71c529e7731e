//! Error types for rse-consistency
//!
//! This module defines the error hierarchy that covers:
//! - Remote listing / removal errors (timeouts, command failures, parse failures)
//! - Partitioned store I/O errors
//! - Reconciliation invariant violations
//! - Run artifact and stats errors
//! - Catalog declaration errors
//! - Configuration and worker errors
//!
//! Policy stops of the confirmation engine (too little history, stale runs,
//! threshold exceeded) are not errors; they are [`crate::confirm::AbortReason`]s.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the rse-consistency crate
#[derive(Error, Debug)]
pub enum ConsistencyError {
    /// Remote listing errors
    #[error("Remote error: {0}")]
    Listing(#[from] ListingError),

    /// Partitioned store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Reconciliation errors
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Run artifact errors
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed unexpectedly
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

/// Remote listing client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    /// The remote command exceeded its deadline and was killed
    #[error("Timed out after {secs}s: '{path}'")]
    Timeout { path: String, secs: u64 },

    /// Non-zero exit or error text from the remote command
    #[error("Remote command failed for '{path}': {reason}")]
    Failed { path: String, reason: String },

    /// Output line in an unrecognized format
    #[error("Unrecognized listing line for '{path}': {line:?}")]
    Parse { path: String, line: String },

    /// The command could not be started at all
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// No server address is available
    #[error("No server available for '{0}'")]
    NoServer(String),
}

impl ListingError {
    /// Check if this error is a timeout (the only kind removals retry on)
    pub fn is_timeout(&self) -> bool {
        matches!(self, ListingError::Timeout { .. })
    }

    /// Check if the server that produced this error should be rotated out
    pub fn should_failover(&self) -> bool {
        matches!(
            self,
            ListingError::Timeout { .. } | ListingError::Failed { .. }
        )
    }
}

/// Partitioned store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error on a partition file
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No partition files match the prefix
    #[error("No partitions found for prefix '{0}'")]
    NotFound(PathBuf),

    /// Partition files are not numbered 0..n without gaps
    #[error("Partition set for '{prefix}' is incomplete: missing index {missing}")]
    Incomplete { prefix: PathBuf, missing: usize },

    /// Zero partitions requested
    #[error("Partition count must be at least 1")]
    ZeroPartitions,
}

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Inputs were partitioned with different partition counts
    #[error("Partition count mismatch: catalog-before={a}, scan={r}, catalog-after={b}")]
    ConfigMismatch { a: usize, r: usize, b: usize },

    /// A path was found in a partition it does not hash to
    #[error("Path '{path}' found in partition {found} but hashes to partition {expected}")]
    MisroutedPath {
        path: String,
        found: usize,
        expected: usize,
    },

    /// Store error while reading inputs or writing outputs
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run artifact errors
#[derive(Error, Debug)]
pub enum RunError {
    /// Run name does not follow `{RSE}_{YYYY_MM_DD_HH_MM}`
    #[error("Invalid run name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Stats document could not be parsed
    #[error("Invalid stats file '{path}': {reason}")]
    InvalidStats { path: PathBuf, reason: String },

    /// I/O error on a run artifact
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stage this step depends on has not completed
    #[error("Run {run}: stage '{stage}' is not done")]
    StageNotDone { run: String, stage: String },

    /// Store error on a run list
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Catalog (external collaborator) errors
#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    /// The declaration call failed as a whole
    #[error("Declaration failed: {0}")]
    Declaration(String),

    /// The catalog command timed out
    #[error("Catalog command timed out after {0}s")]
    Timeout(u64),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Cannot read configuration '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    /// Configuration file could not be parsed
    #[error("Cannot parse configuration '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A required parameter is absent at every level
    #[error("Missing required parameter '{param}' for RSE '{rse}'")]
    Missing { rse: String, param: String },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid partition count
    #[error("Invalid partition count {0}: must be at least 1")]
    InvalidPartitionCount(usize),

    /// Invalid ignore pattern
    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },

    /// Invalid fraction threshold
    #[error("Invalid fraction {value} for '{param}': must be within 0..=1")]
    InvalidFraction { param: String, value: f64 },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },
}

/// Result type alias for ConsistencyError
pub type Result<T> = std::result::Result<T, ConsistencyError>;

/// Result type alias for ListingError
pub type ListingResult<T> = std::result::Result<T, ListingError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for RunError
pub type RunResult<T> = std::result::Result<T, RunError>;
