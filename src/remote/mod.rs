//! Remote storage access module
//!
//! This module talks to the storage site through its command-line client,
//! one subprocess per operation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  RemoteLister (trait)               │
//! │  - list(location, recursive, include_metadata)      │
//! │  - remove_dir(location)                             │
//! └──────────────────────────┬──────────────────────────┘
//!                            │ XrdClient
//!                            ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  ServerPool              run_with_timeout           │
//! │  - round-robin servers   - child + watchdog thread  │
//! │  - failing server        - kill on deadline         │
//! │    moves to the back                                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod listing;
pub mod servers;

pub use command::{run_with_timeout, CommandOutput};
pub use listing::{Listing, ListingStatus, RemoteEntry, RemoteLister, XrdClient};
pub use servers::ServerPool;
