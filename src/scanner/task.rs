//! One directory scan with adaptive retry
//!
//! A scanner starts either recursive (list the whole subtree in one call) or
//! flat (direct children only). Recursive listings of large trees are the
//! calls most likely to time out, so a failing recursive scan falls back to
//! flat listings before the directory is given up:
//!
//! ```text
//! recursive ──fail──► recursive ──fail──► flat ──fail──► flat ──fail──► flat ──fail──► give up
//! ```

use crate::error::{ListingError, ListingResult};
use crate::path::{ancestors, is_within};
use crate::remote::{Listing, RemoteEntry, RemoteLister};
use std::collections::HashSet;

/// Recursive attempts for a scanner started recursive
pub const RECURSIVE_ATTEMPTS: u32 = 2;

/// Flat attempts for every scanner
pub const FLAT_ATTEMPTS: u32 = 3;

/// How one attempt lists its directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Recursive,
    Flat,
}

impl ScanMode {
    pub fn is_recursive(&self) -> bool {
        matches!(self, ScanMode::Recursive)
    }
}

/// Classified result of one successful attempt
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Files returned (whole subtree for recursive scans)
    pub files: Vec<RemoteEntry>,

    /// Directories returned, excluding the scanned directory itself
    pub directories: Vec<String>,

    /// Directories with no files beneath them; may include the scanned one
    pub empty_directories: Vec<String>,

    /// Whether this came from a recursive listing
    pub recursive: bool,
}

/// Unit of work: scan one directory
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    location: String,
    depth: usize,
    recursive_remaining: u32,
    flat_remaining: u32,
    attempts: u32,
    last_error: Option<ListingError>,
}

impl DirectoryScanner {
    /// Create a scanner for `location` at `depth` below the scan root
    pub fn new(location: impl Into<String>, depth: usize, recursive: bool) -> Self {
        Self {
            location: location.into(),
            depth,
            recursive_remaining: if recursive { RECURSIVE_ATTEMPTS } else { 0 },
            flat_remaining: FLAT_ATTEMPTS,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Error of the most recent failed attempt
    pub fn last_error(&self) -> Option<&ListingError> {
        self.last_error.as_ref()
    }

    /// Mode of the next attempt, or `None` once both budgets are spent
    pub fn next_mode(&self) -> Option<ScanMode> {
        if self.recursive_remaining > 0 {
            Some(ScanMode::Recursive)
        } else if self.flat_remaining > 0 {
            Some(ScanMode::Flat)
        } else {
            None
        }
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.next_mode().is_some()
    }

    /// Make one attempt, spending one unit of the matching budget.
    ///
    /// Returns `None` without calling the lister when both budgets are
    /// already spent.
    pub fn attempt(
        &mut self,
        lister: &dyn RemoteLister,
        include_metadata: bool,
    ) -> Option<ListingResult<ScanReport>> {
        let mode = self.next_mode()?;
        match mode {
            ScanMode::Recursive => self.recursive_remaining -= 1,
            ScanMode::Flat => self.flat_remaining -= 1,
        }
        self.attempts += 1;

        let result = lister
            .list(&self.location, mode.is_recursive(), include_metadata)
            .map(|listing| classify(&self.location, mode, listing));

        self.last_error = result.as_ref().err().cloned();
        Some(result)
    }
}

/// Split a listing into files, directories and empty directories.
///
/// Recursive: every returned directory and the scanned one start out empty,
/// and every ancestor of every returned file is struck off. Flat: only the
/// scanned directory can be classified, and only when it has no entries.
pub fn classify(location: &str, mode: ScanMode, listing: Listing) -> ScanReport {
    let directories: Vec<String> = listing
        .directories
        .into_iter()
        .map(|entry| entry.path)
        .filter(|path| path != location)
        .collect();

    let empty_directories = match mode {
        ScanMode::Recursive => {
            let mut empty: HashSet<&str> = directories.iter().map(String::as_str).collect();
            empty.insert(location);
            for file in &listing.files {
                for ancestor in ancestors(&file.path) {
                    if !is_within(ancestor, location) {
                        break;
                    }
                    empty.remove(ancestor);
                }
            }
            let mut empty: Vec<String> = empty.into_iter().map(str::to_string).collect();
            empty.sort_unstable();
            empty
        }
        ScanMode::Flat if listing.files.is_empty() && directories.is_empty() => {
            vec![location.to_string()]
        }
        ScanMode::Flat => Vec::new(),
    };

    ScanReport {
        files: listing.files,
        directories,
        empty_directories,
        recursive: mode.is_recursive(),
    }
}
