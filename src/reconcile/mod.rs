//! Three-way reconciliation of catalog dumps against a storage scan
//!
//! Inputs are three partitioned stores with the same partition count:
//!
//! - `A`: catalog dump taken before the scan
//! - `R`: storage scan
//! - `B`: catalog dump taken after the scan
//!
//! For every partition the engine computes
//!
//! - dark `D = R - A - B`: on storage, in neither catalog snapshot
//! - missing `M = (A ∩ B) - R`: in both catalog snapshots, not on storage
//!
//! Files created or deleted while the scan was running appear in only one
//! snapshot and are therefore never reported.
//!
//! Only two sets are held per partition: `A` is loaded, `R` and `B` are
//! streamed. Peak memory is `O(|A_i| + |R_i|)` for the largest partition `i`.

use crate::error::ReconcileError;
use crate::store::{partition_of, ListWriter, PartitionedReader, PathLines};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Dark and missing sets of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionDiff {
    pub dark: HashSet<String>,
    pub missing: HashSet<String>,
}

/// Compare one partition.
///
/// `a` is collected into a set; `r` and `b` are consumed as streams.
/// Duplicate entries within any input are harmless.
pub fn reconcile_partition<A, R, B, E>(a: A, r: R, b: B) -> std::result::Result<PartitionDiff, E>
where
    A: IntoIterator<Item = std::result::Result<String, E>>,
    R: IntoIterator<Item = std::result::Result<String, E>>,
    B: IntoIterator<Item = std::result::Result<String, E>>,
{
    let mut a_minus_r: HashSet<String> = a.into_iter().collect::<std::result::Result<_, E>>()?;
    let mut a_and_r: HashSet<String> = HashSet::new();
    let mut r_minus_a: HashSet<String> = HashSet::new();

    for path in r {
        let path = path?;
        if let Some(found) = a_minus_r.take(&path) {
            a_and_r.insert(found);
        } else if !a_and_r.contains(&path) {
            r_minus_a.insert(path);
        }
    }
    drop(a_and_r);

    let mut missing = HashSet::new();
    for path in b {
        let path = path?;
        if r_minus_a.remove(&path) {
            continue;
        }
        if a_minus_r.contains(&path) {
            missing.insert(path);
        }
    }

    Ok(PartitionDiff {
        dark: r_minus_a,
        missing,
    })
}

/// Lines of one input partition, verified to belong to that partition
struct CheckedLines<'a> {
    lines: PathLines,
    index: usize,
    partitions: usize,
    count: &'a mut u64,
}

impl<'a> CheckedLines<'a> {
    fn new(lines: PathLines, index: usize, partitions: usize, count: &'a mut u64) -> Self {
        Self {
            lines,
            index,
            partitions,
            count,
        }
    }
}

impl Iterator for CheckedLines<'_> {
    type Item = std::result::Result<String, ReconcileError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = match self.lines.next()? {
            Ok(path) => path,
            Err(e) => return Some(Err(e.into())),
        };
        let expected = partition_of(&path, self.partitions);
        if expected != self.index {
            return Some(Err(ReconcileError::MisroutedPath {
                path,
                found: self.index,
                expected,
            }));
        }
        *self.count += 1;
        Some(Ok(path))
    }
}

/// Outcome of a full three-way comparison
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    /// Number of dark paths
    pub dark: u64,

    /// Number of missing paths
    pub missing: u64,

    /// Paths read from each input
    pub catalog_before: u64,
    pub scanned: u64,
    pub catalog_after: u64,

    /// Partitions processed
    pub partitions: usize,

    /// Output list files
    pub dark_list: PathBuf,
    pub missing_list: PathBuf,

    #[serde(skip)]
    pub elapsed: Duration,
}

/// Partitioned three-way comparison engine
pub struct SetReconciler {
    catalog_before: PartitionedReader,
    scan: PartitionedReader,
    catalog_after: PartitionedReader,
}

impl SetReconciler {
    /// Set up a comparison; all inputs must share one partition count.
    pub fn new(
        catalog_before: PartitionedReader,
        scan: PartitionedReader,
        catalog_after: PartitionedReader,
    ) -> std::result::Result<Self, ReconcileError> {
        let (a, r, b) = (
            catalog_before.partition_count(),
            scan.partition_count(),
            catalog_after.partition_count(),
        );
        if a != r || r != b {
            return Err(ReconcileError::ConfigMismatch { a, r, b });
        }
        Ok(Self {
            catalog_before,
            scan,
            catalog_after,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.scan.partition_count()
    }

    /// Run the comparison, writing dark and missing lists.
    ///
    /// Each partition's results are sorted before writing so reruns produce
    /// identical files.
    pub fn run(
        &self,
        dark_list: &Path,
        missing_list: &Path,
    ) -> std::result::Result<ReconcileResult, ReconcileError> {
        let start = Instant::now();
        let n = self.partition_count();

        let mut dark_out = ListWriter::create(dark_list)?;
        let mut missing_out = ListWriter::create(missing_list)?;

        let (mut read_before, mut read_scan, mut read_after) = (0u64, 0u64, 0u64);

        for index in 0..n {
            let diff = reconcile_partition(
                CheckedLines::new(self.catalog_before.partition(index)?, index, n, &mut read_before),
                CheckedLines::new(self.scan.partition(index)?, index, n, &mut read_scan),
                CheckedLines::new(self.catalog_after.partition(index)?, index, n, &mut read_after),
            )?;

            let mut dark: Vec<_> = diff.dark.into_iter().collect();
            let mut missing: Vec<_> = diff.missing.into_iter().collect();
            dark.sort_unstable();
            missing.sort_unstable();
            for path in &dark {
                dark_out.add(path)?;
            }
            for path in &missing {
                missing_out.add(path)?;
            }

            debug!(
                partition = index,
                dark = dark.len(),
                missing = missing.len(),
                "Partition compared"
            );
        }

        let result = ReconcileResult {
            dark: dark_out.close()?,
            missing: missing_out.close()?,
            catalog_before: read_before,
            scanned: read_scan,
            catalog_after: read_after,
            partitions: n,
            dark_list: dark_list.to_path_buf(),
            missing_list: missing_list.to_path_buf(),
            elapsed: start.elapsed(),
        };

        info!(
            partitions = n,
            dark = result.dark,
            missing = result.missing,
            elapsed_secs = result.elapsed.as_secs(),
            "Comparison complete"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_list, PartitionedWriter};
    use std::convert::Infallible;
    use tempfile::tempdir;

    fn stream(paths: &[&str]) -> Vec<Result<String, Infallible>> {
        paths.iter().map(|p| Ok(p.to_string())).collect()
    }

    fn set(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn write_store(prefix: &Path, n: usize, paths: &[String]) -> PartitionedReader {
        let mut writer = PartitionedWriter::create(n, prefix, false).unwrap();
        for p in paths {
            writer.add(p).unwrap();
        }
        writer.close().unwrap();
        PartitionedReader::open(prefix).unwrap()
    }

    #[test]
    fn test_fixture_trace() {
        // A = {/a,/b}, R = {/b,/c}, B = {/c,/d}: /c is on storage and in
        // the later catalog; /a disappeared from the catalog; /d is new.
        let diff = reconcile_partition(
            stream(&["/a", "/b"]),
            stream(&["/b", "/c"]),
            stream(&["/c", "/d"]),
        )
        .unwrap();
        assert!(diff.dark.is_empty());
        assert!(diff.missing.is_empty());
    }

    #[test]
    fn test_dark_and_missing() {
        let diff = reconcile_partition(
            stream(&["/keep", "/lost", "/gone"]),
            stream(&["/keep", "/dark", "/new"]),
            stream(&["/keep", "/lost", "/new"]),
        )
        .unwrap();
        // /new appeared in the catalog after the scan started
        assert_eq!(diff.dark, set(&["/dark"]));
        // /gone was removed from the catalog while scanning
        assert_eq!(diff.missing, set(&["/lost"]));
    }

    #[test]
    fn test_duplicates_do_not_create_dark() {
        let diff = reconcile_partition(
            stream(&["/x"]),
            stream(&["/x", "/x", "/y", "/y"]),
            stream(&["/x", "/x"]),
        )
        .unwrap();
        assert_eq!(diff.dark, set(&["/y"]));
        assert!(diff.missing.is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        let diff = reconcile_partition(stream(&[]), stream(&["/a"]), stream(&[])).unwrap();
        assert_eq!(diff.dark, set(&["/a"]));

        let diff = reconcile_partition(stream(&["/a"]), stream(&[]), stream(&["/a"])).unwrap();
        assert_eq!(diff.missing, set(&["/a"]));
    }

    #[test]
    fn test_result_independent_of_partitioning() {
        let dir = tempdir().unwrap();
        let a: Vec<String> = (0..300).map(|i| format!("/store/f{}", i)).collect();
        let r: Vec<String> = (100..400).map(|i| format!("/store/f{}", i)).collect();
        let b: Vec<String> = (50..350).map(|i| format!("/store/f{}", i)).collect();

        let mut outputs = Vec::new();
        for n in [1usize, 7] {
            let reconciler = SetReconciler::new(
                write_store(&dir.path().join(format!("A{}", n)), n, &a),
                write_store(&dir.path().join(format!("R{}", n)), n, &r),
                write_store(&dir.path().join(format!("B{}", n)), n, &b),
            )
            .unwrap();
            let d = dir.path().join(format!("D{}.list", n));
            let m = dir.path().join(format!("M{}.list", n));
            let result = reconciler.run(&d, &m).unwrap();
            assert_eq!(result.partitions, n);
            assert_eq!(result.scanned, 300);

            let dark: HashSet<String> = read_list(&d).unwrap().into_iter().collect();
            let missing: HashSet<String> = read_list(&m).unwrap().into_iter().collect();
            outputs.push((dark, missing));
        }

        // D = R - A - B = f350..f399, M = (A ∩ B) - R = f50..f99
        let expected_dark: HashSet<String> = (350..400).map(|i| format!("/store/f{}", i)).collect();
        let expected_missing: HashSet<String> = (50..100).map(|i| format!("/store/f{}", i)).collect();
        for (dark, missing) in &outputs {
            assert_eq!(dark, &expected_dark);
            assert_eq!(missing, &expected_missing);
        }
    }

    #[test]
    fn test_partition_count_mismatch() {
        let dir = tempdir().unwrap();
        let paths = vec!["/a".to_string()];
        let err = SetReconciler::new(
            write_store(&dir.path().join("A"), 2, &paths),
            write_store(&dir.path().join("R"), 2, &paths),
            write_store(&dir.path().join("B"), 3, &paths),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ReconcileError::ConfigMismatch { a: 2, r: 2, b: 3 }));
    }

    #[test]
    fn test_misrouted_path_fails() {
        let dir = tempdir().unwrap();
        let paths: Vec<String> = (0..20).map(|i| format!("/p{}", i)).collect();
        let a = write_store(&dir.path().join("A"), 2, &paths);
        let b = write_store(&dir.path().join("B"), 2, &paths);

        // hand-written store with every path in partition 0
        let r_prefix = dir.path().join("R");
        crate::store::write_list(crate::store::partition_file(&r_prefix, 0, false), &paths).unwrap();
        crate::store::write_list(crate::store::partition_file(&r_prefix, 1, false), Vec::<String>::new())
            .unwrap();
        let r = PartitionedReader::open(&r_prefix).unwrap();

        let reconciler = SetReconciler::new(a, r, b).unwrap();
        let err = reconciler
            .run(&dir.path().join("D"), &dir.path().join("M"))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MisroutedPath { found: 0, expected: 1, .. }));
    }
}
