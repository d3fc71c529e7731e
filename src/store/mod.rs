//! Disk-backed, hash-partitioned path lists
//!
//! Scanner output, catalog dumps and comparison results are all sequences of
//! paths, often many millions long. A partitioned store splits such a
//! sequence into N files by [`checksum::partition_of`], so that a consumer can
//! load one partition at a time and peak memory is bounded by the largest
//! partition instead of the whole list.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── SITE_2024_01_31_12_00_R.00000      # partition 0
//! ├── SITE_2024_01_31_12_00_R.00001
//! ├── ...
//! └── SITE_2024_01_31_12_00_R.00009.gz   # compressed partitions end in .gz
//! ```
//!
//! Writing and reading are separate types: a [`PartitionedWriter`] is
//! consumed by [`PartitionedWriter::close`], and only then can the files be
//! opened with [`PartitionedReader::open`].

pub mod checksum;

use crate::error::{StoreError, StoreResult};
use crate::path::{is_within, PrefixRewrite};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use checksum::{partition_of, path_checksum};

/// Suffix for gzip-compressed files
const GZ_SUFFIX: &str = ".gz";

/// Output file, plain or gzip
enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn create(path: &Path, compressed: bool) -> StoreResult<Self> {
        let file = File::create(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let buffered = BufWriter::new(file);
        Ok(if compressed {
            Sink::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Sink::Plain(buffered)
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let out: &mut dyn Write = match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w,
        };
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish()?.flush(),
        }
    }
}

fn open_reader(path: &Path) -> StoreResult<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let compressed = path
        .to_str()
        .map(|s| s.ends_with(GZ_SUFFIX))
        .unwrap_or(false);
    Ok(if compressed {
        Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// File name of partition `index` for `prefix`
pub fn partition_file(prefix: &Path, index: usize, compressed: bool) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!(".{:05}", index));
    if compressed {
        name.push(GZ_SUFFIX);
    }
    PathBuf::from(name)
}

/// Existing partition files for `prefix`, as (index, path) pairs
fn find_partitions(prefix: &Path) -> StoreResult<Vec<(usize, PathBuf)>> {
    let dir = match prefix.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = prefix
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| StoreError::NotFound(prefix.to_path_buf()))?
        .to_string();

    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StoreError::Io { path: dir, source }),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(stem.as_str()).and_then(|r| r.strip_prefix('.')) else {
            continue;
        };
        let digits = rest.strip_suffix(GZ_SUFFIX).unwrap_or(rest);
        if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(index) = digits.parse::<usize>() {
            found.push((index, entry.path()));
        }
    }
    found.sort();
    Ok(found)
}

/// Writable partitioned store
pub struct PartitionedWriter {
    prefix: PathBuf,
    compressed: bool,
    sinks: Vec<Sink>,
    counts: Vec<u64>,
}

impl PartitionedWriter {
    /// Create `partitions` empty partition files for `prefix`.
    ///
    /// Partition files left over from an earlier store with the same prefix
    /// are removed first, so a later `open` never sees a mixed set.
    pub fn create(
        partitions: usize,
        prefix: impl AsRef<Path>,
        compressed: bool,
    ) -> StoreResult<Self> {
        if partitions == 0 {
            return Err(StoreError::ZeroPartitions);
        }
        let prefix = prefix.as_ref().to_path_buf();

        for (_, stale) in find_partitions(&prefix)? {
            fs::remove_file(&stale).map_err(|source| StoreError::Io {
                path: stale.clone(),
                source,
            })?;
        }

        let sinks = (0..partitions)
            .map(|i| Sink::create(&partition_file(&prefix, i, compressed), compressed))
            .collect::<StoreResult<Vec<_>>>()?;

        debug!(prefix = %prefix.display(), partitions, compressed, "Created partitioned store");

        Ok(Self {
            prefix,
            compressed,
            sinks,
            counts: vec![0; partitions],
        })
    }

    pub fn partition_count(&self) -> usize {
        self.sinks.len()
    }

    /// File of partition `index`
    pub fn partition_path(&self, index: usize) -> PathBuf {
        partition_file(&self.prefix, index, self.compressed)
    }

    /// Route `path` to its partition and append it
    pub fn add(&mut self, path: &str) -> StoreResult<()> {
        let index = partition_of(path, self.sinks.len());
        self.sinks[index]
            .write_line(path)
            .map_err(|source| StoreError::Io {
                path: self.partition_path(index),
                source,
            })?;
        self.counts[index] += 1;
        Ok(())
    }

    /// Paths written so far
    pub fn count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Flush every partition and return the number of paths written
    pub fn close(self) -> StoreResult<u64> {
        let total = self.count();
        let paths: Vec<PathBuf> = (0..self.sinks.len()).map(|i| self.partition_path(i)).collect();
        for (sink, path) in self.sinks.into_iter().zip(paths) {
            sink.finish()
                .map_err(|source| StoreError::Io { path, source })?;
        }
        debug!(prefix = %self.prefix.display(), paths = total, "Closed partitioned store");
        Ok(total)
    }
}

/// Line selection and rewriting applied while ingesting a flat dump
#[derive(Debug, Clone, Default)]
pub struct IngestFilter {
    /// Keep only paths inside this directory (checked before rewriting)
    pub prefix: Option<String>,

    pub rewrite: Option<PrefixRewrite>,
}

impl IngestFilter {
    /// The path to store for one dump line, or `None` to drop it.
    ///
    /// Dump lines may carry extra tab-separated columns after the path;
    /// `#` comments and blank lines are dropped.
    pub fn select(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let path = line.split('\t').next().unwrap_or(line).trim();
        if let Some(prefix) = &self.prefix {
            if !is_within(path, prefix) {
                return None;
            }
        }
        Some(match &self.rewrite {
            Some(rewrite) => rewrite.apply(path),
            None => crate::path::normalize(path),
        })
    }
}

/// Counters of one ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub stored: u64,
    pub dropped: u64,
}

impl PartitionedWriter {
    /// Route every selected line of `reader` to its partition
    pub fn from_lines<R: BufRead>(
        &mut self,
        mut reader: R,
        filter: &IngestFilter,
    ) -> StoreResult<IngestStats> {
        let mut stats = IngestStats::default();
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(|source| StoreError::Io {
                path: self.prefix.clone(),
                source,
            })?;
            if n == 0 {
                break;
            }
            stats.lines += 1;
            match filter.select(&line) {
                Some(path) => {
                    self.add(&path)?;
                    stats.stored += 1;
                }
                None => stats.dropped += 1,
            }
        }
        debug!(
            prefix = %self.prefix.display(),
            lines = stats.lines,
            stored = stats.stored,
            "Ingested dump"
        );
        Ok(stats)
    }

    /// Ingest a flat dump file (gzip when the name ends in `.gz`)
    pub fn ingest_file(&mut self, input: &Path, filter: &IngestFilter) -> StoreResult<IngestStats> {
        let reader = open_reader(input)?;
        self.from_lines(reader, filter)
    }
}

/// Readable partitioned store
#[derive(Debug, Clone)]
pub struct PartitionedReader {
    prefix: PathBuf,
    files: Vec<PathBuf>,
}

impl PartitionedReader {
    /// Open the partitions of an existing store
    pub fn open(prefix: impl AsRef<Path>) -> StoreResult<Self> {
        let prefix = prefix.as_ref().to_path_buf();
        let found = find_partitions(&prefix)?;
        if found.is_empty() {
            return Err(StoreError::NotFound(prefix));
        }

        let mut files = Vec::with_capacity(found.len());
        for (expected, (index, path)) in found.into_iter().enumerate() {
            if index != expected {
                return Err(StoreError::Incomplete {
                    prefix,
                    missing: expected,
                });
            }
            files.push(path);
        }

        Ok(Self { prefix, files })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn partition_count(&self) -> usize {
        self.files.len()
    }

    /// Single-pass reader over partition `index`
    pub fn partition(&self, index: usize) -> StoreResult<PathLines> {
        let path = self
            .files
            .get(index)
            .ok_or_else(|| StoreError::Incomplete {
                prefix: self.prefix.clone(),
                missing: index,
            })?;
        PathLines::open(path)
    }

    /// Each partition in index order, opened lazily
    pub fn partitions(&self) -> impl Iterator<Item = StoreResult<PathLines>> + '_ {
        (0..self.files.len()).map(move |i| self.partition(i))
    }

    /// Every path of every partition, partition by partition
    pub fn paths(&self) -> impl Iterator<Item = StoreResult<String>> + '_ {
        self.partitions().flat_map(|part| -> Box<dyn Iterator<Item = StoreResult<String>>> {
            match part {
                Ok(lines) => Box::new(lines),
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })
    }
}

/// Lines of one list file, blank lines skipped
pub struct PathLines {
    source: PathBuf,
    reader: Box<dyn BufRead + Send>,
    line: String,
}

impl PathLines {
    /// Open a flat list (gzip when the name ends in `.gz`)
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            source: path.to_path_buf(),
            reader: open_reader(path)?,
            line: String::new(),
        })
    }
}

impl Iterator for PathLines {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line.trim();
                    if !trimmed.is_empty() {
                        return Some(Ok(trimmed.to_string()));
                    }
                }
                Err(source) => {
                    return Some(Err(StoreError::Io {
                        path: self.source.clone(),
                        source,
                    }))
                }
            }
        }
    }
}

/// Writer for a flat (unpartitioned) list file
pub struct ListWriter {
    path: PathBuf,
    sink: Sink,
    count: u64,
}

impl ListWriter {
    /// Create a list file; gzip when the name ends in `.gz`
    pub fn create(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let compressed = path
            .to_str()
            .map(|s| s.ends_with(GZ_SUFFIX))
            .unwrap_or(false);
        Ok(Self {
            sink: Sink::create(&path, compressed)?,
            path,
            count: 0,
        })
    }

    pub fn add(&mut self, line: &str) -> StoreResult<()> {
        self.sink.write_line(line).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn close(self) -> StoreResult<u64> {
        self.sink.finish().map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.count)
    }
}

/// Write `lines` to a flat list file
pub fn write_list<I, S>(path: impl AsRef<Path>, lines: I) -> StoreResult<u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut writer = ListWriter::create(path)?;
    for line in lines {
        writer.add(line.as_ref())?;
    }
    writer.close()
}

/// Read a flat list file into memory
pub fn read_list(path: impl AsRef<Path>) -> StoreResult<Vec<String>> {
    PathLines::open(path.as_ref())?.collect()
}
