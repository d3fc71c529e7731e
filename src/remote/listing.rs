//! Remote directory listing through the `xrdfs` command-line client
//!
//! One call issues exactly one remote command. Callers get back the parsed
//! directory and file entries, or a [`ListingError`] that distinguishes a
//! timeout from a failed command and from output that could not be parsed.
//! An unparsable line fails the whole listing: silently skipping it would
//! drop files from the scan and later show up as "missing".

use crate::error::{ListingError, ListingResult};
use crate::path::normalize;
use crate::remote::command::{run_with_timeout, CommandOutput};
use crate::remote::servers::ServerPool;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// `dr-x 2023-01-31 12:00:00 4096 /path`
static SHORT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z-]{4,10})\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2})\s+(\d+)\s+(/.*)$")
        .expect("Invalid short listing regex")
});

/// `drwxr-xr-x owner group 4096 2023-01-31 12:00:00 /path`
static LONG_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-zA-Z-]{4,10})\s+(\S+)\s+(\S+)\s+(\d+)\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2})\s+(/.*)$",
    )
    .expect("Invalid long listing regex")
});

/// One entry returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the server root (absolute form, normalized)
    pub path: String,

    /// Size in bytes, when metadata was requested
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn new(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Parsed result of a successful listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<RemoteEntry>,
    pub files: Vec<RemoteEntry>,
}

impl Listing {
    /// No entries at all
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }
}

/// Outcome kind of a remote call, as recorded in statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Ok,
    Failed,
    Timeout,
}

impl ListingStatus {
    pub fn of<T>(result: &ListingResult<T>) -> Self {
        match result {
            Ok(_) => ListingStatus::Ok,
            Err(ListingError::Timeout { .. }) => ListingStatus::Timeout,
            Err(_) => ListingStatus::Failed,
        }
    }
}

/// Remote namespace operations used by the scanner and the remover.
///
/// `location` is always relative to the server root, e.g. `/store/mc`.
pub trait RemoteLister: Send + Sync {
    /// List one directory, either its direct children or the whole subtree
    fn list(&self, location: &str, recursive: bool, include_metadata: bool)
        -> ListingResult<Listing>;

    /// Remove one empty directory
    fn remove_dir(&self, location: &str) -> ListingResult<()>;
}

/// `xrdfs`-backed implementation of [`RemoteLister`]
pub struct XrdClient {
    /// Client executable (normally `xrdfs`)
    program: String,

    /// Failover pool of server addresses
    pool: ServerPool,

    /// Prefix prepended to every location
    server_root: String,

    /// Deadline for each remote call
    timeout: Duration,
}

impl XrdClient {
    pub fn new(program: &str, pool: ServerPool, server_root: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            pool,
            server_root: normalize(server_root),
            timeout,
        }
    }

    /// Failover pool in use
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Absolute remote path for a server-root-relative location
    pub fn absolute(&self, location: &str) -> String {
        if self.server_root == "/" {
            normalize(&format!("/{}", location))
        } else {
            normalize(&format!("{}/{}", self.server_root, location))
        }
    }

    /// Server-root-relative location for an absolute remote path
    pub fn relative(&self, absolute: &str) -> String {
        let absolute = normalize(absolute);
        if self.server_root == "/" {
            return absolute;
        }
        match absolute.strip_prefix(self.server_root.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => absolute,
        }
    }

    fn run(&self, server: &str, args: &[&str], location: &str) -> ListingResult<CommandOutput> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(server.to_string());
        full.extend(args.iter().map(|a| a.to_string()));

        let output =
            run_with_timeout(&self.program, &full, self.timeout).map_err(|e| ListingError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if output.timed_out {
            self.pool.report_failure(server);
            return Err(ListingError::Timeout {
                path: location.to_string(),
                secs: self.timeout.as_secs(),
            });
        }
        Ok(output)
    }

    fn stat_file(&self, server: &str, location: &str) -> ListingResult<Option<RemoteEntry>> {
        let abs = self.absolute(location);
        let output = self.run(server, &["stat", &abs], location)?;
        if !output.success() {
            return Err(ListingError::Failed {
                path: location.to_string(),
                reason: output.error_text(),
            });
        }
        let (is_dir, size) = parse_stat_output(&output.stdout)?;
        Ok((!is_dir).then(|| RemoteEntry::new(self.relative(&abs), Some(size))))
    }
}

impl RemoteLister for XrdClient {
    fn list(
        &self,
        location: &str,
        recursive: bool,
        include_metadata: bool,
    ) -> ListingResult<Listing> {
        let server = self.pool.next();
        let abs = self.absolute(location);

        let mut args = vec!["ls", "-l"];
        if recursive {
            args.push("-R");
        }
        args.push(&abs);

        trace!(server = %server, path = %abs, recursive, "Listing");
        let output = self.run(&server, &args, location)?;

        if !output.success() {
            let reason = output.error_text();
            if reason.to_lowercase().contains("not a directory") {
                debug!(path = %abs, "Listing target is a file, falling back to stat");
                if let Some(entry) = self.stat_file(&server, location)? {
                    self.pool.report_success(&server);
                    return Ok(Listing {
                        directories: Vec::new(),
                        files: vec![entry],
                    });
                }
            }
            warn!(server = %server, path = %abs, reason = %reason, "Listing failed");
            self.pool.report_failure(&server);
            return Err(ListingError::Failed {
                path: location.to_string(),
                reason,
            });
        }

        let listing = parse_listing(&output.stdout, &abs, include_metadata)
            .map_err(|line| ListingError::Parse {
                path: location.to_string(),
                line,
            })?;
        self.pool.report_success(&server);

        let convert = |entries: Vec<RemoteEntry>| {
            entries
                .into_iter()
                .map(|e| RemoteEntry::new(self.relative(&e.path), e.size))
                .collect()
        };
        Ok(Listing {
            directories: convert(listing.directories),
            files: convert(listing.files),
        })
    }

    fn remove_dir(&self, location: &str) -> ListingResult<()> {
        let server = self.pool.next();
        let abs = self.absolute(location);
        let output = self.run(&server, &["rmdir", &abs], location)?;
        if output.success() {
            self.pool.report_success(&server);
            Ok(())
        } else {
            self.pool.report_failure(&server);
            Err(ListingError::Failed {
                path: location.to_string(),
                reason: output.error_text(),
            })
        }
    }
}

/// Parse `ls -l` output.
///
/// Returns the offending line on the first unrecognized one. A single entry
/// naming the listed path itself as a file is kept as that file.
pub fn parse_listing(
    output: &str,
    listed: &str,
    include_metadata: bool,
) -> std::result::Result<Listing, String> {
    let listed = normalize(listed);
    let mut listing = Listing::default();

    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let (flags, size, path) = parse_line(line).ok_or_else(|| line.to_string())?;
        let path = normalize(path);
        if path == listed && flags.starts_with('d') {
            continue;
        }
        let entry = RemoteEntry::new(path, include_metadata.then_some(size));
        if flags.starts_with('d') {
            listing.directories.push(entry);
        } else {
            listing.files.push(entry);
        }
    }

    Ok(listing)
}

fn parse_line(line: &str) -> Option<(&str, u64, &str)> {
    if let Some(caps) = SHORT_LINE_REGEX.captures(line) {
        let size = caps.get(4)?.as_str().parse().ok()?;
        return Some((caps.get(1)?.as_str(), size, caps.get(5)?.as_str()));
    }
    if let Some(caps) = LONG_LINE_REGEX.captures(line) {
        let size = caps.get(4)?.as_str().parse().ok()?;
        return Some((caps.get(1)?.as_str(), size, caps.get(7)?.as_str()));
    }
    None
}

/// Parse `stat` output into (is_directory, size)
pub fn parse_stat_output(output: &str) -> ListingResult<(bool, u64)> {
    let mut size = None;
    let mut is_dir = false;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Size" => size = value.trim().parse::<u64>().ok(),
            "Flags" => is_dir = value.contains("IsDir"),
            _ => {}
        }
    }
    size.map(|s| (is_dir, s)).ok_or_else(|| ListingError::Parse {
        path: String::new(),
        line: output.lines().next().unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_format() {
        let out = "dr-x 2023-01-31 12:00:00        4096 /eos/store/mc\n\
                   -r-- 2023-01-31 12:00:01     1048576 /eos/store/file.root\n";
        let listing = parse_listing(out, "/eos/store", true).unwrap();
        assert_eq!(listing.directories, vec![RemoteEntry::new("/eos/store/mc", Some(4096))]);
        assert_eq!(
            listing.files,
            vec![RemoteEntry::new("/eos/store/file.root", Some(1_048_576))]
        );
    }

    #[test]
    fn test_parse_long_format() {
        let out = "drwxr-xr-x cmsprod cms 4096 2023-01-31 12:00:00 /store/data\n\
                   -rw-r--r-- cmsprod cms 17 2023-01-31 12:00:00 /store/a b.txt\n";
        let listing = parse_listing(out, "/store", false).unwrap();
        assert_eq!(listing.directories, vec![RemoteEntry::new("/store/data", None)]);
        assert_eq!(listing.files, vec![RemoteEntry::new("/store/a b.txt", None)]);
    }

    #[test]
    fn test_unrecognized_line_fails() {
        let out = "dr-x 2023-01-31 12:00:00 4096 /store/mc\nthis is not a listing\n";
        let err = parse_listing(out, "/store", true).unwrap_err();
        assert_eq!(err, "this is not a listing");
    }

    #[test]
    fn test_listed_directory_itself_is_skipped() {
        let out = "dr-x 2023-01-31 12:00:00 4096 /store/\n";
        let listing = parse_listing(out, "/store", true).unwrap();
        assert!(listing.is_empty());
    }

    #[test]
    fn test_parse_stat() {
        let out = "Path:   /store/f.root\nId:     0\nSize:   1234\nMTime:  2023-01-31\nFlags:  16 (IsReadable)\n";
        assert_eq!(parse_stat_output(out).unwrap(), (false, 1234));

        let dir = "Path: /store\nSize: 4096\nFlags: 19 (XBitSet|IsDir|IsReadable)\n";
        assert_eq!(parse_stat_output(dir).unwrap(), (true, 4096));

        assert!(parse_stat_output("garbage").is_err());
    }

    #[test]
    fn test_path_mapping() {
        let client = XrdClient::new(
            "xrdfs",
            ServerPool::single("host:1094"),
            "/eos/cms/",
            Duration::from_secs(1),
        );
        assert_eq!(client.absolute("/store/mc"), "/eos/cms/store/mc");
        assert_eq!(client.absolute("/"), "/eos/cms");
        assert_eq!(client.relative("/eos/cms/store/mc"), "/store/mc");
        assert_eq!(client.relative("/eos/cms"), "/");
        assert_eq!(client.relative("/eos/cmsx/y"), "/eos/cmsx/y");
    }

    #[test]
    fn test_status_of() {
        let ok: ListingResult<()> = Ok(());
        assert_eq!(ListingStatus::of(&ok), ListingStatus::Ok);
        let to: ListingResult<()> = Err(ListingError::Timeout {
            path: "/x".into(),
            secs: 1,
        });
        assert_eq!(ListingStatus::of(&to), ListingStatus::Timeout);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let client = XrdClient::new(
            "/nonexistent/xrdfs",
            ServerPool::single("host:1094"),
            "/",
            Duration::from_secs(1),
        );
        let err = client.list("/store", false, true).unwrap_err();
        assert!(matches!(err, ListingError::Spawn { .. }));
    }
}
