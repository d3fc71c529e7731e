//! Path keys shared by the scanner, the stores and the comparison engines
//!
//! A path key is an absolute string with repeated slashes collapsed and no
//! trailing slash (except the root itself). Two paths are the same entry
//! exactly when their normalized strings are equal.

/// Normalize a path: collapse `//`, strip the trailing `/` (root stays `/`)
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for c in path.trim().chars() {
        if c == '/' {
            if last_slash {
                continue;
            }
            last_slash = true;
        } else {
            last_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Join a parent path and a child name (or relative path)
pub fn join(parent: &str, child: &str) -> String {
    normalize(&format!("{}/{}", parent, child))
}

/// Parent of a normalized path (`None` for the root and for bare names)
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Iterate the proper ancestors of a normalized path, nearest first.
///
/// `/a/b/c` yields `/a/b`, `/a`, `/`.
pub fn ancestors(path: &str) -> Ancestors<'_> {
    Ancestors {
        current: parent(path),
    }
}

/// Iterator returned by [`ancestors`]
pub struct Ancestors<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let here = self.current?;
        self.current = parent(here);
        Some(here)
    }
}

/// Whether `path` lies strictly beneath `dir`
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Whether `path` is `dir` itself or lies beneath it
pub fn is_within(path: &str, dir: &str) -> bool {
    path == dir || is_descendant(path, dir)
}

/// Depth used by the removal safety floor: the number of `/`-separated
/// fields, so `/a` is 2 and `/a/b/c` is 4.
pub fn split_depth(path: &str) -> usize {
    path.split('/').count()
}

/// Number of components below `root` (`root` itself is 0)
pub fn relative_depth(path: &str, root: &str) -> usize {
    if !is_descendant(path, root) {
        return 0;
    }
    let rest = if root == "/" {
        &path[1..]
    } else {
        &path[root.len() + 1..]
    };
    rest.split('/').filter(|c| !c.is_empty()).count()
}

/// Error text with every occurrence of `path` removed, so failures of
/// different paths with the same cause group under one key.
pub fn strip_path(reason: &str, path: &str) -> String {
    if path.is_empty() {
        return reason.trim().to_string();
    }
    reason
        .replace(path, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrites site paths into catalog names: a path starting with
/// `remove` has that prefix replaced by `add`.
///
/// Paths not starting with `remove` are passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixRewrite {
    remove: String,
    add: String,
}

impl PrefixRewrite {
    pub fn new(remove: impl Into<String>, add: impl Into<String>) -> Self {
        Self {
            remove: remove.into(),
            add: add.into(),
        }
    }

    /// True when the rewrite is the identity
    pub fn is_identity(&self) -> bool {
        self.remove == self.add
    }

    pub fn apply(&self, path: &str) -> String {
        if self.is_identity() {
            return normalize(path);
        }
        match path.strip_prefix(self.remove.as_str()) {
            Some(rest) => normalize(&format!("{}/{}", self.add, rest)),
            None => normalize(path),
        }
    }
}
