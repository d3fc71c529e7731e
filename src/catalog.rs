//! Replica catalog interface
//!
//! The catalog is an external service. The core only needs two calls from
//! it: quarantine a batch of dark paths, and declare a batch of paths
//! missing (with per-item failures reported back). [`CommandCatalog`]
//! implements both by invoking a site-provided executable.

use crate::error::CatalogError;
use crate::remote::run_with_timeout;
use std::time::Duration;
use tracing::{debug, warn};

/// One path the catalog refused, with its reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationFailure {
    pub path: String,
    pub reason: String,
}

/// Operations consumed from the replica catalog
pub trait ReplicaCatalog: Send + Sync {
    /// Quarantine replicas found on storage but unknown to the catalog
    fn quarantine(&self, rse: &str, paths: &[String]) -> Result<(), CatalogError>;

    /// Declare replicas missing; returns the items the catalog refused
    fn declare_missing(
        &self,
        rse: &str,
        paths: &[String],
        reason: &str,
    ) -> Result<Vec<DeclarationFailure>, CatalogError>;
}

/// Catalog calls through an external command.
///
/// Invoked as `<program> quarantine <RSE> <path>...` and
/// `<program> declare-missing <RSE> <reason> <path>...`. A non-zero exit
/// fails the whole batch. For declarations, each stdout line of the form
/// `<path>\t<reason>` reports one refused item.
pub struct CommandCatalog {
    program: String,
    timeout: Duration,
}

impl CommandCatalog {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn call(&self, args: Vec<String>) -> Result<String, CatalogError> {
        debug!(program = %self.program, command = %args[0], items = args.len(), "Catalog call");
        let output = run_with_timeout(&self.program, &args, self.timeout)
            .map_err(|e| CatalogError::Declaration(format!("cannot run {}: {}", self.program, e)))?;
        if output.timed_out {
            return Err(CatalogError::Timeout(self.timeout.as_secs()));
        }
        if !output.success() {
            return Err(CatalogError::Declaration(output.error_text()));
        }
        Ok(output.stdout)
    }
}

impl ReplicaCatalog for CommandCatalog {
    fn quarantine(&self, rse: &str, paths: &[String]) -> Result<(), CatalogError> {
        let mut args = vec!["quarantine".to_string(), rse.to_string()];
        args.extend(paths.iter().cloned());
        self.call(args).map(|_| ())
    }

    fn declare_missing(
        &self,
        rse: &str,
        paths: &[String],
        reason: &str,
    ) -> Result<Vec<DeclarationFailure>, CatalogError> {
        let mut args = vec![
            "declare-missing".to_string(),
            rse.to_string(),
            reason.to_string(),
        ];
        args.extend(paths.iter().cloned());
        let stdout = self.call(args)?;
        Ok(parse_failures(&stdout))
    }
}

/// Parse `<path>\t<reason>` lines; other lines are logged and ignored
pub fn parse_failures(stdout: &str) -> Vec<DeclarationFailure> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.split_once('\t') {
            Some((path, reason)) => Some(DeclarationFailure {
                path: path.trim().to_string(),
                reason: reason.trim().to_string(),
            }),
            None => {
                warn!(%line, "Unrecognized catalog output line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failures() {
        let out = "/store/a\tunknown replica\n\nnoise\n/store/b\tlocked\n";
        let failures = parse_failures(out);
        assert_eq!(
            failures,
            vec![
                DeclarationFailure {
                    path: "/store/a".into(),
                    reason: "unknown replica".into()
                },
                DeclarationFailure {
                    path: "/store/b".into(),
                    reason: "locked".into()
                },
            ]
        );
    }

    #[test]
    fn test_command_catalog_reports_failures() {
        // `sh -c SCRIPT NAME ARGS...`: $1 is the subcommand, $3 the first path
        let catalog = CommandCatalog::new("sh", Duration::from_secs(5));
        let failures = catalog
            .call(vec![
                "-c".into(),
                r#"printf '%s\tgone\n' "$3""#.into(),
                "catalog".into(),
                "declare-missing".into(),
                "SITE".into(),
                "/store/x".into(),
            ])
            .map(|out| parse_failures(&out))
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "/store/x");
        assert_eq!(failures[0].reason, "gone");
    }

    #[test]
    fn test_command_catalog_exit_status() {
        let catalog = CommandCatalog::new("false", Duration::from_secs(5));
        let err = catalog.quarantine("SITE", &["/a".to_string()]).unwrap_err();
        assert!(matches!(err, CatalogError::Declaration(_)));
    }
}
