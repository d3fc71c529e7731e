//! Server failover pool for the remote listing client
//!
//! A storage site usually publishes a redirector address. Listing through the
//! redirector on every call adds a hop and concentrates load, so the pool can
//! resolve the redirector once into the concrete data servers behind it
//! (`xrdfs <redirector> locate -h /`). Calls then rotate through the servers;
//! a server whose call failed is moved to the back of the rotation so the
//! next calls go elsewhere first.

use crate::remote::command::run_with_timeout;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failure counter for one server
#[derive(Debug, Clone, Copy, Default)]
struct ServerHealth {
    /// Consecutive failures
    failures: u32,
    /// Calls that succeeded
    successes: u64,
}

/// Internal state protected by the pool lock
struct PoolState {
    /// Rotation order, front is next
    rotation: VecDeque<String>,
    /// Health tracking per server
    health: HashMap<String, ServerHealth>,
}

impl PoolState {
    fn new(servers: Vec<String>) -> Self {
        let health = servers
            .iter()
            .map(|s| (s.clone(), ServerHealth::default()))
            .collect();
        Self {
            rotation: servers.into(),
            health,
        }
    }

    fn next(&mut self) -> Option<String> {
        let server = self.rotation.pop_front()?;
        self.rotation.push_back(server.clone());
        Some(server)
    }

    fn demote(&mut self, server: &str) {
        if let Some(idx) = self.rotation.iter().position(|s| s == server) {
            if let Some(s) = self.rotation.remove(idx) {
                self.rotation.push_back(s);
            }
        }
    }
}

/// Round-robin pool of concrete server addresses
pub struct ServerPool {
    /// Address originally configured
    redirector: String,
    state: Mutex<PoolState>,
}

impl ServerPool {
    /// Pool that always uses the configured address
    pub fn single(server: &str) -> Self {
        Self::from_servers(server, vec![server.to_string()])
    }

    /// Pool over an explicit list of servers
    pub fn from_servers(redirector: &str, servers: Vec<String>) -> Self {
        let servers = if servers.is_empty() {
            vec![redirector.to_string()]
        } else {
            servers
        };
        Self {
            redirector: redirector.to_string(),
            state: Mutex::new(PoolState::new(servers)),
        }
    }

    /// Resolve the redirector into its data servers.
    ///
    /// Falls back to the redirector itself when `locate` fails or returns
    /// nothing, so a scan can always proceed.
    pub fn resolve(program: &str, redirector: &str, timeout: Duration) -> Self {
        let args = vec![
            redirector.to_string(),
            "locate".to_string(),
            "-h".to_string(),
            "/".to_string(),
        ];

        let servers = match run_with_timeout(program, &args, timeout) {
            Ok(out) if out.success() => parse_locate_output(&out.stdout),
            Ok(out) => {
                warn!(
                    redirector,
                    timed_out = out.timed_out,
                    error = %out.error_text(),
                    "Server locate failed, using redirector directly"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(redirector, error = %e, "Cannot run locate, using redirector directly");
                Vec::new()
            }
        };

        if !servers.is_empty() {
            info!(
                redirector,
                servers = ?servers,
                count = servers.len(),
                "Resolved redirector into data servers"
            );
        }

        Self::from_servers(redirector, servers)
    }

    /// The address this pool was created from
    pub fn redirector(&self) -> &str {
        &self.redirector
    }

    /// All servers in current rotation order
    pub fn servers(&self) -> Vec<String> {
        self.state.lock().rotation.iter().cloned().collect()
    }

    /// Next server to use
    pub fn next(&self) -> String {
        self.state
            .lock()
            .next()
            .unwrap_or_else(|| self.redirector.clone())
    }

    /// Record a successful call
    pub fn report_success(&self, server: &str) {
        let mut state = self.state.lock();
        if let Some(health) = state.health.get_mut(server) {
            health.failures = 0;
            health.successes += 1;
        }
    }

    /// Record a failed call and move the server to the back of the rotation
    pub fn report_failure(&self, server: &str) {
        let mut state = self.state.lock();
        if let Some(health) = state.health.get_mut(server) {
            health.failures += 1;
            debug!(server, failures = health.failures, "Server call failed");
        }
        state.demote(server);
    }

    /// Consecutive failures recorded for a server
    pub fn failures(&self, server: &str) -> u32 {
        self.state
            .lock()
            .health
            .get(server)
            .map(|h| h.failures)
            .unwrap_or(0)
    }
}

/// Parse `locate -h` output lines like `[::ffff:10.0.0.1]:1094 Server ReadWrite`
pub fn parse_locate_output(output: &str) -> Vec<String> {
    let mut servers = Vec::new();
    for line in output.lines() {
        let Some(addr) = line.split_whitespace().next() else {
            continue;
        };
        let addr = addr.replace("[::ffff:", "").replace("]:", ":");
        let addr = addr.trim_start_matches('[').to_string();
        if !addr.is_empty() && !servers.contains(&addr) {
            servers.push(addr);
        }
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locate_output() {
        let out = "[::ffff:10.0.0.1]:1094 Server ReadWrite\n\
                   [::ffff:10.0.0.2]:1094 Server ReadWrite\n\
                   \n\
                   [::ffff:10.0.0.1]:1094 Server ReadWrite\n";
        assert_eq!(
            parse_locate_output(out),
            vec!["10.0.0.1:1094".to_string(), "10.0.0.2:1094".to_string()]
        );
    }

    #[test]
    fn test_round_robin() {
        let pool = ServerPool::from_servers(
            "redir:1094",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(pool.next(), "a");
        assert_eq!(pool.next(), "b");
        assert_eq!(pool.next(), "c");
        assert_eq!(pool.next(), "a");
    }

    #[test]
    fn test_failure_moves_server_back() {
        let pool = ServerPool::from_servers(
            "redir:1094",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        // rotation is a, b, c; failing b moves it behind c
        pool.report_failure("b");
        assert_eq!(pool.servers(), vec!["a", "c", "b"]);
        assert_eq!(pool.failures("b"), 1);

        pool.report_success("b");
        assert_eq!(pool.failures("b"), 0);
    }

    #[test]
    fn test_empty_list_uses_redirector() {
        let pool = ServerPool::from_servers("redir:1094", Vec::new());
        assert_eq!(pool.next(), "redir:1094");

        let single = ServerPool::single("host:1094");
        assert_eq!(single.servers(), vec!["host:1094"]);
        assert_eq!(single.redirector(), "host:1094");
    }
}
