//! External command execution with a watchdog-enforced deadline
//!
//! Every remote operation is a child process. The calling worker blocks on the
//! child's output pipes while a separate watchdog thread waits for either a
//! completion signal or the deadline; on the deadline it kills the child.
//! Both sides touch the child handle only under the same lock, so the
//! watchdog can never signal a process that has already been reaped.

use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of running one external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (`None` if killed by a signal)
    pub status: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// The watchdog killed the process
    pub timed_out: bool,

    /// Wall-clock time spent
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Process exited with status 0 within the deadline
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// Short error text: stderr if present, otherwise the exit status
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Run `program args...` and kill it if it runs longer than `timeout`.
///
/// Returns `Err` only when the process cannot be spawned; a non-zero exit or
/// a timeout is reported through [`CommandOutput`].
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> std::io::Result<CommandOutput> {
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));
    let timed_out = Arc::new(AtomicBool::new(false));

    // Dropping `done_tx` tells the watchdog the pipes are closed
    let (done_tx, done_rx) = bounded::<()>(0);
    let watchdog = {
        let child = Arc::clone(&child);
        let timed_out = Arc::clone(&timed_out);
        thread::Builder::new()
            .name("cmd-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    kill_if_running(&child, &timed_out);
                }
            })?
    };

    let err_reader = thread::Builder::new()
        .name("cmd-stderr".to_string())
        .spawn(move || read_all("stderr", stderr))?;
    let out = read_all("stdout", stdout);
    let err = err_reader.join().unwrap_or_default();

    drop(done_tx);
    if watchdog.join().is_err() {
        warn!(program, "Command watchdog panicked");
    }

    let status = child.lock().wait()?;
    let output = CommandOutput {
        status: status.code(),
        stdout: out,
        stderr: err,
        timed_out: timed_out.load(Ordering::SeqCst),
        elapsed: start.elapsed(),
    };

    debug!(
        program,
        status = ?output.status,
        timed_out = output.timed_out,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "Command finished"
    );

    Ok(output)
}

fn kill_if_running(child: &Mutex<Child>, timed_out: &AtomicBool) {
    let mut child = child.lock();
    if let Ok(None) = child.try_wait() {
        timed_out.store(true, Ordering::SeqCst);
        if let Err(e) = child.kill() {
            warn!(error = %e, "Failed to kill timed-out command");
        }
    }
}

/// Drain a pipe; a read error keeps whatever arrived before it
fn read_all<R: Read>(name: &str, pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(pipe = name, read = buf.len(), error = %e, "Pipe read failed");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
