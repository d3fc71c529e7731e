//! Progress reporting and summaries
//!
//! Provides a live spinner during scans and end-of-command summaries.

use crate::confirm::ActionOutcome;
use crate::reconcile::ReconcileResult;
use crate::runs::StageStatus;
use crate::scanner::{ScanProgress, ScanResult};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner showing scan counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Update the display from a scan's live counters
    pub fn update(&self, root: &str, progress: &ScanProgress) {
        let mut msg = format!(
            "{} | Dirs: {} | Files: {} | Size: {}",
            root,
            format_number(progress.directories_scanned()),
            format_number(progress.files()),
            format_size(progress.bytes(), BINARY),
        );
        let retries = progress.retries();
        if retries > 0 {
            msg.push_str(&format!(" | Retries: {}", format_number(retries)));
        }
        let given_up = progress.given_up();
        if given_up > 0 {
            msg.push_str(&format!(" | Given up: {}", format_number(given_up)));
        }
        self.bar.set_message(msg);
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the command header
pub fn print_header(command: &str, rse: &str, run: &str) {
    println!();
    println!(
        "{} {} {}",
        style("rse-consistency").cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        style(command).bold()
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("RSE:").bold(), rse);
    println!("  {} {}", style("Run:").bold(), run);
    println!();
}

/// Print per-root scan results
pub fn print_scan_summary(results: &[ScanResult], duration: Duration) {
    let files: u64 = results.iter().map(|r| r.files).sum();
    let dirs: u64 = results.iter().map(|r| r.directories).sum();
    let bytes: u64 = results.iter().map(|r| r.total_size).sum();
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 { files as f64 / secs } else { 0.0 };

    println!();
    println!("{}", style("Scan Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    for result in results {
        let status = if result.root_failed {
            style("failed").red().bold()
        } else {
            style("ok").green()
        };
        println!(
            "  {} [{}] {} files, {} dirs, {} empty",
            style(&result.root).bold(),
            status,
            format_number(result.files),
            format_number(result.directories),
            format_number(result.empty_directories),
        );
        if let Some(reason) = &result.failure_reason {
            println!("    {} {}", style("Reason:").yellow(), reason);
        }
        if !result.failed_directories.is_empty() {
            println!(
                "    {} {}",
                style("Given up:").yellow().bold(),
                format_number(result.failed_directories.len() as u64)
            );
        }
    }
    println!("  {} {}", style("Directories:").bold(), format_number(dirs));
    println!("  {} {}", style("Files:").bold(), format_number(files));
    println!("  {} {}", style("Total Size:").bold(), format_size(bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} files/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    println!();
}

/// Print the three-way comparison counts
pub fn print_cmp3_summary(result: &ReconcileResult) {
    println!();
    println!("{}", style("Comparison Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Catalog before:").bold(),
        format_number(result.catalog_before)
    );
    println!("  {} {}", style("Scanned:").bold(), format_number(result.scanned));
    println!(
        "  {} {}",
        style("Catalog after:").bold(),
        format_number(result.catalog_after)
    );
    println!("  {} {}", style("Dark:").bold(), format_number(result.dark));
    println!("  {} {}", style("Missing:").bold(), format_number(result.missing));
    println!(
        "  {} {:.1}s over {} partitions",
        style("Duration:").bold(),
        result.elapsed.as_secs_f64(),
        result.partitions
    );
    println!();
}

/// Print the terminal state of an action
pub fn print_action_summary(outcome: &ActionOutcome) {
    let title = format!("Action {}", outcome.action);
    let status = match outcome.status {
        StageStatus::Done => style(outcome.status.as_str()).green().bold(),
        StageStatus::Aborted => style(outcome.status.as_str()).yellow().bold(),
        _ => style(outcome.status.as_str()).red().bold(),
    };

    eprintln!();
    eprintln!("{} {}", style(title).bold(), status);
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Runs used:").bold(), outcome.runs.len());
    if let Some(confirmed) = outcome.confirmed {
        eprintln!("  {} {}", style("Confirmed:").bold(), format_number(confirmed));
    }
    if let (Some(total), Some(ratio)) = (outcome.total, outcome.ratio) {
        eprintln!(
            "  {} {} ({:.4}, limit {:.4})",
            style("Total:").bold(),
            format_number(total),
            ratio,
            outcome.max_fraction
        );
    }
    if let Some(reason) = &outcome.reason {
        eprintln!("  {} {}", style("Reason:").yellow(), reason);
    }
    if let Some(report) = &outcome.report {
        eprintln!(
            "  {} {} of {}",
            style("Succeeded:").bold(),
            format_number(report.succeeded),
            format_number(report.attempted)
        );
        for (reason, count) in &report.failures {
            eprintln!("    {} {}: {}", style("Failed").red(), format_number(*count), reason);
        }
    }
    if let Some(list) = &outcome.list_written {
        eprintln!("  {} {}", style("List:").bold(), list);
    }
    eprintln!();
}
