//! rse-consistency - Storage Consistency Auditing for Grid Storage
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use rse_consistency::catalog::CommandCatalog;
use rse_consistency::config::{CliArgs, Command, RawConfig, SiteConfig};
use rse_consistency::confirm::{
    ActionKind, ActionOptions, ConfirmedAction, DeclareMissingAction, QuarantineAction,
    RemoveEmptyDirectoriesAction, RunConfirmationEngine, UnconfiguredCatalog,
};
use rse_consistency::error::{ConfigError, ConsistencyError};
use rse_consistency::path::normalize;
use rse_consistency::pipeline::{
    compare_run, listing_client, partition_dump, run_dir, scan_run, select_run,
};
use rse_consistency::progress::{
    print_action_summary, print_cmp3_summary, print_header, print_scan_summary, ProgressReporter,
};
use rse_consistency::remote::RemoteLister;
use rse_consistency::remover::EmptyDirectoryRemover;
use rse_consistency::runs::{utc_now, RunId, StageStatus};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration and usage errors
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    setup_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(StageStatus::Done) => ExitCode::SUCCESS,
        Ok(status) => {
            info!(%status, "Finished unsuccessfully");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if is_config_error(&e) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn is_config_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ConfigError>().is_some()
        || matches!(
            e.downcast_ref::<ConsistencyError>(),
            Some(ConsistencyError::Config(_))
        )
}

fn run(args: CliArgs) -> Result<StageStatus> {
    let raw = RawConfig::load(&args.config).context("Invalid configuration")?;
    let show_progress = !args.quiet;

    match args.command.clone() {
        Command::Scan {
            rse,
            run,
            roots,
            workers,
        } => {
            let site = site_config(&raw, &rse)?
                .with_workers(workers)
                .context("Invalid configuration")?;
            let run = match run {
                Some(ts) => RunId::parse(&format!("{}_{}", rse, ts))
                    .context("Invalid run timestamp")?,
                None => RunId::now(&rse),
            };
            let roots: Vec<String> = if roots.is_empty() {
                site.roots.clone()
            } else {
                roots.iter().map(|r| normalize(r)).collect()
            };

            if show_progress {
                print_header("scan", &rse, &run.name());
            }
            let progress = show_progress.then(ProgressReporter::new);
            if let Some(ref p) = progress {
                p.set_status("Resolving servers...");
            }

            let lister: Arc<dyn RemoteLister> = Arc::new(listing_client(&site.listing));
            let summary = scan_run(&site, lister, &run, &roots, |root, live| {
                if let Some(ref p) = progress {
                    p.update(root, live);
                }
            })
            .context("Scan failed")?;

            if let Some(ref p) = progress {
                p.finish_and_clear();
                print_scan_summary(&summary.roots, summary.elapsed);
            }
            Ok(if summary.failed {
                StageStatus::Failed
            } else {
                StageStatus::Done
            })
        }

        Command::Partition {
            rse,
            dump,
            input,
            run,
        } => {
            let site = site_config(&raw, &rse)?;
            let run = select_run(&run_dir(&site), &rse, run.as_deref(), utc_now())
                .context("Cannot select run")?;
            let stats = partition_dump(&site, &run, dump, &input)
                .with_context(|| format!("Cannot partition '{}'", input.display()))?;
            info!(
                run = %run,
                files = stats.stored,
                dropped = stats.dropped,
                "Dump partitioned"
            );
            Ok(StageStatus::Done)
        }

        Command::Cmp3 { rse, run } => {
            let site = site_config(&raw, &rse)?;
            let run = select_run(&run_dir(&site), &rse, run.as_deref(), utc_now())
                .context("Cannot select run")?;
            if show_progress {
                print_header("cmp3", &rse, &run.name());
            }
            let result = compare_run(&site, &run).context("Comparison failed")?;
            if show_progress {
                print_cmp3_summary(&result);
            }
            Ok(StageStatus::Done)
        }

        Command::Action {
            kind,
            rse,
            dry_run,
            max_removals,
            ..
        } => {
            let mut site = site_config(&raw, &rse)?;
            if max_removals.is_some() {
                site.remover.max_removals = max_removals;
            }
            let kind = ActionKind::from(kind);
            let options = ActionOptions {
                dry_run,
                output: args.output_target(),
                batch_size: site.catalog.batch_size,
            };
            run_action(&site, kind, &options, show_progress)
        }

        Command::Runs { rse } => {
            let site = site_config(&raw, &rse)?;
            list_runs(&site)?;
            Ok(StageStatus::Done)
        }
    }
}

fn site_config(raw: &RawConfig, rse: &str) -> Result<SiteConfig> {
    raw.site(rse)
        .with_context(|| format!("Invalid configuration for {}", rse))
}

fn run_action(
    site: &SiteConfig,
    kind: ActionKind,
    options: &ActionOptions,
    show_progress: bool,
) -> Result<StageStatus> {
    let catalog = site
        .catalog
        .command
        .as_ref()
        .map(|program| CommandCatalog::new(program.clone(), site.catalog.timeout));
    let remover = (kind == ActionKind::EmptyDirectories && !options.dry_run).then(|| {
        let lister: Arc<dyn RemoteLister> = Arc::new(listing_client(&site.listing));
        EmptyDirectoryRemover::new(lister, site.remover.clone())
    });

    let action: Box<dyn ConfirmedAction + '_> = match (kind, &catalog, &remover) {
        (ActionKind::Dark, Some(catalog), _) => Box::new(QuarantineAction::new(
            catalog,
            site.rse.clone(),
            options.batch_size,
        )),
        (ActionKind::Missing, Some(catalog), _) => Box::new(DeclareMissingAction::new(
            catalog,
            site.rse.clone(),
            site.catalog.missing_reason.clone(),
            options.batch_size,
        )),
        (ActionKind::EmptyDirectories, _, Some(remover)) => {
            Box::new(RemoveEmptyDirectoriesAction::new(remover))
        }
        _ => Box::new(UnconfiguredCatalog {
            rse: site.rse.clone(),
        }),
    };

    let engine = RunConfirmationEngine::new(run_dir(site), site.rse.clone());
    let outcome = engine
        .execute(
            kind,
            site.policy(kind),
            action.as_ref(),
            options,
            utc_now(),
        )
        .with_context(|| format!("Action {} failed", kind))?;

    if show_progress {
        print_action_summary(&outcome);
    }
    Ok(outcome.status)
}

fn list_runs(site: &SiteConfig) -> Result<()> {
    let dir = run_dir(site);
    for run in dir.runs(&site.rse).context("Cannot list runs")? {
        let stats = dir
            .load_stats(&run)
            .with_context(|| format!("Cannot read stats of {}", run))?;
        let overall = stats
            .overall_status()
            .map(|s| s.as_str())
            .unwrap_or("-");
        let stages: Vec<String> = stats
            .stage_names()
            .map(|name| {
                let status = stats.stage_status(name).map(|s| s.as_str()).unwrap_or("?");
                format!("{}={}", name, status)
            })
            .collect();
        println!("{}\t{}\t{}", run.name(), overall, stages.join(" "));
    }
    Ok(())
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("rse_consistency=debug,warn")
    } else if quiet {
        EnvFilter::new("rse_consistency=warn,warn")
    } else {
        EnvFilter::new("rse_consistency=info,warn")
    };

    // Lists may go to stdout, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
