use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use volcat::catalog::{Catalog, EventIngest, HashJob, HashStats, IngestOutcome, ReconcileReport};
use volcat::config::Config;
use volcat::scan::{ScanStats, Scanner};
use volcat::watch::{EventDebouncer, EventTranslator, VolumeWatcher};

#[derive(Parser, Debug)]
#[command(name = "volcat")]
#[command(about = "Catalog files across volumes, track content hashes and duplicates", long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan every volume, reconcile the catalog, then hash
    Scan {
        /// Stop after reconciling
        #[arg(long)]
        no_hash: bool,
    },
    /// Hash new and changed files, then recount duplicates
    Hash,
    /// Recount duplicates per directory
    Dups,
    /// Apply live filesystem changes until interrupted
    Watch,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    #[serde(skip_serializing_if = "Option::is_none")]
    scan: Option<ScanStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs: Option<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<HashStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_recounted: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let mut catalog = Catalog::open(&config.database)
        .with_context(|| format!("Failed to open catalog {}", config.database.display()))?;
    info!(database = %config.database.display(), "catalog opened");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        stop_handler.store(true, Ordering::Relaxed);
    })
    .context("Failed to install interrupt handler")?;

    let summary = match cli.command {
        Commands::Scan { no_hash } => run_scan(&mut catalog, &config, no_hash, cli.json, &stop)?,
        Commands::Hash => Summary {
            hash: Some(run_hash(&mut catalog, &config, cli.json, &stop)?),
            ..Summary::default()
        },
        Commands::Dups => Summary {
            dirs_recounted: Some(catalog.recompute_duplicate_counts()?),
            ..Summary::default()
        },
        Commands::Watch => return run_watch(&mut catalog, &config, &stop),
    };

    print_summary(&summary, cli.json)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_scan(
    catalog: &mut Catalog,
    config: &Config,
    no_hash: bool,
    json: bool,
    stop: &Arc<AtomicBool>,
) -> Result<Summary> {
    let scanner = Scanner::new()
        .with_denylist(config.denylist.clone())
        .with_exclude(config.exclude_patterns()?);
    let (listing, scan_stats) = scanner.scan(&config.volumes);

    // Files first so directory counts see the current file set
    let files = catalog.reconcile(&listing.files).context("Failed to reconcile files")?;
    let dirs = catalog.reconcile(&listing.dirs).context("Failed to reconcile directories")?;

    let hash = if no_hash {
        None
    } else {
        Some(run_hash(catalog, config, json, stop)?)
    };

    Ok(Summary {
        scan: Some(scan_stats),
        files: Some(files),
        dirs: Some(dirs),
        hash,
        dirs_recounted: None,
    })
}

fn run_hash(
    catalog: &mut Catalog,
    config: &Config,
    json: bool,
    stop: &Arc<AtomicBool>,
) -> Result<HashStats> {
    let pb = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} Hashing: {msg}")
            .context("Invalid progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    let pb_callback = pb.clone();
    let job = HashJob::new()
        .with_limit(config.hash.select_limit)
        .with_flush_interval(config.hash.flush_interval())
        .with_flush_max_items(config.hash.flush_max_items)
        .with_stop_flag(stop.clone())
        .with_progress_callback(move |stats| {
            pb_callback.set_message(format!(
                "{} hashed ({}), {} failed, {} vanished, {} saved",
                stats.hashed,
                format_size(stats.bytes_hashed, DECIMAL),
                stats.failed,
                stats.skipped,
                stats.saved
            ));
        });

    let stats = job.run(catalog).context("Hash run failed")?;
    pb.finish_and_clear();
    Ok(stats)
}

fn run_watch(catalog: &mut Catalog, config: &Config, stop: &AtomicBool) -> Result<()> {
    let exclude = config.exclude_patterns()?;
    let translator = EventTranslator::new(&config.volumes)
        .with_denylist(config.denylist.clone())
        .with_exclude(exclude.clone());
    let mut watcher = VolumeWatcher::new(translator)?;
    if watcher.watched_paths().is_empty() {
        anyhow::bail!("No volume could be watched");
    }
    info!(volumes = watcher.watched_paths().len(), "watching for changes");

    let mut ingest = EventIngest::new(catalog, exclude);
    let mut debouncer = EventDebouncer::default_window();
    while !stop.load(Ordering::Relaxed) {
        let Some(changes) = watcher.next_changes(Duration::from_secs(1)) else {
            break;
        };
        for change in debouncer.filter(changes) {
            let key = change.key().clone();
            match ingest.apply(change) {
                Ok(IngestOutcome::Applied) => {}
                Ok(outcome) => debug!(key = %key, ?outcome, "change ignored"),
                // One bad event must not stop the stream
                Err(e) if e.is_store() => error!(key = %key, error = %e, "catalog write failed"),
                Err(e) => warn!(key = %key, error = %e, "failed to apply change"),
            }
        }
    }
    info!("watcher stopped");
    Ok(())
}

fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if let Some(scan) = &summary.scan {
        println!(
            "Scanned {} volume(s): {} files, {} dirs, {} in {:.1}s ({} errors, {} volume(s) missing)",
            scan.volumes_scanned,
            scan.files,
            scan.dirs,
            format_size(scan.total_bytes, DECIMAL),
            scan.duration.as_secs_f64(),
            scan.errors,
            scan.volumes_missing
        );
        if !scan.incomplete_volumes.is_empty() {
            println!(
                "Left unchanged after walk errors: {}",
                scan.incomplete_volumes.join(", ")
            );
        }
    }
    for (label, report) in [("Files", &summary.files), ("Dirs", &summary.dirs)] {
        if let Some(report) = report {
            println!(
                "{label}: {} inserted, {} updated, {} deleted, {} flagged for rehash",
                report.inserted, report.updated, report.deleted, report.rehash_flagged
            );
        }
    }
    if let Some(hash) = &summary.hash {
        println!(
            "Hashed {} file(s) ({}), {} failed, {} vanished, {} saved, {} dir count(s) changed{}",
            hash.hashed,
            format_size(hash.bytes_hashed, DECIMAL),
            hash.failed,
            hash.skipped,
            hash.saved,
            hash.dirs_recounted,
            if hash.interrupted { " (interrupted)" } else { "" }
        );
    }
    if let Some(recounted) = summary.dirs_recounted {
        println!("Duplicate counts changed for {recounted} dir(s)");
    }
    Ok(())
}
