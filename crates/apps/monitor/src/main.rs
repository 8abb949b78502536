//! Monitor - watches an inbox and prints a priority-sorted feed

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use triage::store::ExportOptions;
use triage::{
    FeedSnapshot, SqliteHistory, StopSignal, SyncTask, TaskEvent, TriageConfig, TriageService,
    load_classifier,
};

/// Sender and subject column widths in the feed table
const SENDER_WIDTH: usize = 28;
const SUBJECT_WIDTH: usize = 48;

#[derive(Parser, Debug)]
#[command(name = "monitor", about = "Watch an inbox and print a priority-sorted feed")]
struct Args {
    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,

    /// Path to a triage.json config file (defaults to the config directory).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Delete the stored history for the configured account and exit.
    #[arg(long)]
    clear: bool,

    /// Print the stored feed as JSON and exit.
    #[arg(long)]
    export: bool,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let config = match &args.config {
        Some(path) => TriageConfig::load_from(path)?,
        None => TriageConfig::load().with_context(|| {
            format!(
                "No usable {} in the config directory; pass --config PATH",
                triage::config::CONFIG_FILE
            )
        })?,
    };

    let identity = config.identity();
    let history = Arc::new(SqliteHistory::new(config.history_dir()?)?);
    let service = Arc::new(TriageService::open(identity.clone(), history)?);

    if args.clear {
        service.clear_history()?;
        info!("Cleared history for {}", identity.account());
        return Ok(());
    }

    if args.export {
        let rows = service.export(&ExportOptions {
            include_bodies: true,
        });
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let classifier = load_classifier(&config.classifier)?;
    let source = config.build_source()?;
    info!("Monitoring {} via {}", identity.account(), source.describe());

    let mut task = SyncTask::new(
        source,
        classifier,
        service.clone(),
        config.cycle_options(),
        config.schedule(args.once),
    )
    .with_failure_policy(config.failure_policy());
    let events = task.events();

    if args.once {
        let result = task.run(&StopSignal::new());
        print_feed(&service.snapshot());
        return result.map_err(Into::into);
    }

    let handle = task.spawn().context("Failed to start sync thread")?;
    for event in events.iter() {
        match event {
            TaskEvent::CycleFinished(report) => {
                if report.added > 0 || report.bootstrap {
                    print_feed(&service.snapshot());
                }
                println!("{}", report.status_message());
            }
            TaskEvent::CycleFailed(e) => println!("Error: {}", e),
            TaskEvent::Stopped => break,
        }
    }

    handle.join().map_err(Into::into)
}

fn print_feed(snapshot: &FeedSnapshot) {
    let counts = snapshot
        .counts
        .iter()
        .map(|(priority, count)| format!("{}: {}", priority, count))
        .collect::<Vec<_>>()
        .join("  ");
    println!();
    println!("{}", counts);
    println!(
        "{:<16}  {:<7}  {:>5}  {:<sw$}  {:<uw$}",
        "Time",
        "Tier",
        "Conf",
        "Sender",
        "Subject",
        sw = SENDER_WIDTH,
        uw = SUBJECT_WIDTH
    );

    for record in &snapshot.records {
        println!(
            "{:<16}  {:<7}  {:>5.2}  {:<sw$}  {:<uw$}",
            record.time.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            record.priority.as_str(),
            record.confidence,
            clip(&record.sender, SENDER_WIDTH),
            clip(&record.subject, SUBJECT_WIDTH),
            sw = SENDER_WIDTH,
            uw = SUBJECT_WIDTH
        );
    }
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}
