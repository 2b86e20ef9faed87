//! joinq CLI: operator interface to the join-target store.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use joinq::config::Config;
use joinq::config::secrets::{SecretString, fingerprint};
use joinq::db::Db;
use joinq::distributor::Distributor;
use joinq::link;
use joinq::model::{WorkerId, WorkerStatus};
use joinq::telemetry::{TelemetryConfig, init_telemetry};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "joinq", about = "Join-target distribution across worker accounts")]
struct Cli {
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Worker registry operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Add targets from arguments or a message dump
    Ingest {
        /// Raw links
        links: Vec<String>,
        /// Text file, one message per line; every link found is ingested
        #[arg(long)]
        file: Option<PathBuf>,
        /// Provenance recorded on new targets
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Assign the unassigned backlog above the reserve floor
    Distribute,
    /// Estimate how many workers the backlog needs
    Estimate,
    /// Show aggregate counts
    Stats,
    /// Show recent join events
    Events {
        /// Only events of this worker
        #[arg(long)]
        worker: Option<i64>,
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Register a worker. Reads the credential from stdin when not given.
    Add {
        /// Human-readable label
        label: String,
        /// Session credential
        #[arg(long)]
        credential: Option<String>,
    },
    /// List all workers
    List,
    /// Take a worker out of distribution and join runs
    Disable { id: i64 },
    /// Bring a disabled worker back
    Enable { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "joinq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    ensure_parent_dir(&config.database_url)?;
    let db = Arc::new(Db::connect(&config.database_url).await?);
    db.migrate().await?;

    let result = match cli.command {
        Command::Worker { action } => cmd_worker(&db, action, cli.json).await,
        Command::Ingest {
            links,
            file,
            source,
        } => cmd_ingest(&db, &config, links, file, &source, cli.json).await,
        Command::Distribute => cmd_distribute(&db, &config, cli.json).await,
        Command::Estimate => cmd_estimate(&db, &config, cli.json).await,
        Command::Stats => cmd_stats(&db, cli.json).await,
        Command::Events { worker, limit } => {
            cmd_events(&db, worker.map(WorkerId), limit, cli.json).await
        }
    };

    db.close().await;
    result
}

/// SQLite creates the file but not its directory.
fn ensure_parent_dir(url: &str) -> anyhow::Result<()> {
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
        _ => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_worker(db: &Db, action: WorkerAction, json: bool) -> anyhow::Result<()> {
    match action {
        WorkerAction::Add { label, credential } => {
            let credential = match credential {
                Some(c) => c,
                None => read_credential()?,
            };
            let credential = SecretString::from(credential);
            match db.add_worker(&credential, &label).await? {
                Some(id) => println!("Added worker {id} ({})", fingerprint(&credential)),
                None => anyhow::bail!("credential already registered"),
            }
        }
        WorkerAction::List => {
            let workers = db.list_workers().await?;
            if json {
                return print_json(&workers);
            }
            if workers.is_empty() {
                println!("No workers registered.");
                return Ok(());
            }
            println!(
                "{:<6}  {:<20}  {:<8}  {:>9}  ADDED",
                "ID", "LABEL", "STATUS", "PROCESSED"
            );
            println!("{}", "-".repeat(70));
            for w in &workers {
                println!(
                    "{:<6}  {:<20}  {:<8}  {:>9}  {}",
                    w.id,
                    w.label,
                    w.status,
                    w.links_processed,
                    w.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!("\n{} worker(s)", workers.len());
        }
        WorkerAction::Disable { id } => set_status(db, WorkerId(id), WorkerStatus::Disabled).await?,
        WorkerAction::Enable { id } => set_status(db, WorkerId(id), WorkerStatus::Active).await?,
    }
    Ok(())
}

fn read_credential() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        anyhow::bail!("no credential on stdin");
    }
    Ok(line)
}

async fn set_status(db: &Db, id: WorkerId, status: WorkerStatus) -> anyhow::Result<()> {
    if !db.set_worker_status(id, status).await? {
        anyhow::bail!("no worker {id}");
    }
    println!("Worker {id} is now {status}");
    Ok(())
}

async fn cmd_ingest(
    db: &Db,
    config: &Config,
    mut links: Vec<String>,
    file: Option<PathBuf>,
    source: &str,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(&path)?;
        let messages: Vec<&str> = content.lines().collect();
        let found = link::extract_from_messages(&messages, config.engine.scan_depth);
        eprintln!("Found {} link(s) in {}", found.len(), path.display());
        links.extend(found);
    }
    if links.is_empty() {
        anyhow::bail!("nothing to ingest: pass links or --file");
    }

    let report = db.ingest_targets(links, source).await?;
    if json {
        return print_json(&report);
    }
    println!("Received:   {}", report.received);
    println!("Added:      {}", report.added);
    println!("Duplicates: {}", report.duplicates);
    println!("Rejected:   {}", report.rejected);
    Ok(())
}

async fn cmd_distribute(db: &Arc<Db>, config: &Config, json: bool) -> anyhow::Result<()> {
    let report = Distributor::from_config(Arc::clone(db), &config.engine)
        .distribute()
        .await?;
    if json {
        return print_json(&report);
    }
    println!("Workers:        {}", report.workers);
    println!("Unassigned:     {}", report.unassigned_before);
    println!("Reserve floor:  {}", report.reserve_floor);
    println!("Distributable:  {}", report.distributable);
    for allocation in &report.per_worker {
        println!("  worker {:<6} +{}", allocation.worker_id, allocation.assigned);
    }
    println!("Assigned:       {}", report.assigned_total);
    println!("Reserve left:   {}", report.reserve_remaining());
    Ok(())
}

async fn cmd_estimate(db: &Arc<Db>, config: &Config, json: bool) -> anyhow::Result<()> {
    let estimate = Distributor::from_config(Arc::clone(db), &config.engine)
        .estimate()
        .await?;
    if json {
        return print_json(&estimate);
    }
    println!("Unassigned:      {}", estimate.unassigned);
    println!("Reserve floor:   {}", estimate.reserve_floor);
    println!("Distributable:   {}", estimate.distributable);
    println!("Per-worker cap:  {}", estimate.per_worker_cap);
    println!("Active workers:  {}", estimate.active_workers);
    println!("Workers needed:  {}", estimate.needed_workers);
    Ok(())
}

async fn cmd_stats(db: &Db, json: bool) -> anyhow::Result<()> {
    let stats = db.statistics().await?;
    if json {
        return print_json(&stats);
    }
    println!("Active workers:  {}", stats.workers);
    println!("Targets:         {}", stats.total_targets);
    println!("  assigned:      {}", stats.assigned);
    println!("  unassigned:    {}", stats.unassigned);
    println!("  reserve:       {}", stats.reserve);
    println!("  dead:          {}", stats.dead);
    println!("Assignments:");
    println!("  pending:       {}", stats.pending);
    println!("  success:       {}", stats.success);
    println!("  failed:        {}", stats.failed);
    Ok(())
}

async fn cmd_events(db: &Db, worker: Option<WorkerId>, limit: u64, json: bool) -> anyhow::Result<()> {
    let events = db.recent_events(worker, limit).await?;
    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    for e in &events {
        let who = e
            .worker_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<6}  {:<14}  {}  {}",
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            who,
            e.outcome,
            e.target,
            e.detail
        );
    }
    Ok(())
}
