//! StockSync CLI - offline-first client for the product entries API.
//!
//! Writes made while the API is unreachable are queued locally and replayed
//! by `stocksync sync` or by a running `stocksync watch`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stocksync_common::{Record, RecordId};
use stocksync_storage::{DurableStore, LocalStore};
use stocksync_sync::{
    ClientConfig, ConnectivityProbe, ConnectivityTracker, HttpCatalog, Operation,
    RemoveOutcome, ReplayScheduler, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "stocksync")]
#[command(about = "StockSync - Offline-first product catalog client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the local cache and queue.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Collection URL of the product entries API.
    #[arg(long, global = true)]
    api: Option<String>,

    /// Skip the connectivity probe and act offline.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all entries.
    List,

    /// Add an entry.
    Add {
        /// Name of the user logging the entry.
        #[arg(short, long)]
        user: String,

        /// Product model.
        #[arg(short, long)]
        model: String,

        /// Part number.
        #[arg(short, long)]
        part: String,

        #[arg(short, long)]
        quantity: i32,

        #[arg(long)]
        price: f64,
    },

    /// Remove an entry by id (negative ids are local drafts).
    Remove {
        #[arg(allow_hyphen_values = true)]
        id: i32,
    },

    /// Replay queued changes now.
    Sync,

    /// Show queued changes.
    Pending,

    /// Probe connectivity and replay on reconnect until Ctrl-C.
    Watch,
}

/// Everything a command needs.
struct Client {
    config: ClientConfig,
    tracker: Arc<ConnectivityTracker>,
    sync: Arc<SyncOrchestrator<HttpCatalog>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = open_client(&cli)?;

    if !cli.offline && !matches!(cli.command, Commands::Watch) {
        probe_once(&client).await?;
    }

    match cli.command {
        Commands::List => cmd_list(&client).await,

        Commands::Add {
            user,
            model,
            part,
            quantity,
            price,
        } => cmd_add(&client, Record::new(user, model, part, quantity, price)).await,

        Commands::Remove { id } => cmd_remove(&client, RecordId::from(id)).await,

        Commands::Sync => cmd_sync(&client).await,

        Commands::Pending => cmd_pending(&client).await,

        Commands::Watch => cmd_watch(client).await,
    }
}

/// Default config location.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stocksync")
        .join("config.json")
}

/// Build the client from config file and flags.
fn open_client(cli: &Cli) -> Result<Client> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;

    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(api) = &cli.api {
        config = config.with_api_base_url(api);
    }
    config.validate().context("Invalid configuration")?;

    let store = LocalStore::new(&config.data_dir)
        .with_context(|| format!("Failed to open data dir {}", config.data_dir.display()))?;
    let remote = HttpCatalog::new(&config.api_base_url).context("Invalid API URL")?;

    // Offline until a probe says otherwise.
    let tracker = Arc::new(ConnectivityTracker::with_initial(false));
    let sync = Arc::new(SyncOrchestrator::from_config(
        Arc::new(remote),
        tracker.clone(),
        DurableStore::new(store),
        &config,
    ));

    Ok(Client {
        config,
        tracker,
        sync,
    })
}

async fn probe_once(client: &Client) -> Result<()> {
    let probe = ConnectivityProbe::new(&client.config.probe, client.tracker.clone())
        .context("Invalid probe configuration")?;
    if !probe.check_once().await {
        warn!("Server unreachable, working offline");
    }
    Ok(())
}

fn print_record(record: &Record) {
    let marker = if record.id.is_pending() { "*" } else { " " };
    println!(
        "{}{:>6}  {:<20} {:<16} {:>6} {:>10.2}  {:<16} {}",
        marker,
        record.id,
        record.product_model,
        record.part_number,
        record.quantity,
        record.price,
        record.user_name,
        record.entry_date_time.format("%Y-%m-%d %H:%M"),
    );
}

/// List entries.
async fn cmd_list(client: &Client) -> Result<()> {
    let records = client.sync.fetch_all().await;

    if !client.sync.is_online() {
        println!("(offline, showing cached entries)");
    }
    if records.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    println!(
        " {:>6}  {:<20} {:<16} {:>6} {:>10}  {:<16} {}",
        "ID", "MODEL", "PART", "QTY", "PRICE", "USER", "ENTERED"
    );
    for record in &records {
        print_record(record);
    }

    let local = records.iter().filter(|r| r.id.is_pending()).count();
    if local > 0 {
        println!("\n* {} entries not yet on the server", local);
    }
    Ok(())
}

/// Add an entry.
async fn cmd_add(client: &Client, record: Record) -> Result<()> {
    info!("Adding entry: {}", record.product_model);

    let outcome = client
        .sync
        .create(record)
        .await
        .context("Failed to save entry")?;

    if outcome.is_queued() {
        println!(
            "Saved offline as #{}. It will be uploaded when the server is reachable.",
            outcome.record().id
        );
    } else if outcome.record().id == RecordId::Unassigned {
        println!("Created entry.");
    } else {
        println!("Created entry #{}.", outcome.record().id);
    }
    Ok(())
}

/// Remove an entry.
async fn cmd_remove(client: &Client, id: RecordId) -> Result<()> {
    info!("Removing entry: {}", id);

    let outcome = client
        .sync
        .delete(id)
        .await
        .with_context(|| format!("Failed to remove entry {}", id))?;

    match outcome {
        RemoveOutcome::Synced(_) => println!("Removed entry #{}.", id),
        RemoveOutcome::Queued => println!(
            "Removed #{} locally. The server will be updated when reachable.",
            id
        ),
        RemoveOutcome::Discarded => println!("Discarded local entry #{}.", id),
    }
    Ok(())
}

/// Replay queued changes.
async fn cmd_sync(client: &Client) -> Result<()> {
    let report = client.sync.synchronize().await;

    if report.skipped {
        println!("Offline, nothing synced.");
    } else if report.attempted == 0 {
        println!("Nothing to sync.");
    } else {
        println!("Sync completed in {:?}", report.duration);
        println!("  Synced: {}", report.succeeded);
        println!("  Failed: {}", report.failed);
    }
    Ok(())
}

/// Show queued changes.
async fn cmd_pending(client: &Client) -> Result<()> {
    let pending = client
        .sync
        .pending_operations()
        .await
        .context("Failed to read the queue")?;

    if pending.is_empty() {
        println!("No pending changes.");
        return Ok(());
    }

    for entry in &pending {
        let detail = match &entry.operation {
            Operation::Create(record) | Operation::Update(record) => {
                format!("{} ({})", record.product_model, record.part_number)
            }
            Operation::Delete(_) => String::new(),
        };
        println!(
            "{}  {:<6} #{:<6} {}",
            entry.queued_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind(),
            entry.operation.record_id(),
            detail
        );
    }
    println!("\n{} pending", pending.len());
    Ok(())
}

/// Probe and replay until interrupted.
async fn cmd_watch(client: Client) -> Result<()> {
    client.tracker.on_change(|online| {
        if online {
            println!("Online");
        } else {
            println!("Offline");
        }
    });

    let (scheduler, handle) = ReplayScheduler::new(client.tracker.clone());
    let sync = client.sync.clone();
    let scheduler_task = tokio::spawn(handle.run(move || {
        let sync = sync.clone();
        async move { sync.synchronize().await }
    }));

    let probe = ConnectivityProbe::new(&client.config.probe, client.tracker.clone())
        .context("Invalid probe configuration")?
        .spawn();

    info!("Watching {} (Ctrl-C to stop)", client.config.api_base_url);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    probe.stop().await;
    scheduler.shutdown();
    let _ = scheduler_task.await;

    info!("Stopped");
    Ok(())
}
