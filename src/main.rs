use std::{
    sync::mpsc::{self, RecvTimeoutError},
    time::Duration,
};

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*};

use kestrel::{
    Catalog, Indexer, IndexerEvent, SqliteCatalog,
    settings::{
        CATALOG_FILE, SETTINGS_FILE, default_data_dir, scan::default_music_dir,
        storage::SettingsStorage,
    },
};

const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

/// How often `scan` prints a status line while a pass runs.
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "kestrel", version, about = "Keep a music catalog in sync with your folders")]
struct Cli {
    /// Catalog database to use. Defaults to the platform data directory.
    #[arg(long, global = true)]
    catalog: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a directory to be indexed (defaults to your music directory)
    Add { path: Option<Utf8PathBuf> },
    /// Unregister a directory and drop everything indexed under it
    Remove { path: Utf8PathBuf },
    /// List registered directories
    Paths,
    /// Run a synchronization pass and report progress until it ends
    Scan,
    /// Print catalog statistics as JSON
    Status,
}

fn main() -> anyhow::Result<()> {
    let env = tracing_subscriber::EnvFilter::builder().parse(
        ["KESTREL_LOG", "RUST_LOG"] // prefer the program-specific variable
            .iter()
            .find_map(|key| std::env::var(key).ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "info,symphonia=warn,sqlx=warn".to_owned()),
    )?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_timer(tracing_subscriber::fmt::time::uptime())
                .with_filter(env),
        )
        .init();

    tracing::debug!("version {VERSION_STRING}");

    let cli = Cli::parse();

    let location = match cli.catalog {
        Some(location) => location,
        None => default_data_dir()
            .context("couldn't determine the data directory, pass --catalog")?
            .join(CATALOG_FILE),
    };
    let storage = SettingsStorage::new(location.with_file_name(SETTINGS_FILE));
    let settings = storage.load_or_default();
    storage.save(&settings);

    match cli.command {
        Command::Add { path } => {
            let path = match path.or_else(default_music_dir) {
                Some(path) => path,
                None => bail!("no directory given and no music directory found"),
            };
            if !path.is_dir() {
                bail!("{} is not a directory", path);
            }

            let indexer = start(&location, Indexer::with_defaults(settings.scanning))?;
            let updated = notify_on(&indexer, IndexerEvent::PathsUpdated);
            if !indexer.add_path(&path) {
                println!("{} is already registered", path);
                return Ok(());
            }
            updated
                .recv()
                .context("indexer stopped before saving the directory")?;
            println!("Added {}", path);
        }
        Command::Remove { path } => {
            let indexer = start(&location, Indexer::with_defaults(settings.scanning))?;
            let updated = notify_on(&indexer, IndexerEvent::PathsUpdated);
            if !indexer.remove_path(&path) {
                bail!("{} is not registered", path);
            }
            updated
                .recv()
                .context("indexer stopped before removing the directory")?;
            println!("Removed {}", path);
        }
        Command::Paths => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let catalog = SqliteCatalog::open(&location).await?;
                for root in catalog.roots().await? {
                    println!("{}", root.path);
                }
                catalog.close().await;
                anyhow::Ok(())
            })?;
        }
        Command::Scan => {
            let indexer = Indexer::with_defaults(settings.scanning);
            let ended = notify_on(&indexer, IndexerEvent::SynchronizeEnd);
            let indexer = start(&location, indexer)?;

            loop {
                match ended.recv_timeout(STATUS_INTERVAL) {
                    Ok(()) if indexer.restarted() => continue,
                    Ok(()) => break,
                    Err(RecvTimeoutError::Timeout) => eprintln!("{}", indexer.status()),
                    Err(RecvTimeoutError::Disconnected) => bail!("indexer stopped unexpectedly"),
                }
            }

            let status = indexer.status();
            if let Some(error) = &status.last_error {
                bail!("synchronization failed: {}", error);
            }
            println!("{}", status);
        }
        Command::Status => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(async {
                let catalog = SqliteCatalog::open(&location).await?;
                let counts = catalog.counts().await?;
                let roots: Vec<_> = catalog
                    .roots()
                    .await?
                    .into_iter()
                    .map(|root| root.path)
                    .collect();
                catalog.close().await;
                anyhow::Ok(serde_json::json!({
                    "catalog": location,
                    "roots": roots,
                    "counts": counts,
                }))
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn start(location: &Utf8Path, mut indexer: Indexer) -> anyhow::Result<Indexer> {
    indexer
        .startup(location)
        .with_context(|| format!("couldn't start the indexer with catalog {}", location))?;
    Ok(indexer)
}

/// A channel that receives a unit every time `event` fires.
fn notify_on(indexer: &Indexer, event: IndexerEvent) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    indexer.events().subscribe(event, move |_| {
        let _ = tx.send(());
    });
    rx
}
