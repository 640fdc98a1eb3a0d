mod db;
mod error;
mod models;
mod settings;
mod timer;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use tokio::sync::broadcast::error::RecvError;

pub use db::{Database, SessionSink};
pub use error::{TimerError, TimerResult};
pub use models::{SessionRecord, SessionStatus, SessionType};
pub use settings::{SettingsStore, TimerConfig};
pub use timer::{
    ActiveSession, EventDispatcher, EventHandler, HandlerId, SessionManager, SessionSnapshot,
    TimerEngine, TimerEvent, TimerEventKind,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Work,
    Break,
    LongBreak,
}

impl From<KindArg> for SessionType {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Work => SessionType::Work,
            KindArg::Break => SessionType::Break,
            KindArg::LongBreak => SessionType::LongBreak,
        }
    }
}

/// Run one countdown session and log its events.
#[derive(Debug, Parser)]
#[command(name = "lightime", version)]
struct Cli {
    /// Session length in minutes; defaults to the configured duration.
    #[arg(short, long)]
    minutes: Option<u32>,

    #[arg(short, long, value_enum, default_value = "work")]
    kind: KindArg,

    /// Settings file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session history database.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("lightime"))
        .ok_or_else(|| anyhow!("could not determine a data directory"))
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let settings_path = match cli.config {
        Some(path) => path,
        None => data_dir()?.join("settings.json"),
    };
    let db_path = match cli.db {
        Some(path) => path,
        None => data_dir()?.join("lightime.sqlite3"),
    };

    let settings = SettingsStore::new(settings_path)?;
    let database = Database::new(db_path)?;
    let engine = TimerEngine::with_sink(settings.timer_config(), Arc::new(database));

    for kind in TimerEventKind::ALL {
        engine.events().add_handler(kind, |event| {
            let payload = serde_json::to_string(&event.payload())?;
            info!("{} {}", event.kind(), payload);
            Ok(())
        });
    }

    let mut events = engine.events().subscribe();
    let snapshot = engine
        .start_session(cli.minutes, cli.kind.into())
        .await
        .context("failed to start session")?;

    loop {
        match events.recv().await {
            Ok(event)
                if event.session_id() == snapshot.session_id
                    && matches!(
                        event.kind(),
                        TimerEventKind::SessionCompleted | TimerEventKind::SessionCancelled
                    ) =>
            {
                break
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }

    engine.shutdown().await;
    info!("Lightime shutting down");
    Ok(())
}
