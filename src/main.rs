//! videomemoryd — multi-camera VLM-driven video monitoring engine.
//!
//! Usage:
//!   videomemoryd record --config config.toml
//!   videomemoryd status --config config.toml
//!   videomemoryd tasks  --config config.toml [--io-id 0]
//!   videomemoryd devices --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use videomemory::api;
use videomemory::config::Config;
use videomemory::device::detect::platform_detector;
use videomemory::device::io_manager::IoManager;
use videomemory::dispatch::ActionDispatcher;
use videomemory::manager::TaskManager;
use videomemory::store::TaskStore;

#[derive(Parser)]
#[command(name = "videomemoryd", about = "Multi-camera VLM-driven video monitoring engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine: enumerate devices, recover prior tasks, serve the API.
    Record {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// List known tasks, optionally filtered to one camera.
    Tasks {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long = "io-id")]
        io_id: Option<String>,
    },
    /// List detected local cameras and registered network cameras.
    Devices {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Record { config } => run_record(config).await,
        Command::Status { config } => run_status(config),
        Command::Tasks { config, io_id } => run_tasks(config, io_id),
        Command::Devices { config } => run_devices(config),
    }
}

fn load_config(config_path: &PathBuf) -> Config {
    match Config::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    }
}

fn open_store(cfg: &Config) -> Arc<TaskStore> {
    match TaskStore::open(&cfg.store.db_path()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to open task store");
            std::process::exit(1);
        }
    }
}

async fn run_record(config_path: PathBuf) {
    let cfg = load_config(&config_path);
    info!(db_path = ?cfg.store.db_path(), api_port = cfg.api.port, "Starting videomemory engine");

    let store = open_store(&cfg);
    if let Err(e) = store.load_settings_to_env() {
        error!(error = %e, "Failed to load settings into environment");
    }

    let io_manager = Arc::new(IoManager::new(platform_detector(), store.clone(), cfg.rtsp_pull_port));
    let dispatcher = Arc::new(ActionDispatcher::new(store.clone()));
    let provider_factory = videomemory::provider::factory::ProviderFactory::new();
    let provider = provider_factory.build(cfg.video_ingestor_model.as_deref(), &store);
    let provider: Arc<dyn videomemory::provider::ModelProvider> = Arc::from(provider);

    let manager = match TaskManager::new(io_manager.clone(), store.clone(), dispatcher, provider, provider_factory) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "Failed to start task manager");
            std::process::exit(1);
        }
    };

    if cfg.api.enabled {
        let state = Arc::new(api::AppState {
            manager: manager.clone(),
            io_manager: io_manager.clone(),
            started_at: std::time::Instant::now(),
        });
        let port = cfg.api.port;
        tokio::spawn(async move {
            api::start_server(state, port).await;
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }
}

fn run_status(config_path: PathBuf) {
    let cfg = load_config(&config_path);
    let store = open_store(&cfg);
    let io_manager = IoManager::new(platform_detector(), store.clone(), cfg.rtsp_pull_port);

    let devices = io_manager.list(false);
    let tasks = store.load_all_tasks().unwrap_or_default();
    let active = tasks.iter().filter(|t| !t.is_done()).count();

    println!("=== videomemory status ===");
    println!("Store       : {}", cfg.store.db_path().display());
    println!("Devices     : {}", devices.len());
    println!("Tasks       : {} total, {} active", tasks.len(), active);
}

fn run_tasks(config_path: PathBuf, io_id: Option<String>) {
    let cfg = load_config(&config_path);
    let store = open_store(&cfg);

    let tasks = store.load_all_tasks().unwrap_or_default();
    let tasks: Vec<_> = match &io_id {
        Some(io_id) => tasks.into_iter().filter(|t| &t.io_id == io_id).collect(),
        None => tasks,
    };

    if tasks.is_empty() {
        println!("No tasks found");
        return;
    }

    println!("{:<6} {:<6} {:<8} {:<8} {}", "ID", "#", "IO", "DONE", "DESCRIPTION");
    for task in &tasks {
        println!(
            "{:<6} {:<6} {:<8} {:<8} {}",
            task.task_id,
            task.task_number,
            task.io_id,
            task.is_done(),
            task.task_desc(),
        );
    }
}

fn run_devices(config_path: PathBuf) {
    let cfg = load_config(&config_path);
    let store = open_store(&cfg);
    let io_manager = IoManager::new(platform_detector(), store, cfg.rtsp_pull_port);

    let devices = io_manager.list(false);
    if devices.is_empty() {
        println!("No devices detected");
        return;
    }

    println!("{:<8} {:<10} {:<20} {}", "IO_ID", "SOURCE", "NAME", "PULL_URL");
    for device in &devices {
        let source = match device.source {
            videomemory::model::DeviceSource::Local => "local",
            videomemory::model::DeviceSource::Network => "network",
        };
        println!(
            "{:<8} {:<10} {:<20} {}",
            device.io_id,
            source,
            device.name,
            device.pull_url.as_deref().unwrap_or("-"),
        );
    }
}
