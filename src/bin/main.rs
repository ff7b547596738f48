use std::path::PathBuf;
use std::sync::Arc;

use buildfarm::backend::{
    Collaborators, CommandCompiler, DirectoryBlobStore, DirectoryResolver, JsonlRecordStore,
};
use buildfarm::config::{self, ServiceSettings};
use buildfarm::server::{self, AppState};
use buildfarm::{AdmissionQueue, JobService};
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Build-farm front end: admits compile jobs over WebSockets and publishes
/// their artifacts
#[derive(Parser)]
#[command(name = "buildfarm")]
#[command(version)]
#[command(about = "Build-farm front end: admits compile jobs over WebSockets and publishes their artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: $XDG_CONFIG_HOME/buildfarm/buildfarm.toml)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config_file: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Jobs allowed to run at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Jobs allowed to wait for a slot
    #[arg(long)]
    max_queue: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (the default)
    Serve,
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Init,
    /// Print the path the configuration is read from
    Path,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut ServiceSettings) {
        if let Some(listen) = &self.listen {
            settings.listen = listen.clone();
        }
        if let Some(max_concurrent) = self.max_concurrent {
            settings.queue.max_concurrent = max_concurrent;
        }
        if let Some(max_queue) = self.max_queue {
            settings.queue.max_queue = max_queue;
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Config {
            action: ConfigAction::Init,
        }) => match config::default_settings_toml() {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Config {
            action: ConfigAction::Path,
        }) => match cli.config_file.clone().or_else(config::user_config_path) {
            Some(path) => println!("{}", path.display()),
            None => {
                eprintln!("Error: Could not determine the configuration directory.");
                std::process::exit(1);
            }
        },
        Some(Commands::Serve) | None => {
            if let Err(e) = serve(&cli).await {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn serve(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = config::load_settings(cli.config_file.as_deref())?;
    cli.apply_overrides(&mut settings);
    settings.validate().map_err(config::ConfigError::Invalid)?;

    let backend = Collaborators {
        resolver: DirectoryResolver::new(&settings.compiler.source_root),
        compiler: CommandCompiler::new(settings.compiler.command.clone()),
        blobs: Arc::new(DirectoryBlobStore::new(&settings.storage.blob_root)),
        records: JsonlRecordStore::new(&settings.storage.record_path),
    };
    let queue = AdmissionQueue::new(settings.queue.max_concurrent, settings.queue.max_queue);
    let shutdown = CancellationToken::new();
    let service = Arc::new(JobService::new(
        backend,
        queue,
        settings.to_runner_settings(),
        settings.to_connection_settings(),
        shutdown.clone(),
    ));
    let state = AppState::new(
        service,
        settings.hosts.clone(),
        settings.assets_dir.clone(),
    );

    let listener = TcpListener::bind(&settings.listen).await?;
    tokio::spawn(watch_signals(shutdown.clone()));
    server::serve(listener, state, shutdown, settings.shutdown_grace()).await?;
    info!("Shut down");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Installing SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("Shutdown requested");
    shutdown.cancel();
}
