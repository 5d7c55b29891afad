use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dsp_events::cli::{EventCli, EventCommand};
use dsp_events::{ConfigLoader, EventDispatcher, RequestContext};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dsp-events")]
#[command(about = "Inspect and drive the DSP event dispatcher")]
struct Cli {
    /// Configuration file (defaults to the merged project/user configuration)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dispatcher identity to operate on
    #[arg(short, long, global = true)]
    dispatcher: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered listeners
    Listeners {
        /// Only show listeners of this event
        #[arg(short, long)]
        event: Option<String>,

        /// Output format (table or json)
        #[arg(short, long)]
        format: Option<String>,
    },
    /// List mapped event scripts
    Scripts {
        /// Output format (table or json)
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Rebuild script mappings now
    Rescan,
    /// Clear the stored listener and script tables
    Flush,
    /// Dispatch an event
    Dispatch {
        /// Event name, e.g. user.created
        event: String,

        /// Event data as JSON
        #[arg(long)]
        data: Option<String>,

        /// Request path that triggered the event
        #[arg(long, default_value = "/")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigLoader::load().context("Failed to load event configuration")?,
    };
    if let Some(id) = cli.dispatcher {
        config = config.with_dispatcher_id(id);
    }

    let (command, request) = match cli.command {
        Commands::Listeners { event, format } => {
            (EventCommand::Listeners { event, format }, RequestContext::default())
        }
        Commands::Scripts { format } => (EventCommand::Scripts { format }, RequestContext::default()),
        Commands::Rescan => (EventCommand::Rescan, RequestContext::default()),
        Commands::Flush => (EventCommand::Flush, RequestContext::default()),
        Commands::Dispatch { event, data, path } => {
            (EventCommand::Dispatch { event, data }, RequestContext::new(path))
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let dispatcher = EventDispatcher::builder(Arc::new(config))
        .request(request)
        .cancellation_token(cancel)
        .open()
        .await?;

    let output = EventCli::new(dispatcher).execute(command).await?;
    println!("{}", output);

    Ok(())
}
