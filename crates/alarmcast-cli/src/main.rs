//! Alarmcast - audio upload notifier
//!
//! Watches an object store for new audio files and tells a device over MQTT
//! where to fetch them.

mod commands;

use alarmcast_core::config::{LogFormat, LoggingConfig};
use alarmcast_core::NotifierConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "alarmcast")]
#[command(author = "Alarmcast Team")]
#[command(version = alarmcast_core::VERSION)]
#[command(about = "Notify MQTT devices about new audio uploads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ALARMCAST_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP trigger receiver
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Port number
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Handle one upload event and exit
    Handle {
        /// Bucket of the uploaded object
        #[arg(long, requires = "path", conflicts_with = "event")]
        bucket: Option<String>,

        /// Object path inside the bucket
        #[arg(long, requires = "bucket")]
        path: Option<String>,

        /// Trigger payload file; `-` reads stdin
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /// Print the signed read URL for an object
    Presign {
        bucket: String,
        key: String,

        /// Lifetime in seconds
        #[arg(short, long)]
        expires: Option<u64>,
    },

    /// Resolve configuration and report what is missing
    CheckConfig,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = NotifierConfig::from_file(path)?;
            config.apply_env();
            config
        }
        None => NotifierConfig::from_env(),
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    init_logging(&config.logging);

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve(config).await?;
        }
        Commands::Handle {
            bucket,
            path,
            event,
        } => {
            let source = match (bucket, path, event) {
                (Some(bucket), Some(path), _) => commands::EventSource::Direct { bucket, path },
                (_, _, Some(file)) => commands::EventSource::Payload(file),
                _ => commands::EventSource::Payload(PathBuf::from("-")),
            };
            commands::handle(config, source).await?;
        }
        Commands::Presign {
            bucket,
            key,
            expires,
        } => {
            commands::presign(config, &bucket, &key, expires).await?;
        }
        Commands::CheckConfig => {
            commands::check_config(&config)?;
        }
        Commands::Version => {
            println!("alarmcast {}", alarmcast_core::VERSION);
        }
    }

    Ok(())
}

/// Logs go to stderr so `presign` output stays pipeable
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }

    info!(version = alarmcast_core::VERSION, "Alarmcast starting");
}
