//! OData Mock Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use odata_mock_server::http::{serve, shutdown_signal};
use odata_mock_server::{FileManifestLoader, InitOptions, MockServer, MockServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "odata-mock-server",
    about = "OData mock server - entity set simulation and fixture routes for web apps",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Listen address, overrides the configured one (e.g. "127.0.0.1:8080")
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Response delay in milliseconds
    #[arg(long, value_name = "MS")]
    delay: Option<u64>,

    /// Make the metadata document fail
    #[arg(long)]
    metadata_error: bool,

    /// Make every route fail ("badRequest" answers 400, anything else 500)
    #[arg(long, value_name = "TYPE")]
    error_type: Option<String>,

    /// Launch URL whose query parameters (serverDelay, metadataError,
    /// errorType) apply when the matching option is not given
    #[arg(long, value_name = "URL")]
    launch_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn init_options(&self) -> InitOptions {
        let mut options = InitOptions::default();
        if let Some(url) = &self.launch_url {
            options = options.with_launch_url(url);
        }
        if let Some(delay) = self.delay {
            options = options.with_delay(delay);
        }
        if self.metadata_error {
            options = options.with_metadata_error(true);
        }
        if let Some(error_type) = &self.error_type {
            options = options.with_error_type(error_type);
        }
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        MockServerConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} entity sets, {} routes defined)",
            config.entity_sets.len(),
            config.routes.len()
        );
        return Ok(());
    }

    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| config.settings.listen.clone());
    let loader = FileManifestLoader::new(config.manifest_path());

    let mut server = MockServer::new(config);
    server.init(&loader, args.init_options()).await?;

    let listener = TcpListener::bind(&listen).await?;
    serve(listener, Arc::new(Mutex::new(server)), shutdown_signal()).await?;

    info!("Mock server stopped");
    Ok(())
}
