//! Wiretap Traffic Control - CLI Entry Point
//!
//! Loads a configuration, optionally applies one operator command and runs a
//! single request through the traffic control pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wiretap_traffic_control::engine::{GeneratedMock, StaticMockEngine};
use wiretap_traffic_control::traffic_control::TRAFFIC_CONTROL_HEADER;
use wiretap_traffic_control::{
    ChannelMonitor, InMemoryConfigStore, MockRequest, MockResponder, RequestDisposition,
    ServiceRequest, TrafficControlService, WiretapConfiguration,
};

#[derive(Parser, Debug)]
#[command(
    name = "wiretap-traffic-control",
    about = "Traffic control for an intercepting proxy - mock/forward decisions and mock rewriting",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wiretap.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Traffic control command to apply before the request
    #[arg(long, value_name = "NAME")]
    command: Option<String>,

    /// JSON payload of the command
    #[arg(long, value_name = "JSON", default_value = "")]
    payload: String,

    /// Request path to run through traffic control
    #[arg(long, value_name = "PATH")]
    request_path: Option<String>,

    /// Request method
    #[arg(long, default_value = "GET")]
    method: String,

    /// Value of the traffic control header
    #[arg(long, value_name = "VALUE")]
    traffic_control: Option<String>,

    /// File holding the request body
    #[arg(long, value_name = "FILE")]
    request_body: Option<PathBuf>,

    /// File holding the mock body the engine produces
    #[arg(long, value_name = "FILE")]
    mock_body: Option<PathBuf>,

    /// Status code the engine produces
    #[arg(long, default_value_t = 200)]
    mock_status: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        WiretapConfiguration::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no route overrides)");
        WiretapConfiguration::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} route overrides defined)",
            config.traffic_control_routes_override.len()
        );
        return Ok(());
    }

    let store = Arc::new(InMemoryConfigStore::new(config));

    if let Some(command) = &args.command {
        let service = TrafficControlService::new(store.clone());
        let request = ServiceRequest::new(command.as_str(), args.payload.as_str());
        if let Some(response) = service.handle_request(&request).await? {
            println!("{}", String::from_utf8_lossy(&response.to_bytes()));
        }
    }

    let Some(path) = &args.request_path else {
        return Ok(());
    };

    let body = match &args.mock_body {
        Some(file) => tokio::fs::read(file)
            .await
            .with_context(|| format!("reading mock body {:?}", file))?,
        None => b"{}".to_vec(),
    };
    let engine = StaticMockEngine::new(GeneratedMock::ok(args.mock_status, body));
    let monitor = ChannelMonitor::default();
    let mut events = monitor.subscribe();

    let responder = MockResponder::new(store, Arc::new(engine), Arc::new(monitor));

    let mut request = MockRequest::new(args.method.as_str(), path);
    if let Some(value) = &args.traffic_control {
        request = request.with_header(TRAFFIC_CONTROL_HEADER, value.as_str());
    }
    if let Some(file) = &args.request_body {
        let body = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading request body {:?}", file))?;
        request = request.with_body(body);
    }

    match responder.handle(request).await {
        RequestDisposition::Forward(request) => {
            println!("{}", serde_json::json!({ "forward": request }));
        }
        RequestDisposition::Mocked(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.response)?);
            if outcome.broadcast.finished().await {
                if let Ok(event) = events.try_recv() {
                    info!(recorded_at = %event.recorded_at, path = %event.request.path, "Broadcast published");
                }
            }
        }
    }

    Ok(())
}
