//! netrate front-end.
//!
//! Runs the network rate monitor, prints each rate update and periodically
//! the busiest processes. With `--http` the same figures are served as
//! Prometheus metrics.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use netrate::config::{load_config, validate_effective_config, DEFAULT_BIND_ADDR, DEFAULT_PORT};
use netrate::{Config, NetMonitor, Source};
use prometheus::{Gauge, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Level};

mod cli;
mod commands;
mod handlers;
mod metrics;
mod state;

use cli::{Args, Commands, ConfigFormat, LogLevel};
use commands::{command_check, command_config, command_generate_testdata, command_top};
use handlers::{health_handler, metrics_handler};
use metrics::RateMetrics;
use state::AppState;

fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    // Override with CLI args
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if args.interval_ms.is_some() {
        config.interval_ms = args.interval_ms;
    }
    if args.churn_threshold.is_some() {
        config.churn_threshold = args.churn_threshold;
    }
    if args.top_n.is_some() {
        config.top_n = args.top_n;
    }
    if args.test_data_file.is_some() {
        config.test_data_file = args.test_data_file.clone();
    }
    if args.http {
        config.enable_http = Some(true);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

fn setup_logging(config: &Config, args: &Args) {
    // an explicit CLI level wins over the config file
    let level = match (&args.log_level, config.log_level.as_deref()) {
        (LogLevel::Info, Some(from_file)) => parse_level(from_file),
        (cli_level, _) => Some(cli_level.clone()),
    };
    let Some(level) = level else {
        return;
    };

    let max_level = match level {
        LogLevel::Off => return,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

fn parse_level(level: &str) -> Option<LogLevel> {
    match level.to_ascii_lowercase().as_str() {
        "off" => None,
        "error" => Some(LogLevel::Error),
        "warn" => Some(LogLevel::Warn),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => Some(LogLevel::Info),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn build_router(state: Arc<AppState>, enable_health: bool) -> Router {
    let mut app = Router::new().route("/metrics", get(metrics_handler));
    if enable_health {
        app = app.route("/health", get(health_handler));
    }
    app.with_state(state)
}

async fn serve_http(state: Arc<AppState>) -> Result<()> {
    let config = state.config.clone();
    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let app = build_router(state, config.enable_health.unwrap_or(true));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("netrate listening on http://{}:{}", bind_ip_str, port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Prints rate updates as they arrive and the ranked list every
/// `top_every` updates.
async fn print_updates(
    monitor: Arc<NetMonitor>,
    mut updates: mpsc::UnboundedReceiver<(String, String)>,
    top_n: usize,
    top_every: u64,
) {
    let mut count: u64 = 0;
    while let Some((up, down)) = updates.recv().await {
        println!("↑ {up:>10}   ↓ {down:>10}");
        count += 1;
        if top_every == 0 || count % top_every != 0 {
            continue;
        }
        for entry in monitor.top_entries(top_n).await {
            println!(
                "    {:<32} ↑ {:>10}   ↓ {:>10}",
                entry.identifier, entry.up_rate_text, entry.down_rate_text
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    let config = resolve_config(&args)?;

    // Handle subcommands
    if let Some(command) = &args.command {
        setup_logging(&config, &args);
        return match command {
            Commands::Check => command_check(&config).await,
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),
            Commands::Top { count, format } => {
                validate_effective_config(&config)?;
                command_top(&config, *count, format.clone()).await
            }
            Commands::GenerateTestdata {
                output,
                processes,
                samples,
            } => command_generate_testdata(output.clone(), *processes, *samples),
        };
    }

    // Validate config before starting the monitor
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config, &args);
    info!("Starting netrate");

    let source = Source::from_config(&config)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let monitor = Arc::new(NetMonitor::new(&config, source, move |up: &str, down: &str| {
        // the printer is gone only during shutdown
        let _ = tx.send((up.to_string(), down.to_string()));
    }));

    let printer = tokio::spawn(print_updates(
        monitor.clone(),
        rx,
        config.top_n(),
        args.top_every,
    ));

    let server_task = if config.enable_http.unwrap_or(false) {
        let registry = Registry::new();
        let metrics = RateMetrics::new(&registry)
            .map_err(|e| anyhow::anyhow!("Failed to register metrics: {e}"))?;
        let scrape_duration = Gauge::new(
            "netrate_scrape_duration_seconds",
            "Time spent refreshing gauges for a /metrics request",
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;
        debug!("All metrics registered successfully");

        let state = Arc::new(AppState {
            registry,
            metrics,
            scrape_duration,
            monitor: monitor.clone(),
            config: Arc::new(config.clone()),
        });
        Some(tokio::spawn(serve_http(state)))
    } else {
        None
    };

    monitor.start().await;

    match server_task {
        Some(mut server) => {
            tokio::select! {
                result = &mut server => {
                    match result {
                        Ok(Err(e)) => error!("Server error: {:#}", e),
                        Err(e) => error!("Server task failed: {}", e),
                        Ok(Ok(())) => {}
                    }
                }
                _ = shutdown_signal() => {
                    info!("Shutdown signal received, exiting...");
                }
            }
            server.abort();
            let _ = server.await;
        }
        None => shutdown_signal().await,
    }

    // terminates any in-flight accounting command
    monitor.stop().await;
    printer.abort();
    let _ = printer.await;

    info!("netrate stopped gracefully");
    Ok(())
}
