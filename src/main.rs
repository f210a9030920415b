use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camwatch::config::{AppConfig, CameraConfig, ConfigStore};
use camwatch::events::{EventBus, MonitorEvent};
use camwatch::monitor::{CameraMonitorService, MonitorSettings};
use camwatch::probe::ReachabilityProbe;
use camwatch::stats::StatsCollector;
use camwatch::transport::RtspTransport;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camwatch command line arguments
#[derive(Parser, Debug)]
#[command(name = "camwatch")]
#[command(version, about = "RTSP camera liveness monitor", long_about = None)]
struct CliArgs {
    /// Configuration file
    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        env = "CAMWATCH_CONFIG",
        default_value = "camwatch.json",
        global = true
    )]
    config: PathBuf,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write a daily rolling camwatch log into this directory
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor every configured camera until Ctrl-C (default)
    Run,
    /// Stream from one camera for a few seconds and print its stats
    Test {
        /// Camera name
        #[arg(long)]
        camera: String,
        /// Test window (default from config)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Check whether a camera's host answers RTSP
    Probe {
        /// Camera name
        #[arg(long)]
        camera: String,
        /// Probe timeout (default from config)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// Print configured cameras
    List,
    /// Add a camera, or replace the one with the same name
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "URL")]
        url: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Per-camera offline timeout
        #[arg(long, value_name = "MS")]
        offline_timeout_ms: Option<u64>,
    },
    /// Remove a camera
    Remove {
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let store = ConfigStore::open(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| store.get().logging.dir.as_ref().map(PathBuf::from));
    // Dropping the guard flushes the file writer
    let _log_guard = init_logging(args.log_level, args.verbose, args.log_json, log_dir.as_deref());

    tracing::debug!("Configuration file: {}", store.path().display());

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&store).await,
        Command::Test { camera, seconds } => test(&store, &camera, seconds).await,
        Command::Probe { camera, timeout_ms } => probe(&store, &camera, timeout_ms).await,
        Command::List => {
            list(&store.get());
            Ok(())
        }
        Command::Add {
            name,
            url,
            username,
            password,
            offline_timeout_ms,
        } => {
            let camera = CameraConfig {
                name,
                rtsp_url: url,
                username,
                password,
                offline_timeout_ms,
            };
            let name = camera.name.clone();
            store
                .update(move |config| {
                    config.cameras.retain(|c| c.name != camera.name);
                    config.cameras.push(camera);
                })
                .await?;
            tracing::info!("Camera {} saved", name);
            Ok(())
        }
        Command::Remove { name } => {
            if store.get().camera(&name).is_none() {
                anyhow::bail!("no camera named {}", name);
            }
            store
                .update(|config| config.cameras.retain(|c| c.name != name))
                .await?;
            tracing::info!("Camera {} removed", name);
            Ok(())
        }
    }
}

async fn run(store: &ConfigStore) -> anyhow::Result<()> {
    let config = store.get();
    let endpoints = config.endpoints()?;
    if endpoints.is_empty() {
        tracing::warn!(
            "No cameras configured in {}, nothing to monitor",
            store.path().display()
        );
        return Ok(());
    }

    tracing::info!("Starting camwatch v{}", env!("CARGO_PKG_VERSION"));

    let events = Arc::new(EventBus::new());
    let service = CameraMonitorService::new(
        Arc::new(RtspTransport::new().with_connect_timeout(config.connect_timeout())),
        events.clone(),
        MonitorSettings::from(config.as_ref()),
    );

    let mut rx = events.subscribe();
    service.start_monitoring(endpoints).await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!("Event log lagged, {} events skipped", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.stop_monitoring().await;
    tracing::info!("Monitoring stopped");
    Ok(())
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::CameraStatusChanged {
            camera,
            offline,
            timestamp,
        } => {
            let status = if *offline { "OFFLINE" } else { "ONLINE" };
            tracing::info!("[{}] {} is {}", timestamp.to_rfc3339(), camera, status);
        }
        other => match serde_json::to_string(other) {
            Ok(json) => tracing::debug!("{}", json),
            Err(e) => tracing::debug!("{}: unserializable event: {}", other.event_name(), e),
        },
    }
}

async fn test(store: &ConfigStore, camera: &str, seconds: Option<u64>) -> anyhow::Result<()> {
    let config = store.get();
    let endpoint = config
        .camera(camera)
        .with_context(|| format!("no camera named {}", camera))?
        .endpoint(config.offline_timeout())?;
    let window = Duration::from_secs(seconds.unwrap_or(config.diagnostics.test_seconds));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let transport = RtspTransport::new().with_connect_timeout(config.connect_timeout());
    let collector = StatsCollector::new(Arc::new(transport));
    let outcome = collector.test_connection(&endpoint, window, &cancel).await;

    println!("{}", outcome);
    if !outcome.is_success() {
        anyhow::bail!("connection test for {} did not succeed", endpoint.name());
    }
    Ok(())
}

async fn probe(store: &ConfigStore, camera: &str, timeout_ms: Option<u64>) -> anyhow::Result<()> {
    let config = store.get();
    let endpoint = config
        .camera(camera)
        .with_context(|| format!("no camera named {}", camera))?
        .endpoint(config.offline_timeout())?;
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.probe.timeout_ms));

    let result = ReachabilityProbe::new(timeout).probe_endpoint(&endpoint).await;
    println!(
        "{}: {} ({} in {} ms)",
        endpoint.name(),
        if result.reachable { "reachable" } else { "unreachable" },
        result.outcome,
        result.latency.as_millis()
    );
    result.into_result(endpoint.name())?;
    Ok(())
}

fn list(config: &AppConfig) {
    if config.cameras.is_empty() {
        println!("No cameras configured");
        return;
    }
    for camera in &config.cameras {
        let timeout = camera
            .offline_timeout_ms
            .unwrap_or(config.offline_timeout_ms);
        let auth = match (&camera.username, &camera.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => " (auth)",
            _ => "",
        };
        println!("{}\t{}{}\toffline after {} ms", camera.name, camera.rtsp_url, auth, timeout);
    }
}

fn init_logging(
    level: LogLevel,
    verbose_count: u8,
    json: bool,
    log_dir: Option<&Path>,
) -> Option<WorkerGuard> {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camwatch=error,retina=error",
        LogLevel::Warn => "camwatch=warn,retina=warn",
        LogLevel::Info => "camwatch=info,retina=warn",
        LogLevel::Verbose => "camwatch=debug,retina=info",
        LogLevel::Debug => "camwatch=debug,retina=debug",
        LogLevel::Trace => "camwatch=trace,retina=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let mut file_error = None;
    let (file_writer, guard) = match log_dir.map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("camwatch")
            .filename_suffix("log")
            .build(dir)
    }) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        }))
        .try_init();
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }

    if let Some(e) = file_error {
        tracing::warn!("File logging disabled: {}", e);
    } else if let Some(dir) = log_dir {
        tracing::debug!("Writing logs to {}", dir.display());
    }
    guard
}
