//! p4rtd entry point.
//!
//! Loads the daemon configuration, registers the datapath backend, creates
//! the configured bridges and polls them until interrupted.

use anyhow::Context;
use clap::Parser;
use p4rt::audit::{init_logging, init_logging_pretty, AuditCategory, AuditOutcome, AuditRecord};
use p4rt::config::{LogFormat, P4rtdConfig, DEFAULT_CONFIG_PATH};
use p4rt::{
    audit_log, BackendRegistry, LifecycleManager, MemoryBackend, MemoryNetDevProvider,
    NetDevProvider, RunStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// P4Runtime datapath daemon
#[derive(Parser, Debug)]
#[command(name = "p4rtd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<P4rtdConfig> {
    let mut config = P4rtdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(interval) = args.poll_interval_ms {
        config.poll.interval_ms = interval;
    }

    config.validate()?;
    Ok(config)
}

fn start(config: &P4rtdConfig) -> anyhow::Result<Arc<LifecycleManager>> {
    let backends = Arc::new(BackendRegistry::new());
    backends.register(Arc::new(MemoryBackend::default()))?;
    backends.init_all().context("initializing backends")?;

    let netdevs = Arc::new(MemoryNetDevProvider::new());
    let manager = Arc::new(LifecycleManager::new(
        config.core_config(),
        backends,
        netdevs.clone(),
    ));

    for bridge in &config.bridges {
        let device = manager
            .create(&bridge.name, &bridge.datapath_type)
            .with_context(|| format!("creating bridge {}", bridge.name))?;

        for port in &bridge.ports {
            let result = netdevs
                .open(port, "system")
                .and_then(|netdev| manager.port_add(&device, netdev.as_ref(), None));
            match result {
                Ok(port_no) => info!(bridge = %bridge.name, port = %port, port_no = ?port_no, "Port attached"),
                Err(e) => warn!(bridge = %bridge.name, port = %port, error = %e, "Skipping port"),
            }
        }

        if let Some(program) = &bridge.program {
            if let Err(e) = manager.initialize_datapath(&device, program) {
                warn!(
                    bridge = %bridge.name,
                    program = %program.display(),
                    error = %e,
                    "Datapath left uninitialized"
                );
            }
        }
    }

    Ok(manager)
}

/// One pass over every datapath type and every live device.
fn poll(manager: &LifecycleManager) {
    for dp_type in manager.enumerate_types() {
        // Failures are logged by the manager.
        let _ = manager.type_run(&dp_type);
    }

    for device in manager.devices().devices() {
        if !device.is_live() {
            continue;
        }
        if let Ok(RunStatus::TryAgain) = manager.run(&device) {
            tracing::debug!(device = %device.name(), "Device has more work pending");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("p4rtd: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.logging.format {
        LogFormat::Json => init_logging(&config.logging.level),
        LogFormat::Pretty => init_logging_pretty(&config.logging.level),
    }

    info!(
        config = %args.config.display(),
        bridges = config.bridges.len(),
        poll_interval_ms = config.poll.interval_ms,
        "Starting p4rtd"
    );

    let manager = match start(&config) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to start p4rtd");
            return ExitCode::FAILURE;
        }
    };

    audit_log!(AuditRecord::new(
        AuditCategory::SystemLifecycle,
        "p4rtd",
        "start"
    )
    .with_outcome(AuditOutcome::Success)
    .with_details(serde_json::json!({ "devices": manager.devices().len() })));

    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => poll(&manager),
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
                    Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
                }
                break;
            }
        }
    }

    manager.shutdown();
    audit_log!(AuditRecord::new(
        AuditCategory::SystemLifecycle,
        "p4rtd",
        "stop"
    )
    .with_outcome(AuditOutcome::Success)
    .with_details(serde_json::json!({ "stats": manager.stats() })));

    info!("p4rtd shutdown complete");
    ExitCode::SUCCESS
}
