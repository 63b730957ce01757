use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;

use frame_store::MemoryStore;
use io_box::{LogIoBackend, RetryPolicy};
use thermal_cam::{AuditLog, CaptureLoop, Controller, SimulatedCamera};

/// Thermal anomaly monitor.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Configuration file. Created with defaults if missing.
    #[arg(long, default_value = "config.json")]
    config: std::path::PathBuf,

    /// Per-tick audit trail.
    #[arg(long, default_value = "frame_log.csv")]
    frame_log: std::path::PathBuf,

    /// Capture loop pacing, milliseconds.
    #[arg(long, default_value_t = 30)]
    tick_ms: u64,
}

fn main() -> eyre::Result<()> {
    thermal_cam::init_logging();
    let cli = Cli::parse();

    let cfg = thermal_cam_config::load_config(&cli.config)
        .wrap_err_with(|| format!("loading {}", cli.config.display()))?;

    let camera = SimulatedCamera::new();
    let ctrl = Arc::new(Controller::new(
        &cfg,
        &cli.config,
        Box::new(camera),
        Arc::new(MemoryStore::new()),
        Box::new(LogIoBackend),
        RetryPolicy::default(),
    )?);

    let ctrl2 = ctrl.clone();
    ctrlc::set_handler(move || {
        tracing::info!("termination signal received");
        ctrl2.request_shutdown();
    })
    .wrap_err("installing signal handler")?;

    let audit = AuditLog::new(&cli.frame_log)
        .wrap_err_with(|| format!("opening {}", cli.frame_log.display()))?;

    let mut capture = CaptureLoop::new(ctrl, audit)
        .with_tick_interval(Duration::from_millis(cli.tick_ms));
    capture.run()?;
    Ok(())
}
