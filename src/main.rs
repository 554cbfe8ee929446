//! Camera Supervisor CLI
//!
//! Runs one capture supervisor until Ctrl+C or SIGTERM, logging status
//! periodically and, with the `metrics` feature, serving the HTTP control
//! surface.

use camera_supervisor::{
    capture::{CaptureDevice, FileConfig, MockDevice},
    supervisor::{DeviceFactory, Supervisor, SupervisorSlot, SupervisorTimings},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "camera-supervisor", version, about)]
struct Cli {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Use the synthetic mock device instead of a camera
    #[arg(long)]
    mock: bool,

    /// Device node, overriding the configuration file
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Log filter when RUST_LOG is not set, overriding the configuration file
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,
}

fn main() {
    let cli = Cli::parse();

    let loaded = FileConfig::load_or_create(&cli.config);
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.server.log_level.clone()))
        .unwrap_or_else(|| "info".to_owned());
    init_logging(&log_level);

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(device) = &cli.device {
        config.capture.device_path = Some(device.clone());
    }

    info!(
        version = camera_supervisor::VERSION,
        config = %cli.config.display(),
        device = %config.capture.device_node().display(),
        "Camera supervisor starting"
    );

    let mock = cli.mock;
    let factory: DeviceFactory<Box<dyn CaptureDevice>> = Box::new(move || build_device(mock));
    let slot = match SupervisorSlot::new(config.capture.clone(), SupervisorTimings::default(), factory)
    {
        Ok(slot) => Arc::new(slot),
        Err(e) => {
            error!(error = %e, "Invalid capture configuration");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    #[cfg(feature = "metrics")]
    let http_shutdown = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        error!(error = %e, "Failed to install signal handler");
        std::process::exit(1);
    }

    // A camera that is missing at startup does not stop the service.
    if !slot.current().start() {
        warn!("Camera failed to start, continuing without capture");
    }

    #[cfg(feature = "metrics")]
    let runtime = http::start(
        http::Control {
            config_path: cli.config.clone(),
            device_override: cli.device.clone(),
            server: config.server.clone(),
            shutdown: http_shutdown,
        },
        Arc::clone(&slot),
    );

    wait_for_shutdown(&shutdown_rx, &slot, cli.stats_interval);

    info!("Shutdown signal received, stopping capture");
    slot.current().stop();

    #[cfg(feature = "metrics")]
    {
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
    }

    info!("Shutdown complete");
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_device(mock: bool) -> Box<dyn CaptureDevice> {
    if mock {
        info!("Using mock capture device");
        return Box::new(MockDevice::new());
    }

    #[cfg(feature = "v4l2")]
    {
        Box::new(camera_supervisor::capture::V4l2Device::new())
    }

    #[cfg(not(feature = "v4l2"))]
    {
        warn!("Built without V4L2 support, using mock capture device");
        Box::new(MockDevice::new())
    }
}

/// Blocks until shutdown is requested, logging status every `interval_secs`.
fn wait_for_shutdown<D: CaptureDevice + 'static>(
    shutdown: &Receiver<()>,
    slot: &SupervisorSlot<D>,
    interval_secs: u64,
) {
    if interval_secs == 0 {
        let _ = shutdown.recv();
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    loop {
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => log_status(&slot.current()),
        }
    }
}

fn log_status<D: CaptureDevice + 'static>(supervisor: &Supervisor<D>) {
    let status = supervisor.get_status();
    info!(
        state = %status.state,
        frames_captured = status.stats.frames_captured,
        frames_dropped = status.stats.frames_dropped,
        connection_errors = status.stats.connection_errors,
        queue_size = status.queue_size,
        "Capture status"
    );

    match serde_json::to_string(&status) {
        Ok(json) => tracing::debug!(status = %json, "Full capture status"),
        Err(e) => warn!(error = %e, "Failed to serialize status"),
    }
}

#[cfg(feature = "metrics")]
mod http {
    use camera_supervisor::capture::{CaptureDevice, ServerConfig};
    use camera_supervisor::metrics::{
        ConfigSource, MetricsRegistry, MetricsServer, MetricsServerConfig,
    };
    use camera_supervisor::supervisor::SupervisorSlot;
    use std::path::PathBuf;
    use std::sync::mpsc::Sender;
    use std::sync::Arc;
    use tracing::error;

    /// What the HTTP control endpoints act on besides the supervisor.
    pub struct Control {
        pub config_path: PathBuf,
        pub device_override: Option<PathBuf>,
        pub server: ServerConfig,
        pub shutdown: Sender<()>,
    }

    /// Starts the HTTP server on its own runtime.
    ///
    /// Failures are logged and capture continues without the HTTP surface.
    pub fn start<D: CaptureDevice + 'static>(
        control: Control,
        slot: Arc<SupervisorSlot<D>>,
    ) -> Option<tokio::runtime::Runtime> {
        let config = match MetricsServerConfig::from_server_config(&control.server) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Invalid HTTP server configuration");
                return None;
            }
        };
        let registry = match MetricsRegistry::new() {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, "Failed to create metrics registry");
                return None;
            }
        };
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to start async runtime");
                return None;
            }
        };

        let server = MetricsServer::new(config, registry, slot)
            .with_shutdown(control.shutdown)
            .with_config_source(ConfigSource {
                path: control.config_path,
                device_override: control.device_override,
                server: control.server,
            });
        runtime.spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "HTTP server failed");
            }
        });
        Some(runtime)
    }
}
