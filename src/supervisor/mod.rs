//! Capture supervisor.
//!
//! The [`Supervisor`] owns one capture device, runs the capture worker and
//! exposes the lifecycle and read API used by every other part of the
//! service:
//!
//! ```text
//! start/stop/restart ──► Supervisor ──► worker ──► device lock
//!                            │             │
//!    get_frame ◄──── FrameBuffer ◄─────────┤
//!    get_status ◄─── core lock ◄───────────┘
//! ```
//!
//! # Locking
//!
//! - The device lock guards the device. Every open, read and release
//!   happens while holding it.
//! - The core lock guards capture state, reconnect policy and stats. It is
//!   only held for short updates, so status reads never wait on a blocking
//!   read.
//! - The frame buffer synchronizes itself.
//! - The lifecycle lock serializes `start`, `stop` and `restart`.
//!
//! Locks are always taken in the order lifecycle, device, core, buffer.
//!
//! A [`SupervisorSlot`] holds the active supervisor when the configuration
//! can be reloaded at runtime.

mod cancel;
mod slot;
mod status;
mod worker;

pub use cancel::CancelToken;
pub use slot::{DeviceFactory, SupervisorSlot};
pub use status::{CaptureState, StatsSnapshot, StatusSnapshot};

use crate::capture::{CaptureConfig, CaptureDevice, ConfigError, DeviceError, FrameBuffer, FrameRecord};
use crate::reconnect::ReconnectPolicy;
use status::Stats;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use worker::WorkerHandle;

/// Errors returned by [`Supervisor::try_start`].
#[derive(Debug, Error)]
pub enum StartError {
    /// The device could not be opened.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// The worker thread could not be created.
    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Waits and ceilings used by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorTimings {
    /// Longest `stop` waits for the worker before detaching it.
    pub join_timeout: Duration,
    /// Settling delay between stop and start in `restart`.
    pub restart_delay: Duration,
    /// Pause after an unexpected capture error.
    pub error_pause: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(2),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// State guarded by the core lock.
struct Core {
    state: CaptureState,
    policy: ReconnectPolicy,
    stats: Stats,
}

/// State shared between the supervisor and its worker.
struct Shared<D> {
    config: CaptureConfig,
    timings: SupervisorTimings,
    buffer: FrameBuffer,
    device: Mutex<D>,
    core: Mutex<Core>,
}

impl<D> Shared<D> {
    fn device(&self) -> MutexGuard<'_, D> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a device, logging and swallowing any error.
fn release_device<D: CaptureDevice>(device: &mut D) {
    if let Err(err) = device.release() {
        tracing::error!(error = %err, "Error releasing capture device");
    }
}

/// Owns one capture device and the worker that reads from it.
///
/// All methods take `&self`; share a supervisor between threads with
/// `Arc`. Dropping it stops capture.
pub struct Supervisor<D: CaptureDevice + 'static> {
    shared: Arc<Shared<D>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl<D: CaptureDevice + 'static> Supervisor<D> {
    /// Creates a stopped supervisor with default timings.
    pub fn new(config: CaptureConfig, device: D) -> Result<Self, ConfigError> {
        Self::with_timings(config, device, SupervisorTimings::default())
    }

    /// Creates a stopped supervisor with custom timings.
    pub fn with_timings(
        config: CaptureConfig,
        device: D,
        timings: SupervisorTimings,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let core = Core {
            state: CaptureState::Stopped,
            policy: ReconnectPolicy::from_config(&config),
            stats: Stats::new(),
        };
        let shared = Shared {
            buffer: FrameBuffer::new(config.buffer_size),
            device: Mutex::new(device),
            core: Mutex::new(core),
            config,
            timings,
        };

        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the device and starts the worker.
    ///
    /// Returns `true` if capture is running afterwards, including when it
    /// was already running.
    pub fn start(&self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "Failed to start capture");
                false
            }
        }
    }

    /// Like [`start`](Self::start), reporting why the start failed.
    pub fn try_start(&self) -> Result<(), StartError> {
        let mut worker = self.lifecycle();
        self.start_locked(&mut worker)
    }

    fn start_locked(&self, worker: &mut Option<WorkerHandle>) -> Result<(), StartError> {
        if self.is_running() {
            tracing::warn!("Capture is already running");
            return Ok(());
        }

        // A worker that exhausted its retries has already exited.
        if let Some(finished) = worker.take() {
            finished.join(self.shared.timings.join_timeout);
        }

        {
            let mut device = self.shared.device();
            self.shared.core().policy.reset();

            if let Err(err) = device.open(&self.shared.config) {
                release_device(&mut *device);
                self.shared.core().state = CaptureState::Stopped;
                return Err(err.into());
            }
            self.shared.core().state = CaptureState::Connected;
        }

        match worker::spawn(Arc::clone(&self.shared)) {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(
                    device = %self.shared.config.device_node().display(),
                    "Capture started"
                );
                Ok(())
            }
            Err(err) => {
                let mut device = self.shared.device();
                release_device(&mut *device);
                self.shared.core().state = CaptureState::Stopped;
                Err(err.into())
            }
        }
    }

    /// Stops the worker, releases the device and drains the buffer.
    ///
    /// Does nothing if capture is already stopped. Waits at most
    /// [`SupervisorTimings::join_timeout`] for the worker; the device is
    /// released even if the worker does not exit in time.
    pub fn stop(&self) {
        let mut worker = self.lifecycle();
        self.stop_locked(&mut worker);
    }

    fn stop_locked(&self, worker: &mut Option<WorkerHandle>) {
        let handle = worker.take();

        if !self.is_running() {
            if let Some(finished) = handle {
                finished.join(self.shared.timings.join_timeout);
            }
            tracing::debug!("Capture is already stopped");
            return;
        }

        tracing::info!("Stopping capture");
        if let Some(handle) = handle {
            if !handle.shutdown(self.shared.timings.join_timeout) {
                tracing::warn!("Capture worker did not finish gracefully");
            }
        }

        let cleared = {
            let mut device = self.shared.device();
            release_device(&mut *device);
            let mut core = self.shared.core();
            core.state = CaptureState::Stopped;
            self.shared.buffer.clear()
        };
        if cleared > 0 {
            tracing::info!(cleared, "Cleared buffered frames");
        }
        tracing::info!("Capture stopped");
    }

    /// Stops, waits the settling delay, then starts again.
    ///
    /// Holds the lifecycle lock throughout, so concurrent `start` and `stop`
    /// calls wait for the restart to finish.
    pub fn restart(&self) -> bool {
        tracing::info!("Restarting capture");
        let mut worker = self.lifecycle();

        self.stop_locked(&mut worker);
        std::thread::sleep(self.shared.timings.restart_delay);

        match self.start_locked(&mut worker) {
            Ok(()) => {
                tracing::info!("Capture restart successful");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Capture restart failed");
                false
            }
        }
    }

    /// Takes the oldest buffered frame, waiting up to `timeout` for one.
    pub fn get_frame(&self, timeout: Duration) -> Option<FrameRecord> {
        self.shared.buffer.pop(timeout)
    }

    /// Returns a consistent copy of state, counters and configuration.
    pub fn get_status(&self) -> StatusSnapshot {
        let core = self.shared.core();
        let buffer = &self.shared.buffer;

        StatusSnapshot {
            state: core.state,
            is_running: core.state.is_running(),
            is_connected: core.state.is_connected(),
            queue_size: buffer.len(),
            queue_capacity: buffer.capacity(),
            reconnect_attempts: core.policy.attempts(),
            stats: core.stats.snapshot(buffer.dropped(), Instant::now()),
            config: self.shared.config.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        self.shared.core().state
    }

    /// Returns true while a worker owns the device.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Returns true while the device is open and producing frames.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The configuration this supervisor was built with.
    pub fn config(&self) -> &CaptureConfig {
        &self.shared.config
    }
}

impl<D: CaptureDevice + 'static> Drop for Supervisor<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<D: CaptureDevice + 'static> std::fmt::Debug for Supervisor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("buffer", &self.shared.buffer)
            .finish_non_exhaustive()
    }
}
