//! Background capture loop.
//!
//! The worker is the only producer for the frame buffer and the only thread
//! that changes capture state after `start` returns. State changes that
//! follow a device call are made while still holding the device lock, and
//! every device lock acquisition re-checks the cancellation token so a
//! stopped supervisor is never overwritten by a late worker.

use super::cancel::CancelToken;
use super::status::CaptureState;
use super::{release_device, Core, Shared};
use crate::capture::{CaptureDevice, DeviceError, FrameRecord};
use crate::reconnect::ReconnectError;
use chrono::Utc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to a running capture worker.
pub(crate) struct WorkerHandle {
    token: CancelToken,
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

impl WorkerHandle {
    /// Cancels the worker and waits for it up to `timeout`.
    ///
    /// Returns `false` if the worker was still running when the wait ended.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.token.cancel();
        self.join(timeout)
    }

    /// Waits up to `timeout` for the worker to exit on its own.
    pub fn join(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Capture worker did not finish in time, detaching"
                );
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    tracing::error!("Capture worker panicked");
                }
                true
            }
        }
    }
}

/// Spawns the capture loop on a dedicated thread.
pub(crate) fn spawn<D>(shared: Arc<Shared<D>>) -> std::io::Result<WorkerHandle>
where
    D: CaptureDevice + 'static,
{
    let token = CancelToken::new();
    let (done_tx, done) = mpsc::channel::<()>();
    let guard = PanicGuard {
        shared: Arc::clone(&shared),
        token: token.clone(),
    };
    let worker = CaptureWorker {
        shared,
        token: token.clone(),
    };

    let thread = thread::Builder::new()
        .name("capture-worker".to_owned())
        .spawn(move || {
            // Dropped on exit, unwinding included, which wakes the joiner.
            // The guard drops first, so joiners see the final state.
            let _done = done_tx;
            let _guard = guard;
            worker.run();
        })?;

    Ok(WorkerHandle {
        token,
        thread,
        done,
    })
}

/// Stops capture if the worker thread unwinds.
struct PanicGuard<D: CaptureDevice> {
    shared: Arc<Shared<D>>,
    token: CancelToken,
}

impl<D: CaptureDevice> Drop for PanicGuard<D> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        if let Some(cleared) = halt(&self.shared, &self.token) {
            tracing::error!(cleared, "Capture worker panicked, capture stopped");
        }
    }
}

/// Releases the device, marks capture stopped and drains the buffer.
///
/// Returns `None` without touching anything if the supervisor already
/// cancelled the worker, otherwise the number of discarded frames.
fn halt<D: CaptureDevice>(shared: &Shared<D>, token: &CancelToken) -> Option<usize> {
    let mut device = shared.device();
    if token.is_cancelled() {
        return None;
    }
    release_device(&mut *device);

    let mut core = shared.core();
    core.state = CaptureState::Stopped;
    Some(shared.buffer.clear())
}

enum Step {
    Continue,
    Exhausted(ReconnectError),
}

struct CaptureWorker<D> {
    shared: Arc<Shared<D>>,
    token: CancelToken,
}

impl<D: CaptureDevice> CaptureWorker<D> {
    fn run(self) {
        tracing::info!("Capture loop started");

        while !self.token.is_cancelled() {
            let connected = self.shared.core().state.is_connected();
            let step = if connected {
                self.capture()
            } else {
                self.reconnect()
            };

            if let Step::Exhausted(err) = step {
                self.finish_exhausted(err);
                break;
            }
        }

        tracing::info!("Capture loop ended");
    }

    /// Reads one frame and hands it to the buffer.
    fn capture(&self) -> Step {
        let mut device = self.shared.device();
        if self.token.is_cancelled() {
            return Step::Continue;
        }

        let result = device.read();
        let mut core = self.shared.core();
        match result {
            Ok(raw) => {
                core.stats.frames_captured += 1;
                core.stats.last_frame_at = Some(Instant::now());
                let record = FrameRecord::new(raw, core.stats.frames_captured);
                drop(core);
                drop(device);

                if self.shared.buffer.push(record) {
                    tracing::debug!("Frame buffer full, oldest frame dropped");
                }
            }
            Err(DeviceError::ReadFailed(reason)) => {
                tracing::warn!(error = %reason, "Frame capture failed, releasing device");
                core.stats.connection_errors += 1;
                core.state = CaptureState::Disconnected;
                release_device(&mut *device);
            }
            Err(err) => {
                tracing::error!(error = %err, "Unexpected error in capture loop");
                core.state = CaptureState::Disconnected;
                release_device(&mut *device);
                drop(core);
                drop(device);
                self.token.wait_timeout(self.shared.timings.error_pause);
            }
        }
        Step::Continue
    }

    /// Runs one reconnect attempt: wait the policy interval, then reopen.
    fn reconnect(&self) -> Step {
        let (attempt, max_attempts, interval) = {
            let mut core = self.shared.core();
            if self.token.is_cancelled() {
                return Step::Continue;
            }
            match core.policy.begin_attempt() {
                Ok(attempt) => {
                    core.state = CaptureState::Reconnecting;
                    (attempt, core.policy.max_attempts(), core.policy.interval())
                }
                Err(err) => return Step::Exhausted(err),
            }
        };

        tracing::info!(attempt, max_attempts, "Attempting to reconnect");

        if self.token.wait_timeout(interval) {
            return Step::Continue;
        }

        let mut device = self.shared.device();
        if self.token.is_cancelled() {
            return Step::Continue;
        }

        let result = device.open(&self.shared.config);
        if result.is_err() {
            release_device(&mut *device);
        }

        let mut core = self.shared.core();
        let Core { state, policy, stats } = &mut *core;
        match result {
            Ok(()) => {
                policy.record_success();
                *state = CaptureState::Connected;
                stats.last_reconnect = Some(Utc::now());
                tracing::info!(attempt, "Reconnection successful");
                Step::Continue
            }
            Err(err) => {
                stats.connection_errors += 1;
                tracing::warn!(attempt, max_attempts, error = %err, "Reconnection failed");
                match policy.record_failure() {
                    Ok(()) => Step::Continue,
                    Err(exhausted) => Step::Exhausted(exhausted),
                }
            }
        }
    }

    /// Stops capture for good after the reconnect policy gave up.
    fn finish_exhausted(&self, err: ReconnectError) {
        if let Some(cleared) = halt(&self.shared, &self.token) {
            tracing::error!(error = %err, cleared, "Capture worker stopping permanently");
        }
    }
}
