//! Replaceable supervisor for configuration reloads.

use super::{Supervisor, SupervisorTimings};
use crate::capture::{CaptureConfig, CaptureDevice, ConfigError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Builds a fresh device for each supervisor the slot creates.
pub type DeviceFactory<D> = Box<dyn Fn() -> D + Send + Sync>;

/// Holds the active supervisor and swaps in a new one when the capture
/// configuration changes.
///
/// A supervisor's configuration never changes after construction; a reload
/// stops the current supervisor and builds a new one around a fresh device.
/// Counters start from zero in the new supervisor.
pub struct SupervisorSlot<D: CaptureDevice + 'static> {
    current: RwLock<Arc<Supervisor<D>>>,
    factory: DeviceFactory<D>,
    timings: SupervisorTimings,
    // Serializes replacements so two reloads never run both supervisors.
    replace_lock: Mutex<()>,
}

impl<D: CaptureDevice + 'static> SupervisorSlot<D> {
    /// Creates a slot holding a stopped supervisor for `config`.
    pub fn new(
        config: CaptureConfig,
        timings: SupervisorTimings,
        factory: DeviceFactory<D>,
    ) -> Result<Self, ConfigError> {
        let supervisor = Supervisor::with_timings(config, factory(), timings.clone())?;
        Ok(Self {
            current: RwLock::new(Arc::new(supervisor)),
            factory,
            timings,
            replace_lock: Mutex::new(()),
        })
    }

    /// The active supervisor.
    pub fn current(&self) -> Arc<Supervisor<D>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Replaces the active supervisor if `config` differs from its
    /// configuration.
    ///
    /// Returns `Ok(false)` when nothing changed. An invalid configuration is
    /// rejected before the running supervisor is touched. The new supervisor
    /// is started only if the old one was running; a failed start is logged
    /// and leaves it stopped.
    pub fn replace(&self, config: CaptureConfig) -> Result<bool, ConfigError> {
        let _guard = self.replace_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let old = self.current();
        if *old.config() == config {
            tracing::info!("Capture configuration unchanged");
            return Ok(false);
        }

        config.validate()?;
        let was_running = old.is_running();
        old.stop();

        let replacement = Arc::new(Supervisor::with_timings(
            config,
            (self.factory)(),
            self.timings.clone(),
        )?);
        if was_running && !replacement.start() {
            tracing::warn!("Reloaded capture failed to start");
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = replacement;
        tracing::info!("Capture configuration reloaded");
        Ok(true)
    }
}

impl<D: CaptureDevice + 'static> std::fmt::Debug for SupervisorSlot<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorSlot")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockControl, MockDevice};
    use std::time::Duration;

    fn test_config() -> CaptureConfig {
        CaptureConfig {
            device_path: None,
            fps: 100,
            ..CaptureConfig::with_dimensions(8, 6)
        }
    }

    fn test_timings() -> SupervisorTimings {
        SupervisorTimings {
            join_timeout: Duration::from_secs(2),
            restart_delay: Duration::from_millis(10),
            error_pause: Duration::from_millis(10),
        }
    }

    /// Slot whose factory records a control handle for every device it builds.
    fn slot() -> (SupervisorSlot<MockDevice>, Arc<Mutex<Vec<MockControl>>>) {
        let controls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&controls);
        let factory: DeviceFactory<MockDevice> = Box::new(move || {
            let device = MockDevice::new();
            recorded.lock().unwrap().push(device.control());
            device
        });
        let slot = SupervisorSlot::new(test_config(), test_timings(), factory).unwrap();
        (slot, controls)
    }

    #[test]
    fn test_unchanged_config_keeps_supervisor() {
        let (slot, controls) = slot();
        let before = slot.current();

        assert!(!slot.replace(test_config()).unwrap());
        assert!(Arc::ptr_eq(&before, &slot.current()));
        assert_eq!(controls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_changed_config_replaces_running_supervisor() {
        let (slot, controls) = slot();
        let old = slot.current();
        assert!(old.start());

        let config = CaptureConfig {
            buffer_size: 4,
            ..test_config()
        };
        assert!(slot.replace(config.clone()).unwrap());

        let new = slot.current();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!old.is_running());
        assert!(new.is_running());
        assert_eq!(new.config(), &config);
        assert_eq!(new.get_status().queue_capacity, 4);

        let controls = controls.lock().unwrap();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0].releases(), 1);
        assert_eq!(controls[1].opens(), 1);
        drop(controls);

        new.stop();
    }

    #[test]
    fn test_stopped_supervisor_stays_stopped_after_reload() {
        let (slot, _controls) = slot();

        let config = CaptureConfig {
            fps: 30,
            ..test_config()
        };
        assert!(slot.replace(config).unwrap());
        assert!(!slot.current().is_running());
    }

    #[test]
    fn test_invalid_config_leaves_supervisor_running() {
        let (slot, _controls) = slot();
        let old = slot.current();
        assert!(old.start());

        let config = CaptureConfig {
            buffer_size: 0,
            ..test_config()
        };
        assert!(matches!(
            slot.replace(config),
            Err(ConfigError::InvalidBufferSize)
        ));
        assert!(Arc::ptr_eq(&old, &slot.current()));
        assert!(old.is_running());

        old.stop();
    }
}
