//! Accelerator synchronization capability.
//!
//! A device-timed section calls `synchronize()` on exit, before the clock is
//! read, so that work queued on the device during the section is folded into
//! its wall time. The synchronizer is chosen when the registry is built; the
//! default is `NoDevice`, which measures host time only.

use std::fmt;

/// Blocks until all previously issued device work has completed.
pub trait DeviceSync: Send + Sync {
    fn synchronize(&self);

    /// Whether a real device backs this synchronizer. An unavailable device
    /// degrades device-timed sections to host timing, with a one-time warning.
    fn is_available(&self) -> bool {
        true
    }
}

/// Synchronizer for builds without accelerator support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevice;

impl DeviceSync for NoDevice {
    fn synchronize(&self) {}

    fn is_available(&self) -> bool {
        false
    }
}

impl<F> DeviceSync for F
where
    F: Fn() + Send + Sync,
{
    fn synchronize(&self) {
        self()
    }
}

impl fmt::Debug for dyn DeviceSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSync")
            .field("available", &self.is_available())
            .finish()
    }
}
