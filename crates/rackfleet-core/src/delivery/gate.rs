// ── Per-family single-flight gate ──

use rackfleet_api::IpFamily;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::CoreError;

/// One in-flight DHCP configuration per address family. A second attempt
/// is refused rather than queued.
#[derive(Debug, Default)]
pub struct FamilyGate {
    v4: Mutex<()>,
    v6: Mutex<()>,
}

impl FamilyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the gate for `family` until the returned guard drops.
    pub fn try_acquire(&self, family: IpFamily) -> Result<MutexGuard<'_, ()>, CoreError> {
        let slot = match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        };
        slot.try_lock().map_err(|_| CoreError::AlreadyInProgress {
            operation: format!("{family} DHCP configuration"),
        })
    }
}
