use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use crate::shared::errors::DeviceError;

/// Tracks which physical devices are held by a running session.
///
/// Cloning shares the same set. Most callers use [`DeviceRegistry::global`];
/// tests can build an isolated registry.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static DeviceRegistry {
        static GLOBAL: OnceLock<DeviceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(DeviceRegistry::new)
    }

    /// Claims `device_id` exclusively. Fails with `DeviceBusy` while another
    /// lease on the same device is alive.
    pub fn acquire(&self, device_id: &str) -> Result<DeviceLease, DeviceError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| DeviceError::Unavailable("device registry poisoned".into()))?;
        if !held.insert(device_id.to_string()) {
            return Err(DeviceError::DeviceBusy(device_id.to_string()));
        }
        log::debug!("Acquired device {device_id}");
        Ok(DeviceLease {
            registry: self.clone(),
            device_id: device_id.to_string(),
        })
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(device_id))
            .unwrap_or(false)
    }

    fn release(&self, device_id: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(device_id);
            log::debug!("Released device {device_id}");
        }
    }
}

/// Exclusive claim on a device, released on drop.
pub struct DeviceLease {
    registry: DeviceRegistry,
    device_id: String,
}

impl DeviceLease {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.release(&self.device_id);
    }
}
