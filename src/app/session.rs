use std::sync::RwLock;

use crate::app::models::Device;

/// The single device ad-hoc commands are routed to. Writes replace the whole
/// value, so readers never see a half-updated device; ordering between
/// concurrent writers is last-write-wins.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: RwLock<Option<Device>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Device> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn select(&self, device: Device) {
        self.replace(Some(device));
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    /// Folds a fresh device list into the slot: the selected device is replaced by
    /// its newer value, cleared when absent, and with `auto_select` an empty slot
    /// takes the first device. Returns the resulting selection.
    pub fn reconcile(&self, devices: &[Device], auto_select: bool) -> Option<Device> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match guard.as_ref() {
            Some(current) => devices
                .iter()
                .find(|device| device.device_id == current.device_id)
                .cloned(),
            None if auto_select => devices.first().cloned(),
            None => None,
        };
        *guard = next.clone();
        next
    }

    fn replace(&self, value: Option<Device>) {
        match self.current.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}
