//! Remote-configuration callbacks.
//!
//! The configuration host addresses devices by numeric identifier and
//! expects one of four [`PiStatus`] values back. Lookups here go through
//! the registry's lock-free identifier snapshot.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::lifecycle::LifecycleManager;
use crate::program;
use crate::{audit_log, info_log, warn_log, warn_rl};
use p4rt_types::{DeviceId, PiStatus};
use std::sync::Arc;

/// Opaque configuration schema pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct P4Info {
    data: Vec<u8>,
}

impl P4Info {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Entry points invoked by the remote-configuration host.
pub trait PiDeviceCallbacks: Send + Sync {
    /// Binds `p4info` to the device with identifier `dev_id`.
    fn assign_device(&self, dev_id: DeviceId, p4info: Arc<P4Info>) -> PiStatus;

    /// Installs `device_data` as the program of device `dev_id`.
    fn update_device_start(&self, dev_id: DeviceId, p4info: &P4Info, device_data: &[u8])
        -> PiStatus;
}

fn pi_audit(action: &str, dev_id: DeviceId, status: PiStatus) -> AuditRecord {
    let outcome = if status.is_success() {
        AuditOutcome::Success
    } else {
        AuditOutcome::Failure
    };
    AuditRecord::new(AuditCategory::ConfigurationChange, "PiCallbacks", action)
        .with_outcome(outcome)
        .with_object_id(dev_id.to_string())
        .with_object_type("device")
        .with_details(serde_json::json!({ "status": status.as_str() }))
}

impl PiDeviceCallbacks for LifecycleManager {
    fn assign_device(&self, dev_id: DeviceId, p4info: Arc<P4Info>) -> PiStatus {
        info_log!("PiCallbacks", dev_id = %dev_id, "Assigning device");

        let Some(device) = self.lookup_by_id(dev_id) else {
            warn_log!("PiCallbacks", dev_id = %dev_id, "P4 device does not exist");
            let status = PiStatus::DevNotAssigned;
            audit_log!(pi_audit("assign_device", dev_id, status));
            return status;
        };

        self.devices().with_lock(|| device.set_p4info(p4info));

        let status = PiStatus::Success;
        audit_log!(pi_audit("assign_device", dev_id, status));
        status
    }

    fn update_device_start(
        &self,
        dev_id: DeviceId,
        _p4info: &P4Info,
        device_data: &[u8],
    ) -> PiStatus {
        info_log!(
            "PiCallbacks",
            dev_id = %dev_id,
            size = device_data.len(),
            "Injecting config"
        );

        let Some(device) = self.lookup_by_id(dev_id) else {
            warn_log!("PiCallbacks", dev_id = %dev_id, "P4 device does not exist");
            let status = PiStatus::DevOutOfRange;
            audit_log!(pi_audit("update_device_start", dev_id, status));
            return status;
        };

        let status = match program::install(self.devices(), &device, device_data.to_vec()) {
            Ok(()) => {
                self.stats_mut().programs_installed += 1;
                info_log!(
                    "PiCallbacks",
                    device = %device.name(),
                    dev_id = %dev_id,
                    "P4 datapath initialized"
                );
                PiStatus::Success
            }
            Err(e) => {
                warn_rl!(
                    self.limiter(),
                    "PiCallbacks",
                    dev_id = %dev_id,
                    error = %e,
                    "Failed to initialize P4 datapath"
                );
                PiStatus::TargetError
            }
        };
        audit_log!(pi_audit("update_device_start", dev_id, status));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRegistry, MemoryBackend};
    use crate::config::P4rtConfig;
    use crate::netdev::MemoryNetDevProvider;
    use pretty_assertions::assert_eq;

    fn manager() -> (LifecycleManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::default());
        let backends = Arc::new(BackendRegistry::new());
        backends.register(backend.clone()).unwrap();
        let manager = LifecycleManager::new(
            P4rtConfig::default(),
            backends,
            Arc::new(MemoryNetDevProvider::new()),
        );
        (manager, backend)
    }

    #[test]
    fn test_p4info_accessors() {
        let info = P4Info::new(b"tables".to_vec());
        assert_eq!(info.as_bytes(), b"tables");
        assert_eq!(info.len(), 6);
        assert!(P4Info::default().is_empty());
    }

    #[test]
    fn test_unknown_device_statuses_differ() {
        let (manager, _) = manager();
        let missing = DeviceId::new(7);

        assert_eq!(
            manager.assign_device(missing, Arc::new(P4Info::default())),
            PiStatus::DevNotAssigned
        );
        assert_eq!(
            manager.update_device_start(missing, &P4Info::default(), b"prog"),
            PiStatus::DevOutOfRange
        );
    }

    #[test]
    fn test_assign_device() {
        let (manager, _) = manager();
        let device = manager.create("br0", "system").unwrap();
        let info = Arc::new(P4Info::new(b"schema".to_vec()));

        assert_eq!(
            manager.assign_device(device.id(), info.clone()),
            PiStatus::Success
        );
        assert_eq!(device.p4info(), Some(info));
    }

    #[test]
    fn test_update_device_start() {
        let (manager, backend) = manager();
        let device = manager.create("br0", "system").unwrap();

        assert_eq!(
            manager.update_device_start(device.id(), &P4Info::default(), b"0123456789"),
            PiStatus::Success
        );
        assert_eq!(
            backend.installed_program(&device),
            Some(b"0123456789".to_vec())
        );
        assert_eq!(manager.stats().programs_installed, 1);

        backend.fail_program_insert(true);
        assert_eq!(
            manager.update_device_start(device.id(), &P4Info::default(), b"x"),
            PiStatus::TargetError
        );
        assert_eq!(device.program_data(), Some(b"0123456789".to_vec()));
    }
}
