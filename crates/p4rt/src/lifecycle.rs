//! Device lifecycle manager.
//!
//! Owns the process-wide backend and device registries and drives devices
//! through create, run and destroy. One manager is built at startup and
//! shared by the bridge API and the remote-configuration callbacks.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::backend::BackendRegistry;
use crate::config::P4rtConfig;
use crate::device::{Device, DeviceRegistry, DeviceState};
use crate::error::{P4rtError, Result};
use crate::netdev::NetDevProvider;
use crate::port::destroy_port;
use crate::program;
use crate::{audit_log, error_log, error_rl, info_log, warn_log};
use p4rt_common::LogRateLimiter;
use p4rt_types::{normalize_type, DeviceId};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of a poll step that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The backend finished its pending work.
    Done,
    /// The backend has more work; poll again.
    TryAgain,
}

/// Counters kept by the lifecycle manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub devices_created: u64,
    pub devices_destroyed: u64,
    pub create_failures: u64,
    pub ports_added: u64,
    pub ports_deleted: u64,
    pub programs_installed: u64,
    pub run_failures: u64,
}

/// Orchestrates device create, run and destroy over the registries.
pub struct LifecycleManager {
    config: P4rtConfig,
    backends: Arc<BackendRegistry>,
    devices: Arc<DeviceRegistry>,
    netdevs: Arc<dyn NetDevProvider>,
    limiter: LogRateLimiter,
    stats: Mutex<LifecycleStats>,
}

impl LifecycleManager {
    pub fn new(
        config: P4rtConfig,
        backends: Arc<BackendRegistry>,
        netdevs: Arc<dyn NetDevProvider>,
    ) -> Self {
        let limiter = LogRateLimiter::new(config.rate_limit);
        Self {
            config,
            backends,
            devices: Arc::new(DeviceRegistry::new()),
            netdevs,
            limiter,
            stats: Mutex::new(LifecycleStats::default()),
        }
    }

    pub fn config(&self) -> &P4rtConfig {
        &self.config
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn netdevs(&self) -> &Arc<dyn NetDevProvider> {
        &self.netdevs
    }

    /// Limiter shared by every rate-limited log line.
    pub fn limiter(&self) -> &LogRateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats.lock().clone()
    }

    pub(crate) fn stats_mut(&self) -> MutexGuard<'_, LifecycleStats> {
        self.stats.lock()
    }

    fn normalize<'a>(&'a self, dp_type: &'a str) -> &'a str {
        normalize_type(dp_type, &self.config.default_datapath_type)
    }

    /// Creates and constructs a device.
    ///
    /// The device is registered before the backend constructs it, so it
    /// is briefly visible in the `Constructing` state. A construct failure
    /// unregisters it again and returns the backend's error.
    pub fn create(&self, name: &str, dp_type: &str) -> Result<Arc<Device>> {
        let dp_type = self.normalize(dp_type);
        let backend = self.backends.resolve(dp_type)?;

        let state = backend.device_alloc().map_err(|e| {
            error_log!(
                "Lifecycle",
                device = name,
                dp_type = dp_type,
                error = %e,
                "Failed to allocate device"
            );
            e
        })?;
        let device = self
            .devices
            .insert(name, dp_type, Arc::clone(&backend), state)?;

        if let Err(e) = backend.construct(&device) {
            device.set_state(DeviceState::Failed);
            if let Err(teardown) = self.destroy(&device, false) {
                warn_log!(
                    "Lifecycle",
                    device = name,
                    error = %teardown,
                    "Teardown after failed construct did not complete"
                );
            }
            self.stats.lock().create_failures += 1;
            error_log!(
                "Lifecycle",
                device = name,
                dp_type = dp_type,
                error = %e,
                "Failed to create device"
            );
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceCreate,
                "Lifecycle",
                "create_device"
            )
            .with_outcome(AuditOutcome::Failure)
            .with_object_id(name)
            .with_object_type("device")
            .with_error(e.to_string()));
            return Err(e);
        }

        device.set_state(DeviceState::Live);
        self.stats.lock().devices_created += 1;
        info_log!(
            "Lifecycle",
            device = name,
            dp_type = dp_type,
            id = %device.id(),
            backend = backend.name(),
            "Created device"
        );
        audit_log!(AuditRecord::new(
            AuditCategory::ResourceCreate,
            "Lifecycle",
            "create_device"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(name)
        .with_object_type("device")
        .with_details(serde_json::json!({
            "dp_type": dp_type,
            "id": device.id().as_u64(),
        })));
        Ok(device)
    }

    /// Tears a device down and unregisters it.
    ///
    /// Ports and the program are destroyed first, then the backend's
    /// `destruct` hook runs (for a constructed device) and the device
    /// leaves the registry. The backend's `device_dealloc` hook runs once
    /// the last `Arc` to the device is dropped.
    pub fn destroy(&self, device: &Arc<Device>, del: bool) -> Result<()> {
        let was_live = {
            let mut lifecycle = device.lifecycle();
            let was_live = match *lifecycle {
                DeviceState::Live => true,
                DeviceState::Failed => false,
                state => {
                    return Err(P4rtError::invalid_state(
                        device.name(),
                        format!("cannot destroy device in state {}", state),
                    ))
                }
            };
            *lifecycle = DeviceState::TearingDown;
            was_live
        };

        let ports = device.ports.lock().drain();
        let n_ports = ports.len();
        for (_, port) in ports {
            destroy_port(device, port, del);
        }
        program::remove(&self.devices, device);

        if was_live {
            device.backend().destruct(device, del);
        }
        self.devices.remove(device);
        device.set_state(DeviceState::Removed);

        if was_live {
            self.stats.lock().devices_destroyed += 1;
        }
        info_log!(
            "Lifecycle",
            device = %device.name(),
            id = %device.id(),
            del = del,
            ports = n_ports,
            "Destroyed device"
        );
        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "Lifecycle",
            "destroy_device"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(device.name())
        .with_object_type("device")
        .with_details(serde_json::json!({ "del": del, "ports": n_ports })));
        Ok(())
    }

    /// Runs one poll step of the device's backend.
    pub fn run(&self, device: &Device) -> Result<RunStatus> {
        match device.backend().run(device) {
            Ok(()) => Ok(RunStatus::Done),
            Err(e) if e.is_retryable() => Ok(RunStatus::TryAgain),
            Err(e) => {
                self.stats.lock().run_failures += 1;
                error_rl!(
                    self.limiter,
                    "Lifecycle",
                    device = %device.name(),
                    error = %e,
                    "Device run failed"
                );
                Err(e)
            }
        }
    }

    pub fn wait(&self, device: &Device) {
        device.backend().wait(device);
    }

    /// Deletes persisted backend state for a datapath that may not be
    /// instantiated.
    pub fn delete(&self, dp_type: &str, name: &str) -> Result<()> {
        let dp_type = self.normalize(dp_type);
        let backend = self.backends.resolve(dp_type)?;
        let result = backend.del(dp_type, name);

        let record = AuditRecord::new(AuditCategory::BackendOperation, "Lifecycle", "delete_datapath")
            .with_object_id(name)
            .with_object_type("datapath")
            .with_details(serde_json::json!({ "dp_type": dp_type }));
        match &result {
            Ok(()) => {
                info_log!("Lifecycle", device = name, dp_type = dp_type, "Deleted datapath");
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                warn_log!(
                    "Lifecycle",
                    device = name,
                    dp_type = dp_type,
                    error = %e,
                    "Failed to delete datapath"
                );
                audit_log!(record
                    .with_outcome(AuditOutcome::Failure)
                    .with_error(e.to_string()));
            }
        }
        result
    }

    /// Runs type-wide backend work for `dp_type`.
    pub fn type_run(&self, dp_type: &str) -> Result<RunStatus> {
        let dp_type = self.normalize(dp_type);
        let backend = self.backends.resolve(dp_type)?;
        match backend.type_run(dp_type) {
            Ok(()) => Ok(RunStatus::Done),
            Err(e) if e.is_retryable() => Ok(RunStatus::TryAgain),
            Err(e) => {
                error_rl!(
                    self.limiter,
                    "Lifecycle",
                    dp_type = dp_type,
                    error = %e,
                    "Type run failed"
                );
                Err(e)
            }
        }
    }

    pub fn type_wait(&self, dp_type: &str) -> Result<()> {
        let dp_type = self.normalize(dp_type);
        self.backends.resolve(dp_type)?.type_wait(dp_type);
        Ok(())
    }

    /// Names of existing datapaths of `dp_type`, instantiated or not.
    pub fn enumerate_names(&self, dp_type: &str) -> Result<BTreeSet<String>> {
        let backend = self.backends.resolve(dp_type)?;
        let mut names = BTreeSet::new();
        backend.enumerate_names(dp_type, &mut names)?;
        Ok(names)
    }

    pub fn enumerate_types(&self) -> BTreeSet<String> {
        self.backends.enumerate_all_types()
    }

    /// Looks up a registered device by name, in any state.
    pub fn lookup(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.lookup(name)
    }

    /// Looks up a live device by identifier without taking the registry
    /// lock.
    pub fn lookup_by_id(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.lookup_by_id(id).filter(|d| d.is_live())
    }

    /// Destroys every registered device, keeping persisted backend state.
    pub fn shutdown(&self) {
        for device in self.devices.devices() {
            if let Err(e) = self.destroy(&device, false) {
                warn_log!(
                    "Lifecycle",
                    device = %device.name(),
                    error = %e,
                    "Skipping device during shutdown"
                );
            }
        }
        info_log!("Lifecycle", "Device registry torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendEvent, BackendState, DatapathBackend, MemoryBackend, MemoryBackendConfig, PortSpec,
    };
    use crate::netdev::{MemoryNetDevProvider, NetDev};
    use crate::port::Port;
    use crate::program::Program;
    use p4rt_types::PortNo;
    use pretty_assertions::assert_eq;

    fn manager_with(config: MemoryBackendConfig) -> (LifecycleManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(config));
        let backends = Arc::new(BackendRegistry::new());
        backends.register(backend.clone()).unwrap();
        let manager = LifecycleManager::new(
            P4rtConfig::default(),
            backends,
            Arc::new(MemoryNetDevProvider::new()),
        );
        (manager, backend)
    }

    fn manager() -> (LifecycleManager, Arc<MemoryBackend>) {
        manager_with(MemoryBackendConfig::default())
    }

    #[test]
    fn test_create_normalizes_empty_type() {
        let (manager, _) = manager();
        let device = manager.create("br0", "  ").unwrap();

        assert_eq!(device.dp_type(), "system");
        assert_eq!(device.state(), DeviceState::Live);
        assert_eq!(manager.stats().devices_created, 1);
    }

    #[test]
    fn test_create_unsupported_type() {
        let (manager, backend) = manager();
        assert!(matches!(
            manager.create("br0", "bogus"),
            Err(P4rtError::UnsupportedType { .. })
        ));
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Alloc)), 0);
    }

    #[test]
    fn test_create_duplicate_name() {
        let (manager, _) = manager();
        let _br0 = manager.create("br0", "system").unwrap();
        assert!(matches!(
            manager.create("br0", "dummy"),
            Err(P4rtError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_create_alloc_failure() {
        let (manager, backend) = manager();
        backend.fail_alloc(true);
        assert!(matches!(
            manager.create("br0", "system"),
            Err(P4rtError::ResourceExhausted { .. })
        ));
        assert!(manager.lookup("br0").is_none());
    }

    #[test]
    fn test_construct_failure_unregisters() {
        let (manager, backend) = manager();
        backend.fail_construct("br0");

        assert!(manager.create("br0", "system").is_err());
        assert!(manager.lookup("br0").is_none());
        assert_eq!(manager.stats().create_failures, 1);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Destruct { .. })), 0);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 1);
    }

    #[test]
    fn test_destroy_order() {
        let (manager, backend) = manager();
        let device = manager.create("br0", "system").unwrap();
        let id = device.id();
        backend.clear_events();

        manager.destroy(&device, true).unwrap();
        assert!(manager.lookup("br0").is_none());
        assert!(manager.lookup_by_id(id).is_none());
        assert_eq!(device.state(), DeviceState::Removed);

        assert_eq!(
            backend.events(),
            vec![BackendEvent::Destruct {
                device: "br0".to_string(),
                del: true
            }]
        );
        drop(device);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 1);
    }

    #[test]
    fn test_double_destroy() {
        let (manager, _) = manager();
        let device = manager.create("br0", "system").unwrap();
        manager.destroy(&device, false).unwrap();

        assert!(matches!(
            manager.destroy(&device, false),
            Err(P4rtError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_run_statuses() {
        let (manager, backend) = manager();
        let device = manager.create("br0", "system").unwrap();

        assert_eq!(manager.run(&device).unwrap(), RunStatus::Done);
        backend.try_again(1);
        assert_eq!(manager.run(&device).unwrap(), RunStatus::TryAgain);
        backend.fail_run(true);
        assert!(manager.run(&device).is_err());
        assert_eq!(manager.stats().run_failures, 1);
    }

    #[test]
    fn test_delete() {
        let (manager, backend) = manager();
        backend.persist("system", "br9");

        manager.delete("system", "br9").unwrap();
        assert!(matches!(
            manager.delete("bogus", "br9"),
            Err(P4rtError::UnsupportedType { .. })
        ));
        assert!(manager.enumerate_names("system").unwrap().is_empty());
    }

    #[test]
    fn test_delete_unsupported_operation() {
        struct NoDelete(MemoryBackend);

        impl DatapathBackend for NoDelete {
            fn name(&self) -> &str {
                "nodelete"
            }
            fn enumerate_types(&self, types: &mut BTreeSet<String>) {
                types.insert("nodel".to_string());
            }
            fn enumerate_names(&self, t: &str, n: &mut BTreeSet<String>) -> Result<()> {
                self.0.enumerate_names(t, n)
            }
            fn device_alloc(&self) -> Result<BackendState> {
                self.0.device_alloc()
            }
            fn construct(&self, d: &Device) -> Result<()> {
                self.0.construct(d)
            }
            fn destruct(&self, d: &Device, del: bool) {
                self.0.destruct(d, del)
            }
            fn device_dealloc(&self, name: &str, s: BackendState) {
                self.0.device_dealloc(name, s)
            }
            fn run(&self, d: &Device) -> Result<()> {
                self.0.run(d)
            }
            fn port_add(
                &self,
                d: &Device,
                n: &dyn NetDev,
                p: Option<PortNo>,
            ) -> Result<()> {
                self.0.port_add(d, n, p)
            }
            fn port_del(&self, d: &Device, p: PortNo) -> Result<()> {
                self.0.port_del(d, p)
            }
            fn port_query_by_name(&self, d: &Device, n: &str) -> Result<PortSpec> {
                self.0.port_query_by_name(d, n)
            }
            fn port_alloc(&self) -> Result<BackendState> {
                self.0.port_alloc()
            }
            fn port_construct(&self, d: &Device, p: &Port) -> Result<()> {
                self.0.port_construct(d, p)
            }
            fn port_destruct(&self, d: &Device, p: &Port, del: bool) {
                self.0.port_destruct(d, p, del)
            }
            fn port_dealloc(&self, s: BackendState) {
                self.0.port_dealloc(s)
            }
            fn program_alloc(&self) -> Result<BackendState> {
                self.0.program_alloc()
            }
            fn program_insert(&self, d: &Device, p: &Program) -> Result<()> {
                self.0.program_insert(d, p)
            }
            fn program_delete(&self, d: &Device, p: &Program) {
                self.0.program_delete(d, p)
            }
            fn program_dealloc(&self, s: BackendState) {
                self.0.program_dealloc(s)
            }
        }

        let backends = Arc::new(BackendRegistry::new());
        backends
            .register(Arc::new(NoDelete(MemoryBackend::default())))
            .unwrap();
        let manager = LifecycleManager::new(
            P4rtConfig::default(),
            backends,
            Arc::new(MemoryNetDevProvider::new()),
        );

        assert!(matches!(
            manager.delete("nodel", "br0"),
            Err(P4rtError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_type_run_and_enumerate() {
        let (manager, backend) = manager_with(MemoryBackendConfig::with_types(&["system"]));

        assert_eq!(manager.type_run("").unwrap(), RunStatus::Done);
        assert_eq!(
            backend.count(|e| *e
                == BackendEvent::TypeRun {
                    dp_type: "system".to_string()
                }),
            1
        );
        manager.type_wait("system").unwrap();
        assert!(manager.type_run("bogus").is_err());
        assert_eq!(
            manager.enumerate_types(),
            BTreeSet::from(["system".to_string()])
        );

        let _br0 = manager.create("br0", "system").unwrap();
        assert_eq!(
            manager.enumerate_names("system").unwrap(),
            BTreeSet::from(["br0".to_string()])
        );
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let (manager, backend) = manager();
        manager.create("br0", "system").unwrap();
        manager.create("br1", "dummy").unwrap();

        manager.shutdown();
        assert!(manager.devices().is_empty());
        assert_eq!(
            backend.count(|e| matches!(e, BackendEvent::Destruct { del: false, .. })),
            2
        );
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 2);
    }
}
