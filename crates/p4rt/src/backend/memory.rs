//! In-process backend.
//!
//! Keeps ports and the loaded program in memory and records the most
//! recent hook calls. The daemon registers it as its datapath; tests use its event log
//! and failure injection to check the order of backend calls.

use super::{BackendState, DatapathBackend, PortSpec};
use crate::device::Device;
use crate::error::{P4rtError, Result};
use crate::netdev::NetDev;
use crate::port::Port;
use crate::program::Program;
use crate::debug_log;
use p4rt_types::PortNo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBackendConfig {
    /// Datapath types the backend claims
    pub types: Vec<String>,
    /// Whether `port_add` picks numbers for unnumbered ports
    pub assign_port_numbers: bool,
    /// Most recent hook calls kept in the event log; 0 disables it
    pub event_capacity: usize,
}

/// Default number of events [`MemoryBackend`] retains.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            types: vec!["system".to_string(), "dummy".to_string()],
            assign_port_numbers: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl MemoryBackendConfig {
    pub fn with_types(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// A recorded hook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Init,
    TypeRun { dp_type: String },
    Delete { dp_type: String, name: String },
    Alloc,
    Construct { device: String },
    Destruct { device: String, del: bool },
    Dealloc { device: String },
    Run { device: String },
    PortAdd { device: String, name: String, port_no: Option<PortNo> },
    PortDel { device: String, port_no: PortNo },
    PortAlloc,
    PortConstruct { device: String, name: String, port_no: PortNo },
    PortDestruct { device: String, name: String, port_no: PortNo, del: bool },
    PortDealloc,
    ProgramAlloc,
    ProgramInsert { device: String, len: usize },
    ProgramDelete { device: String },
    ProgramDealloc,
}

#[derive(Debug, Clone)]
struct MemoryPort {
    port_type: String,
    port_no: Option<PortNo>,
    bound: Option<PortNo>,
}

impl MemoryPort {
    fn holds(&self, port_no: PortNo) -> bool {
        self.port_no == Some(port_no) || self.bound == Some(port_no)
    }
}

/// Per-device state allocated by [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct MemoryDeviceState {
    ports: Mutex<BTreeMap<String, MemoryPort>>,
    program: Mutex<Option<Vec<u8>>>,
}

impl MemoryDeviceState {
    /// Names of the ports attached at the network layer.
    pub fn port_names(&self) -> Vec<String> {
        self.ports.lock().keys().cloned().collect()
    }

    /// Bytes currently loaded into the datapath.
    pub fn program(&self) -> Option<Vec<u8>> {
        self.program.lock().clone()
    }
}

#[derive(Debug, Default)]
struct Faults {
    alloc: bool,
    construct: BTreeSet<String>,
    port_construct: BTreeSet<String>,
    program_insert: bool,
    run: bool,
    try_again: usize,
}

/// Backend that keeps everything in memory.
pub struct MemoryBackend {
    config: MemoryBackendConfig,
    events: Mutex<VecDeque<BackendEvent>>,
    faults: Mutex<Faults>,
    persisted: Mutex<BTreeMap<String, BTreeSet<String>>>,
    init_count: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            faults: Mutex::new(Faults::default()),
            persisted: Mutex::new(BTreeMap::new()),
            init_count: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &MemoryBackendConfig {
        &self.config
    }

    /// The retained hook calls, oldest first.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&BackendEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Program bytes loaded into `device`'s datapath.
    pub fn installed_program(&self, device: &Device) -> Option<Vec<u8>> {
        device.backend_state::<MemoryDeviceState>()?.program()
    }

    /// Records a datapath of `dp_type` as existing without instantiating it.
    pub fn persist(&self, dp_type: &str, name: &str) {
        self.persisted
            .lock()
            .entry(dp_type.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Drops the backend's record of a port without any hook call.
    pub fn forget_port(&self, device: &Device, name: &str) -> bool {
        device
            .backend_state::<MemoryDeviceState>()
            .is_some_and(|state| state.ports.lock().remove(name).is_some())
    }

    pub fn fail_alloc(&self, fail: bool) {
        self.faults.lock().alloc = fail;
    }

    /// Makes `construct` fail for the device named `name`.
    pub fn fail_construct(&self, name: &str) {
        self.faults.lock().construct.insert(name.to_string());
    }

    /// Makes `port_construct` fail for the port named `name`.
    pub fn fail_port_construct(&self, name: &str) {
        self.faults.lock().port_construct.insert(name.to_string());
    }

    pub fn fail_program_insert(&self, fail: bool) {
        self.faults.lock().program_insert = fail;
    }

    pub fn fail_run(&self, fail: bool) {
        self.faults.lock().run = fail;
    }

    /// Makes the next `count` calls to `run` report `TryAgain`.
    pub fn try_again(&self, count: usize) {
        self.faults.lock().try_again = count;
    }

    fn record(&self, event: BackendEvent) {
        let capacity = self.config.event_capacity;
        if capacity == 0 {
            return;
        }
        let mut events = self.events.lock();
        while events.len() >= capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn supports(&self, dp_type: &str) -> bool {
        self.config.types.iter().any(|t| t == dp_type)
    }

    fn device_state<'a>(&self, device: &'a Device) -> Result<&'a MemoryDeviceState> {
        device
            .backend_state::<MemoryDeviceState>()
            .ok_or_else(|| P4rtError::invalid_state(device.name(), "missing backend state"))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl DatapathBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn init(&self) -> Result<()> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        self.record(BackendEvent::Init);
        Ok(())
    }

    fn enumerate_types(&self, types: &mut BTreeSet<String>) {
        types.extend(self.config.types.iter().cloned());
    }

    fn enumerate_names(&self, dp_type: &str, names: &mut BTreeSet<String>) -> Result<()> {
        if !self.supports(dp_type) {
            return Err(P4rtError::unsupported_type(dp_type));
        }
        if let Some(persisted) = self.persisted.lock().get(dp_type) {
            names.extend(persisted.iter().cloned());
        }
        Ok(())
    }

    fn del(&self, dp_type: &str, name: &str) -> Result<()> {
        let removed = self
            .persisted
            .lock()
            .get_mut(dp_type)
            .is_some_and(|names| names.remove(name));
        if !removed {
            return Err(P4rtError::no_such_device(name));
        }
        self.record(BackendEvent::Delete {
            dp_type: dp_type.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn type_run(&self, dp_type: &str) -> Result<()> {
        self.record(BackendEvent::TypeRun {
            dp_type: dp_type.to_string(),
        });
        Ok(())
    }

    fn device_alloc(&self) -> Result<BackendState> {
        if self.faults.lock().alloc {
            return Err(P4rtError::exhausted("device state"));
        }
        self.record(BackendEvent::Alloc);
        Ok(Box::new(MemoryDeviceState::default()))
    }

    fn construct(&self, device: &Device) -> Result<()> {
        if self.faults.lock().construct.contains(device.name()) {
            return Err(P4rtError::backend("construct", "injected failure"));
        }
        self.persist(device.dp_type(), device.name());
        self.record(BackendEvent::Construct {
            device: device.name().to_string(),
        });
        Ok(())
    }

    fn destruct(&self, device: &Device, del: bool) {
        if del {
            if let Some(names) = self.persisted.lock().get_mut(device.dp_type()) {
                names.remove(device.name());
            }
        }
        self.record(BackendEvent::Destruct {
            device: device.name().to_string(),
            del,
        });
    }

    fn device_dealloc(&self, name: &str, _state: BackendState) {
        self.record(BackendEvent::Dealloc {
            device: name.to_string(),
        });
    }

    fn run(&self, device: &Device) -> Result<()> {
        self.record(BackendEvent::Run {
            device: device.name().to_string(),
        });
        let mut faults = self.faults.lock();
        if faults.try_again > 0 {
            faults.try_again -= 1;
            return Err(P4rtError::TryAgain);
        }
        if faults.run {
            return Err(P4rtError::backend("run", "injected failure"));
        }
        Ok(())
    }

    fn port_add(
        &self,
        device: &Device,
        netdev: &dyn NetDev,
        port_no: Option<PortNo>,
    ) -> Result<()> {
        let state = self.device_state(device)?;
        let mut ports = state.ports.lock();
        let name = netdev.name();
        if ports.contains_key(name) {
            return Err(P4rtError::already_exists(format!("port {}", name)));
        }
        if let Some(port_no) = port_no {
            if ports.values().any(|p| p.holds(port_no)) {
                return Err(P4rtError::already_exists(format!("port {}", port_no)));
            }
        }

        let port_no = match port_no {
            Some(port_no) => Some(port_no),
            None if !self.config.assign_port_numbers => None,
            None if name == device.name() => Some(PortNo::LOCAL),
            None => {
                let mut candidate = Some(PortNo::MIN);
                while let Some(n) = candidate {
                    if !ports.values().any(|p| p.holds(n)) {
                        break;
                    }
                    candidate = n.next();
                }
                Some(candidate.ok_or_else(|| P4rtError::exhausted("port numbers"))?)
            }
        };

        ports.insert(
            name.to_string(),
            MemoryPort {
                port_type: netdev.netdev_type().to_string(),
                port_no,
                bound: None,
            },
        );
        debug_log!(
            "MemoryBackend",
            device = %device.name(),
            port = name,
            port_no = ?port_no,
            "Port attached"
        );
        self.record(BackendEvent::PortAdd {
            device: device.name().to_string(),
            name: name.to_string(),
            port_no,
        });
        Ok(())
    }

    fn port_del(&self, device: &Device, port_no: PortNo) -> Result<()> {
        let state = self.device_state(device)?;
        let mut ports = state.ports.lock();
        let name = ports
            .iter()
            .find(|(_, p)| p.holds(port_no))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| P4rtError::no_such_port_no(device.name(), port_no))?;
        ports.remove(&name);
        self.record(BackendEvent::PortDel {
            device: device.name().to_string(),
            port_no,
        });
        Ok(())
    }

    fn port_query_by_name(&self, device: &Device, name: &str) -> Result<PortSpec> {
        let state = self.device_state(device)?;
        let ports = state.ports.lock();
        let port = ports
            .get(name)
            .ok_or_else(|| P4rtError::no_such_port(device.name(), name))?;
        Ok(PortSpec {
            name: name.to_string(),
            port_type: port.port_type.clone(),
            port_no: port.port_no,
        })
    }

    fn port_alloc(&self) -> Result<BackendState> {
        self.record(BackendEvent::PortAlloc);
        Ok(Box::new(()))
    }

    fn port_construct(&self, device: &Device, port: &Port) -> Result<()> {
        if self.faults.lock().port_construct.contains(port.name()) {
            return Err(P4rtError::backend("port_construct", "injected failure"));
        }
        let state = self.device_state(device)?;
        if let Some(p) = state.ports.lock().get_mut(port.name()) {
            p.bound = Some(port.port_no());
        }
        self.record(BackendEvent::PortConstruct {
            device: device.name().to_string(),
            name: port.name().to_string(),
            port_no: port.port_no(),
        });
        Ok(())
    }

    fn port_destruct(&self, device: &Device, port: &Port, del: bool) {
        self.record(BackendEvent::PortDestruct {
            device: device.name().to_string(),
            name: port.name().to_string(),
            port_no: port.port_no(),
            del,
        });
    }

    fn port_dealloc(&self, _state: BackendState) {
        self.record(BackendEvent::PortDealloc);
    }

    fn program_alloc(&self) -> Result<BackendState> {
        self.record(BackendEvent::ProgramAlloc);
        Ok(Box::new(()))
    }

    fn program_insert(&self, device: &Device, program: &Program) -> Result<()> {
        if self.faults.lock().program_insert {
            return Err(P4rtError::backend("program_insert", "injected failure"));
        }
        let state = self.device_state(device)?;
        *state.program.lock() = Some(program.data().to_vec());
        self.record(BackendEvent::ProgramInsert {
            device: device.name().to_string(),
            len: program.len(),
        });
        Ok(())
    }

    fn program_delete(&self, device: &Device, _program: &Program) {
        if let Ok(state) = self.device_state(device) {
            *state.program.lock() = None;
        }
        self.record(BackendEvent::ProgramDelete {
            device: device.name().to_string(),
        });
    }

    fn program_dealloc(&self, _state: BackendState) {
        self.record(BackendEvent::ProgramDealloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::netdev::{MemoryNetDevProvider, NetDevProvider};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn device(backend: &Arc<MemoryBackend>, registry: &DeviceRegistry, name: &str) -> Arc<Device> {
        let state = backend.device_alloc().unwrap();
        registry.insert(name, "system", backend.clone(), state).unwrap()
    }

    #[test]
    fn test_default_types() {
        let backend = MemoryBackend::default();
        let mut types = BTreeSet::new();
        backend.enumerate_types(&mut types);
        assert!(types.contains("system"));
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_port_add_assigns_numbers() {
        let backend = Arc::new(MemoryBackend::default());
        let registry = DeviceRegistry::new();
        let br0 = device(&backend, &registry, "br0");
        let netdevs = MemoryNetDevProvider::new();

        for name in ["eth0", "eth1", "br0"] {
            let netdev = netdevs.open(name, "system").unwrap();
            backend.port_add(&br0, netdev.as_ref(), None).unwrap();
        }

        let numbers: Vec<Option<PortNo>> = ["eth0", "eth1", "br0"]
            .iter()
            .map(|n| backend.port_query_by_name(&br0, n).unwrap().port_no)
            .collect();
        assert_eq!(
            numbers,
            vec![
                Some(PortNo::new(1).unwrap()),
                Some(PortNo::new(2).unwrap()),
                Some(PortNo::LOCAL)
            ]
        );
    }

    #[test]
    fn test_port_add_rejects_duplicates() {
        let backend = Arc::new(MemoryBackend::default());
        let registry = DeviceRegistry::new();
        let br0 = device(&backend, &registry, "br0");
        let netdevs = MemoryNetDevProvider::new();
        let eth0 = netdevs.open("eth0", "system").unwrap();
        let eth1 = netdevs.open("eth1", "system").unwrap();
        let three = PortNo::new(3).unwrap();

        backend.port_add(&br0, eth0.as_ref(), Some(three)).unwrap();
        assert!(backend.port_add(&br0, eth0.as_ref(), None).is_err());
        assert!(backend.port_add(&br0, eth1.as_ref(), Some(three)).is_err());
    }

    #[test]
    fn test_port_del_and_query() {
        let backend = Arc::new(MemoryBackend::default());
        let registry = DeviceRegistry::new();
        let br0 = device(&backend, &registry, "br0");
        let netdevs = MemoryNetDevProvider::new();
        let eth0 = netdevs.open("eth0", "system").unwrap();
        backend.port_add(&br0, eth0.as_ref(), None).unwrap();

        let one = PortNo::new(1).unwrap();
        backend.port_del(&br0, one).unwrap();
        assert!(backend.port_query_by_name(&br0, "eth0").unwrap_err().is_not_found());
        assert!(matches!(
            backend.port_del(&br0, one),
            Err(P4rtError::NoSuchPort { .. })
        ));
    }

    #[test]
    fn test_persisted_names_and_del() {
        let backend = MemoryBackend::default();
        backend.persist("system", "br9");

        let mut names = BTreeSet::new();
        backend.enumerate_names("system", &mut names).unwrap();
        assert_eq!(names, BTreeSet::from(["br9".to_string()]));

        backend.del("system", "br9").unwrap();
        assert!(matches!(
            backend.del("system", "br9"),
            Err(P4rtError::NoSuchDevice { .. })
        ));
        assert!(backend.enumerate_names("bogus", &mut names).is_err());
    }

    #[test]
    fn test_run_try_again() {
        let backend = Arc::new(MemoryBackend::default());
        let registry = DeviceRegistry::new();
        let br0 = device(&backend, &registry, "br0");

        backend.try_again(1);
        assert!(backend.run(&br0).unwrap_err().is_retryable());
        assert!(backend.run(&br0).is_ok());
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Run { .. })), 2);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let backend = Arc::new(MemoryBackend::new(MemoryBackendConfig {
            event_capacity: 16,
            ..MemoryBackendConfig::default()
        }));
        let registry = DeviceRegistry::new();
        let br0 = device(&backend, &registry, "br0");

        for _ in 0..1000 {
            backend.type_run("system").unwrap();
            backend.run(&br0).unwrap();
        }

        let events = backend.events();
        assert_eq!(events.len(), 16);
        assert_eq!(
            events.last(),
            Some(&BackendEvent::Run {
                device: "br0".to_string()
            })
        );
        assert!(!events.contains(&BackendEvent::Alloc));
    }

    #[test]
    fn test_event_log_disabled() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            event_capacity: 0,
            ..MemoryBackendConfig::default()
        });
        backend.init().unwrap();
        backend.type_run("system").unwrap();

        assert!(backend.events().is_empty());
        assert_eq!(backend.init_count(), 1);
    }
}
