//! Devices and the device registry.

mod registry;

pub use registry::DeviceRegistry;

use crate::backend::{BackendState, DatapathBackend};
use crate::pi::P4Info;
use crate::port::{PortInfo, PortTable};
use crate::program::Program;
use crate::debug_log;
use p4rt_types::{DeviceId, PortNo};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Lifecycle state of a device.
///
/// A device that has been dropped by every holder is reclaimed and no
/// longer observable, so there is no variant for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Registered, backend `construct` not yet returned
    Constructing,
    /// Constructed and usable
    Live,
    /// Backend `construct` failed
    Failed,
    /// Ports, program and backend state being torn down
    TearingDown,
    /// Unlinked from the registry; memory released on last drop
    Removed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Constructing => write!(f, "constructing"),
            DeviceState::Live => write!(f, "live"),
            DeviceState::Failed => write!(f, "failed"),
            DeviceState::TearingDown => write!(f, "tearing_down"),
            DeviceState::Removed => write!(f, "removed"),
        }
    }
}

/// Aggregate features reported for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SwitchFeatures {
    /// Always zero: table count is not tracked.
    pub n_tables: u32,
    pub n_ports: usize,
}

/// A live programmable-switch instance.
///
/// Devices are shared through `Arc`. The backend's `device_dealloc` hook
/// runs when the last reference is dropped, after the device has left the
/// registry and after any in-flight reader has finished with it.
pub struct Device {
    name: String,
    dp_type: String,
    id: DeviceId,
    backend: Arc<dyn DatapathBackend>,
    state: Option<BackendState>,
    lifecycle: Mutex<DeviceState>,
    pub(crate) ports: Mutex<PortTable>,
    pub(crate) program: Mutex<Option<Program>>,
    /// Serializes program installs and removals; taken before the registry lock
    pub(crate) program_install: Mutex<()>,
    p4info: RwLock<Option<Arc<P4Info>>>,
    self_ref: Weak<Device>,
}

impl Device {
    pub(crate) fn new(
        name: &str,
        dp_type: &str,
        id: DeviceId,
        backend: Arc<dyn DatapathBackend>,
        state: BackendState,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.to_string(),
            dp_type: dp_type.to_string(),
            id,
            backend,
            state: Some(state),
            lifecycle: Mutex::new(DeviceState::Constructing),
            ports: Mutex::new(PortTable::new()),
            program: Mutex::new(None),
            program_install: Mutex::new(()),
            p4info: RwLock::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized datapath type.
    pub fn dp_type(&self) -> &str {
        &self.dp_type
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn backend(&self) -> &Arc<dyn DatapathBackend> {
        &self.backend
    }

    /// Backend-private state, if it has type `T`.
    pub fn backend_state<T: Any>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }

    pub fn state(&self) -> DeviceState {
        *self.lifecycle.lock()
    }

    pub fn is_live(&self) -> bool {
        self.state() == DeviceState::Live
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, DeviceState> {
        self.lifecycle.lock()
    }

    pub(crate) fn set_state(&self, state: DeviceState) {
        *self.lifecycle.lock() = state;
    }

    /// Weak handle for back-references from ports and programs.
    pub(crate) fn downgrade(&self) -> Weak<Device> {
        self.self_ref.clone()
    }

    /// Names of the network devices currently in the port table.
    pub fn port_names(&self) -> BTreeSet<String> {
        self.ports.lock().names()
    }

    /// Snapshot of the port at `port_no`.
    pub fn port(&self, port_no: PortNo) -> Option<PortInfo> {
        self.ports.lock().get(port_no).map(|port| port.info())
    }

    /// Snapshot of every port, in port number order.
    pub fn ports(&self) -> Vec<PortInfo> {
        self.ports.lock().iter().map(|(_, port)| port.info()).collect()
    }

    pub fn n_ports(&self) -> usize {
        self.ports.lock().len()
    }

    pub fn features(&self) -> SwitchFeatures {
        SwitchFeatures {
            n_tables: 0,
            n_ports: self.n_ports(),
        }
    }

    pub fn has_program(&self) -> bool {
        self.program.lock().is_some()
    }

    /// Copy of the installed program's bytes.
    pub fn program_data(&self) -> Option<Vec<u8>> {
        self.program.lock().as_ref().map(|p| p.data().to_vec())
    }

    /// The assigned configuration schema, if any.
    pub fn p4info(&self) -> Option<Arc<P4Info>> {
        self.p4info.read().clone()
    }

    pub(crate) fn set_p4info(&self, p4info: Arc<P4Info>) {
        *self.p4info.write() = Some(p4info);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("dp_type", &self.dp_type)
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Ports and program go back to the backend before the device does.
        drop(self.ports.get_mut().drain());
        drop(self.program.get_mut().take());

        if let Some(state) = self.state.take() {
            self.backend.device_dealloc(&self.name, state);
        }
        debug_log!(
            "DeviceRegistry",
            device = %self.name,
            id = %self.id,
            "Device reclaimed"
        );
    }
}
