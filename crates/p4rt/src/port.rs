//! Ports and port table reconciliation.
//!
//! The port table maps port numbers to [`Port`]s. It is brought into
//! agreement with the backend one name at a time by [`reconcile`]: the
//! backend's record for the name is looked up, the network device is
//! opened, and the table entry at the reported number is kept, replaced or
//! installed. The same path serves initial discovery, port add and port
//! delete.

use crate::backend::{BackendState, DatapathBackend};
use crate::device::Device;
use crate::error::{P4rtError, Result};
use crate::netdev::{port_open_type, NetDev, NetDevProvider};
use crate::{debug_log, info_log, warn_rl};
use chrono::{DateTime, Utc};
use p4rt_common::{LogRateLimiter, SyncMap};
use p4rt_types::PortNo;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// A network device attached to a device's port table.
pub struct Port {
    port_no: PortNo,
    netdev: Arc<dyn NetDev>,
    created: DateTime<Utc>,
    owner: Weak<Device>,
    backend: Arc<dyn DatapathBackend>,
    state: Option<BackendState>,
}

impl Port {
    fn new(
        port_no: PortNo,
        netdev: Arc<dyn NetDev>,
        owner: Weak<Device>,
        backend: Arc<dyn DatapathBackend>,
        state: BackendState,
    ) -> Self {
        Self {
            port_no,
            netdev,
            created: Utc::now(),
            owner,
            backend,
            state: Some(state),
        }
    }

    pub fn port_no(&self) -> PortNo {
        self.port_no
    }

    /// Name of the wrapped network device.
    pub fn name(&self) -> &str {
        self.netdev.name()
    }

    pub fn netdev(&self) -> &Arc<dyn NetDev> {
        &self.netdev
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The owning device, unless it is being reclaimed.
    pub fn owner(&self) -> Option<Arc<Device>> {
        self.owner.upgrade()
    }

    /// Backend-private state, if it has type `T`.
    pub fn backend_state<T: Any>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }

    pub fn info(&self) -> PortInfo {
        PortInfo {
            port_no: self.port_no,
            name: self.name().to_string(),
            netdev_type: self.netdev.netdev_type().to_string(),
            created: self.created,
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("port_no", &self.port_no)
            .field("name", &self.name())
            .field("created", &self.created)
            .finish()
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.backend.port_dealloc(state);
        }
    }
}

/// Copy of a port's public fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port_no: PortNo,
    pub name: String,
    pub netdev_type: String,
    pub created: DateTime<Utc>,
}

/// Per-device map from port number to port.
#[derive(Default)]
pub struct PortTable {
    ports: SyncMap<PortNo, Port>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn get(&self, port_no: PortNo) -> Option<&Port> {
        self.ports.get(&port_no)
    }

    /// Number of the port wrapping network device `name`.
    pub fn find_by_name(&self, name: &str) -> Option<PortNo> {
        self.ports.find(|port| port.name() == name).map(|(no, _)| *no)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.ports.values().map(|p| p.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortNo, &Port)> {
        self.ports.iter()
    }

    /// Lowest unused regular port number.
    pub fn allocate(&self) -> Option<PortNo> {
        let mut candidate = Some(PortNo::MIN);
        while let Some(port_no) = candidate {
            if !self.ports.contains_key(&port_no) {
                return Some(port_no);
            }
            candidate = port_no.next();
        }
        None
    }

    fn insert(&mut self, port: Port) -> Result<&Port> {
        let port_no = port.port_no;
        self.ports
            .try_insert(port_no, port)
            .map(|p| &*p)
            .map_err(|_| P4rtError::already_exists(format!("port {}", port_no)))
    }

    pub(crate) fn remove(&mut self, port_no: PortNo) -> Option<Port> {
        self.ports.remove(&port_no)
    }

    pub(crate) fn drain(&mut self) -> Vec<(PortNo, Port)> {
        self.ports.drain()
    }
}

/// Result of reconciling one port name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The backend has no port by this name; the table was not touched.
    Absent,
    /// The network device could not be opened; the port is ignored.
    Ignored,
    /// The table already held this name at this number.
    Unchanged(PortNo),
    /// A port was installed at this number.
    Installed(PortNo),
}

/// Destructs a port that has already been taken out of its table.
pub(crate) fn destroy_port(device: &Device, port: Port, del: bool) {
    device.backend().port_destruct(device, &port, del);
    debug_log!(
        "PortTable",
        device = %device.name(),
        port = %port.name(),
        port_no = %port.port_no(),
        "Port destroyed"
    );
}

/// Brings the port table entry for `name` in line with the backend.
pub(crate) fn reconcile(
    device: &Device,
    name: &str,
    netdevs: &dyn NetDevProvider,
    limiter: &LogRateLimiter,
) -> Result<ReconcileOutcome> {
    let spec = match device.backend().port_query_by_name(device, name) {
        Ok(spec) => spec,
        Err(e) if e.is_not_found() => {
            debug_log!(
                "PortTable",
                device = %device.name(),
                port = name,
                "Backend reports no such port"
            );
            return Ok(ReconcileOutcome::Absent);
        }
        Err(e) => return Err(e),
    };

    let netdev = match netdevs.open(&spec.name, port_open_type(&spec.port_type)) {
        Ok(netdev) => netdev,
        Err(e) => {
            warn_rl!(
                limiter,
                "PortTable",
                device = %device.name(),
                port = %spec.name,
                port_no = ?spec.port_no,
                error = %e,
                "Ignoring port because netdev cannot be opened"
            );
            return Ok(ReconcileOutcome::Ignored);
        }
    };

    let mut table = device.ports.lock();
    let port_no = match spec.port_no {
        Some(port_no) => port_no,
        None if spec.name == device.name() => PortNo::LOCAL,
        None => match table.find_by_name(name).or_else(|| table.allocate()) {
            Some(port_no) => port_no,
            None => {
                warn_rl!(
                    limiter,
                    "PortTable",
                    device = %device.name(),
                    port = name,
                    "Failed to allocate port number"
                );
                return Err(P4rtError::exhausted("port numbers"));
            }
        },
    };

    if table.get(port_no).is_some_and(|port| port.name() == name) {
        return Ok(ReconcileOutcome::Unchanged(port_no));
    }

    if let Some(occupant) = table.remove(port_no) {
        destroy_port(device, occupant, true);
    }
    if let Some(stale) = table.find_by_name(name) {
        if let Some(port) = table.remove(stale) {
            destroy_port(device, port, true);
        }
    }

    install(device, &mut table, netdev, port_no, limiter)?;
    Ok(ReconcileOutcome::Installed(port_no))
}

/// Removes the port wrapping `name`, if tracked.
pub(crate) fn remove_by_name(device: &Device, name: &str) -> bool {
    let mut table = device.ports.lock();
    let Some(port_no) = table.find_by_name(name) else {
        return false;
    };
    match table.remove(port_no) {
        Some(port) => {
            destroy_port(device, port, true);
            true
        }
        None => false,
    }
}

fn install(
    device: &Device,
    table: &mut PortTable,
    netdev: Arc<dyn NetDev>,
    port_no: PortNo,
    limiter: &LogRateLimiter,
) -> Result<()> {
    let backend = device.backend();
    let name = netdev.name().to_string();

    let constructed = backend.port_alloc().and_then(|state| {
        let port = Port::new(
            port_no,
            netdev,
            device.downgrade(),
            Arc::clone(backend),
            state,
        );
        let port = table.insert(port)?;
        backend.port_construct(device, port)
    });

    if let Err(e) = constructed {
        drop(table.remove(port_no));
        info_log!(
            "PortTable",
            device = %device.name(),
            port = %name,
            error = %e,
            "Could not add port"
        );
        warn_rl!(
            limiter,
            "PortTable",
            device = %device.name(),
            port = %name,
            error = %e,
            "Could not add port"
        );
        return Err(e);
    }

    debug_log!(
        "PortTable",
        device = %device.name(),
        port = %name,
        port_no = %port_no,
        "Port installed"
    );
    Ok(())
}
