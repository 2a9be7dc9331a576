//! Datapath backend contract.
//!
//! A backend implements device, port and program operations for one or
//! more datapath type names. The core owns the lifecycle and calls the
//! hooks in a fixed order:
//!
//! ```text
//! device_alloc -> construct -> (run/wait)* -> destruct -> device_dealloc
//! port_alloc   -> port_construct           -> port_destruct -> port_dealloc
//! program_alloc -> program_insert*         -> program_delete -> program_dealloc
//! ```
//!
//! The `*_dealloc` hooks run when the last reference to the object is
//! dropped, so a device may be deallocated some time after `destruct`.
//!
//! Hooks are called with the device's port table or program slot locked
//! and must not call back into the core for the same device.

mod memory;
mod registry;

pub use memory::{BackendEvent, MemoryBackend, MemoryBackendConfig, MemoryDeviceState};
pub use registry::BackendRegistry;

use crate::device::Device;
use crate::error::{P4rtError, Result};
use crate::netdev::NetDev;
use crate::port::Port;
use crate::program::Program;
use p4rt_types::PortNo;
use std::any::Any;
use std::collections::BTreeSet;

/// Backend-private state attached to a device, port or program.
pub type BackendState = Box<dyn Any + Send + Sync>;

/// The backend's authoritative record of a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Network device name
    pub name: String,
    /// Bridge-level port type, e.g. "system" or "internal"
    pub port_type: String,
    /// Number assigned by the backend, if it numbers ports itself
    pub port_no: Option<PortNo>,
}

/// Operations a datapath backend provides.
pub trait DatapathBackend: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Process-wide initialization, called once after registration.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Adds every datapath type this backend supports.
    fn enumerate_types(&self, types: &mut BTreeSet<String>);

    /// Adds the names of existing datapaths of `dp_type`.
    fn enumerate_names(&self, dp_type: &str, names: &mut BTreeSet<String>) -> Result<()>;

    /// Deletes persisted state of a datapath that may not be instantiated.
    fn del(&self, _dp_type: &str, _name: &str) -> Result<()> {
        Err(P4rtError::unsupported_operation(self.name(), "del"))
    }

    /// Type-wide periodic work. `Err(TryAgain)` asks to be polled again.
    fn type_run(&self, _dp_type: &str) -> Result<()> {
        Ok(())
    }

    /// Arranges for the poll loop to wake when `type_run` has work.
    fn type_wait(&self, _dp_type: &str) {}

    fn device_alloc(&self) -> Result<BackendState>;
    fn construct(&self, device: &Device) -> Result<()>;
    fn destruct(&self, device: &Device, del: bool);
    fn device_dealloc(&self, name: &str, state: BackendState);

    /// Per-device periodic work. `Err(TryAgain)` asks to be polled again.
    fn run(&self, device: &Device) -> Result<()>;

    fn wait(&self, _device: &Device) {}

    /// Attaches `netdev` at the network layer, at `port_no` if given.
    fn port_add(&self, device: &Device, netdev: &dyn NetDev, port_no: Option<PortNo>)
        -> Result<()>;

    /// Detaches the port at `port_no` at the network layer.
    fn port_del(&self, device: &Device, port_no: PortNo) -> Result<()>;

    /// Looks up a port by network device name.
    ///
    /// Returns a not-found error if the backend has no such port.
    fn port_query_by_name(&self, device: &Device, name: &str) -> Result<PortSpec>;

    fn port_alloc(&self) -> Result<BackendState>;
    fn port_construct(&self, device: &Device, port: &Port) -> Result<()>;
    fn port_destruct(&self, device: &Device, port: &Port, del: bool);
    fn port_dealloc(&self, state: BackendState);

    fn program_alloc(&self) -> Result<BackendState>;

    /// Loads the program's bytes into the datapath, replacing what was there.
    ///
    /// Called without the registry lock, but with the device's program
    /// slot locked when reloading an attached program. May block.
    fn program_insert(&self, device: &Device, program: &Program) -> Result<()>;
    fn program_delete(&self, device: &Device, program: &Program);
    fn program_dealloc(&self, state: BackendState);
}
