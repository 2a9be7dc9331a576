//! P4Runtime datapath lifecycle registry.
//!
//! Manages the set of live programmable-switch devices, the ports attached
//! to each, and the data-plane program bound to each, under concurrent
//! access from bridge-control threads and remote-configuration handlers.
//!
//! # Architecture
//!
//! ```text
//! [bridge API] ─────┐
//!                   ├──> [LifecycleManager] ──> [BackendRegistry] ──> [DatapathBackend]
//! [PI callbacks] ───┘          │
//!                              ↓
//!                       [DeviceRegistry] ──> Device { PortTable, Program }
//! ```
//!
//! # Key Components
//!
//! - [`backend`]: the backend contract, its registry and an in-memory backend
//! - [`device`]: devices and the registry with lock-free identifier lookups
//! - [`lifecycle::LifecycleManager`]: create, run and destroy
//! - [`port`]: port table and reconciliation against the backend
//! - [`program`]: the per-device program slot
//! - [`bridge`]: port add/delete, feature queries, program loading
//! - [`pi`]: callbacks for the remote-configuration host

pub mod audit;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod netdev;
pub mod pi;
pub mod port;
pub mod program;

pub use backend::{
    BackendEvent, BackendRegistry, BackendState, DatapathBackend, MemoryBackend,
    MemoryBackendConfig, MemoryDeviceState, PortSpec,
};
pub use config::{BridgeConfig, LogFormat, P4rtConfig, P4rtdConfig};
pub use device::{Device, DeviceRegistry, DeviceState, SwitchFeatures};
pub use error::{P4rtError, Result};
pub use lifecycle::{LifecycleManager, LifecycleStats, RunStatus};
pub use netdev::{port_open_type, MemoryNetDev, MemoryNetDevProvider, NetDev, NetDevProvider};
pub use pi::{P4Info, PiDeviceCallbacks};
pub use port::{Port, PortInfo, PortTable, ReconcileOutcome};
pub use program::Program;

pub use p4rt_common::{LogRateLimiter, RateLimitConfig};
pub use p4rt_types::{DeviceId, PiStatus, PortNo};
