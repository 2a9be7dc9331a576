//! Common value types for the P4Runtime datapath registry.
//!
//! This crate provides the small, copyable types shared by the registry
//! core and its collaborators:
//!
//! - [`PortNo`]: 16-bit datapath port numbers with the reserved `LOCAL` port
//! - [`DeviceId`]: numeric device identifier used by the remote-config host
//! - [`PiStatus`]: status vocabulary returned to the remote-config host
//! - [`normalize_type`]: datapath type normalization

mod device;
mod port;
mod status;

pub use device::{normalize_type, DeviceId, DEFAULT_DATAPATH_TYPE};
pub use port::PortNo;
pub use status::PiStatus;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid port number: {0}")]
    InvalidPortNo(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid PI status: {0}")]
    InvalidStatus(String),
}
