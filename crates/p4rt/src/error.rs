//! Error types for the datapath registry.

use p4rt_types::{DeviceId, PortNo};
use thiserror::Error;

/// Error type for registry, lifecycle, port and program operations.
#[derive(Debug, Error)]
pub enum P4rtError {
    /// No registered backend claims the datapath type.
    #[error("Unsupported datapath type: {dp_type}")]
    UnsupportedType { dp_type: String },

    /// The backend does not implement an optional hook.
    #[error("Operation not supported by backend {backend}: {operation}")]
    UnsupportedOperation { backend: String, operation: String },

    /// The same backend was registered twice.
    #[error("Backend already registered: {backend}")]
    AlreadyRegistered { backend: String },

    /// A device name or port number is already taken.
    #[error("Already exists: {item}")]
    AlreadyExists { item: String },

    /// No live device matches the name or identifier.
    #[error("No such device: {device}")]
    NoSuchDevice { device: String },

    /// The device has no port with this name or number.
    #[error("No such port on {device}: {port}")]
    NoSuchPort { device: String, port: String },

    /// Allocation failed or no port numbers are left.
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// A program source could not be opened.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Reading a program source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend has no work ready; poll again later.
    #[error("Try again")]
    TryAgain,

    /// The operation does not apply to the device's lifecycle state.
    #[error("Invalid state for {device}: {message}")]
    InvalidState { device: String, message: String },

    /// A network device could not be opened.
    #[error("Network device {name} cannot be opened: {message}")]
    NetDev { name: String, message: String },

    /// Daemon configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Opaque failure reported by a backend hook.
    #[error("Backend {operation} failed: {message}")]
    Backend { operation: String, message: String },
}

impl P4rtError {
    /// Creates an unsupported type error.
    pub fn unsupported_type(dp_type: impl Into<String>) -> Self {
        P4rtError::UnsupportedType {
            dp_type: dp_type.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported_operation(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        P4rtError::UnsupportedOperation {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(item: impl Into<String>) -> Self {
        P4rtError::AlreadyExists { item: item.into() }
    }

    /// Creates a no such device error from a device name.
    pub fn no_such_device(device: impl Into<String>) -> Self {
        P4rtError::NoSuchDevice {
            device: device.into(),
        }
    }

    /// Creates a no such device error from a device identifier.
    pub fn no_such_device_id(id: DeviceId) -> Self {
        P4rtError::NoSuchDevice {
            device: format!("id {}", id),
        }
    }

    /// Creates a no such port error from a port name.
    pub fn no_such_port(device: impl Into<String>, port: impl Into<String>) -> Self {
        P4rtError::NoSuchPort {
            device: device.into(),
            port: port.into(),
        }
    }

    /// Creates a no such port error from a port number.
    pub fn no_such_port_no(device: impl Into<String>, port_no: PortNo) -> Self {
        P4rtError::NoSuchPort {
            device: device.into(),
            port: port_no.to_string(),
        }
    }

    /// Creates a resource exhausted error.
    pub fn exhausted(resource: impl Into<String>) -> Self {
        P4rtError::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(device: impl Into<String>, message: impl Into<String>) -> Self {
        P4rtError::InvalidState {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a network device error.
    pub fn netdev(name: impl Into<String>, message: impl Into<String>) -> Self {
        P4rtError::NetDev {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a backend error for a hook.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        P4rtError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if the caller should poll again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, P4rtError::TryAgain)
    }

    /// Returns true for the not-found family (type, device, port, source).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            P4rtError::UnsupportedType { .. }
                | P4rtError::NoSuchDevice { .. }
                | P4rtError::NoSuchPort { .. }
                | P4rtError::NotFound { .. }
        )
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, P4rtError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_retryable() {
        assert!(P4rtError::TryAgain.is_retryable());
        assert!(!P4rtError::backend("run", "boom").is_retryable());
    }

    #[test]
    fn test_not_found_family() {
        assert!(P4rtError::unsupported_type("bogus").is_not_found());
        assert!(P4rtError::no_such_device("br0").is_not_found());
        assert!(P4rtError::no_such_port("br0", "eth0").is_not_found());
        assert!(!P4rtError::exhausted("port numbers").is_not_found());
        assert!(!P4rtError::TryAgain.is_not_found());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            P4rtError::unsupported_type("bogus").to_string(),
            "Unsupported datapath type: bogus"
        );
        assert_eq!(
            P4rtError::no_such_device_id(DeviceId::new(3)).to_string(),
            "No such device: id 3"
        );
        assert_eq!(
            P4rtError::no_such_port_no("br0", PortNo::LOCAL).to_string(),
            "No such port on br0: LOCAL"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: P4rtError = io.into();
        assert!(matches!(err, P4rtError::Io(_)));
    }
}
