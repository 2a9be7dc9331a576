//! Device identifiers and datapath type names.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Datapath type used when a caller passes an empty type name.
pub const DEFAULT_DATAPATH_TYPE: &str = "system";

/// Normalizes a datapath type name.
///
/// Surrounding whitespace is ignored and an empty name maps to `default`.
///
/// # Examples
///
/// ```
/// use p4rt_types::{normalize_type, DEFAULT_DATAPATH_TYPE};
///
/// assert_eq!(normalize_type("", DEFAULT_DATAPATH_TYPE), "system");
/// assert_eq!(normalize_type(" dummy ", DEFAULT_DATAPATH_TYPE), "dummy");
/// ```
pub fn normalize_type<'a>(dp_type: &'a str, default: &'a str) -> &'a str {
    let trimmed = dp_type.trim();
    if trimmed.is_empty() {
        default
    } else {
        trimmed
    }
}

/// Numeric identifier of a live device, unique among live devices.
///
/// Identifiers are handed out by the device registry and may be reused
/// once the device that held one has been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Creates a device identifier.
    pub const fn new(id: u64) -> Self {
        DeviceId(id)
    }

    /// Returns the identifier as a u64.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(DeviceId)
            .map_err(|_| ParseError::InvalidDeviceId(s.to_string()))
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        DeviceId(id)
    }
}

impl From<DeviceId> for u64 {
    fn from(id: DeviceId) -> u64 {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("", DEFAULT_DATAPATH_TYPE), "system");
        assert_eq!(normalize_type("   ", DEFAULT_DATAPATH_TYPE), "system");
        assert_eq!(normalize_type("netdev", DEFAULT_DATAPATH_TYPE), "netdev");
        assert_eq!(normalize_type("", "dummy"), "dummy");
    }

    #[test]
    fn test_device_id_parse() {
        assert_eq!("42".parse::<DeviceId>().unwrap(), DeviceId::new(42));
        assert!("br0".parse::<DeviceId>().is_err());
        assert!("-1".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::new(0).to_string(), "0");
        assert_eq!(u64::from(DeviceId::new(9)), 9);
    }
}
