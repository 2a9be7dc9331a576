//! Datapath port numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port number within a single device's port table.
///
/// Numbers `1..=MAX` are regular ports. `LOCAL` is the device's own
/// internal port (the port named after the device itself). Zero and the
/// range above `MAX` other than `LOCAL` are never assigned.
///
/// # Examples
///
/// ```
/// use p4rt_types::PortNo;
///
/// let port = PortNo::new(1).unwrap();
/// assert_eq!(port.as_u16(), 1);
///
/// assert!(PortNo::new(0).is_err());
/// assert!(PortNo::LOCAL.is_local());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PortNo(u16);

impl PortNo {
    /// Lowest assignable port number.
    pub const MIN: PortNo = PortNo(1);

    /// Highest assignable regular port number.
    pub const MAX: PortNo = PortNo(0xff00);

    /// The device's local (internal) port.
    pub const LOCAL: PortNo = PortNo(0xfffe);

    /// Creates a port number, rejecting zero and reserved values other
    /// than `LOCAL`.
    pub fn new(raw: u16) -> Result<Self, ParseError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&raw) || raw == Self::LOCAL.0 {
            Ok(PortNo(raw))
        } else {
            Err(ParseError::InvalidPortNo(raw.to_string()))
        }
    }

    /// Returns the raw 16-bit value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true for the reserved local port.
    pub const fn is_local(&self) -> bool {
        self.0 == Self::LOCAL.0
    }

    /// Returns the next regular port number, if any.
    pub const fn next(&self) -> Option<PortNo> {
        if self.0 >= Self::MIN.0 && self.0 < Self::MAX.0 {
            Some(PortNo(self.0 + 1))
        } else {
            None
        }
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "LOCAL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for PortNo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("local") {
            return Ok(PortNo::LOCAL);
        }
        let raw: u16 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidPortNo(s.to_string()))?;
        PortNo::new(raw)
    }
}

impl TryFrom<u16> for PortNo {
    type Error = ParseError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        PortNo::new(raw)
    }
}

impl From<PortNo> for u16 {
    fn from(port: PortNo) -> u16 {
        port.0
    }
}
