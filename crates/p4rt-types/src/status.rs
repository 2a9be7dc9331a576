//! Status vocabulary returned to the remote-config host.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a remote-config callback.
///
/// Each failure mode is distinguishable so the remote-config host can
/// report why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiStatus {
    /// Request applied.
    Success,
    /// No live device carries the requested id (schema assignment).
    DevNotAssigned,
    /// No live device carries the requested id (program update).
    DevOutOfRange,
    /// The backend refused the request.
    TargetError,
}

impl PiStatus {
    /// Returns true if the request was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, PiStatus::Success)
    }

    /// Returns the canonical status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PiStatus::Success => "PI_STATUS_SUCCESS",
            PiStatus::DevNotAssigned => "PI_STATUS_DEV_NOT_ASSIGNED",
            PiStatus::DevOutOfRange => "PI_STATUS_DEV_OUT_OF_RANGE",
            PiStatus::TargetError => "PI_STATUS_TARGET_ERROR",
        }
    }
}

impl fmt::Display for PiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PI_STATUS_SUCCESS" => Ok(PiStatus::Success),
            "PI_STATUS_DEV_NOT_ASSIGNED" => Ok(PiStatus::DevNotAssigned),
            "PI_STATUS_DEV_OUT_OF_RANGE" => Ok(PiStatus::DevOutOfRange),
            "PI_STATUS_TARGET_ERROR" => Ok(PiStatus::TargetError),
            _ => Err(ParseError::InvalidStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_success() {
        assert!(PiStatus::Success.is_success());
        assert!(!PiStatus::DevNotAssigned.is_success());
        assert!(!PiStatus::DevOutOfRange.is_success());
        assert!(!PiStatus::TargetError.is_success());
    }

    #[test]
    fn test_display_parse() {
        for status in [
            PiStatus::Success,
            PiStatus::DevNotAssigned,
            PiStatus::DevOutOfRange,
            PiStatus::TargetError,
        ] {
            assert_eq!(status.to_string().parse::<PiStatus>().unwrap(), status);
        }
        assert!("PI_STATUS_BOGUS".parse::<PiStatus>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&PiStatus::DevOutOfRange).unwrap();
        assert_eq!(json, "\"DEV_OUT_OF_RANGE\"");
    }
}
