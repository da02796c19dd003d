//! Handshake status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code carried by every handshake response.
///
/// [`Status::OK`] is the only success value. Anything else is an
/// application-level failure reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const UNKNOWN_RESOURCE: Status = Status(1);
    pub const SUBSCRIPTION_LIMIT_REACHED: Status = Status(5);
    pub const NO_RESOURCE_DATA: Status = Status(6);
    pub const THROTTLED: Status = Status(1001);
    pub const SERVICE_UNAVAILABLE: Status = Status(1002);

    /// Raw status code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == Self::OK.0
    }

    /// Short description for well-known codes.
    #[must_use]
    pub const fn description(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("ok"),
            1 => Some("unknown resource"),
            5 => Some("subscription limit reached"),
            6 => Some("no resource data"),
            1001 => Some("throttled"),
            1002 => Some("service unavailable"),
            _ => None,
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "{} ({})", self.0, desc),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::OK.to_string(), "0 (ok)");
        assert_eq!(Status::THROTTLED.to_string(), "1001 (throttled)");
        assert_eq!(Status(77).to_string(), "77");
    }

    #[test]
    fn test_status_is_ok() {
        assert!(Status::OK.is_ok());
        assert!(!Status::UNKNOWN_RESOURCE.is_ok());
        assert!(Status::from(0).is_ok());
    }
}
