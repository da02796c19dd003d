//! Protocol versioning for RTA.
//!
//! The version is negotiated through the WebSocket subprotocol header,
//! e.g. `rta.xboxlive.com.V2`.

use serde::{Deserialize, Serialize};

/// Default service endpoint.
pub const DEFAULT_URL: &str = "wss://rta.xboxlive.com/connect";

/// Prefix shared by every RTA subprotocol name.
pub const SUBPROTOCOL_PREFIX: &str = "rta.xboxlive.com.V";

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 2 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version - the only component the service advertises.
    pub major: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8) -> Self {
        Self { major }
    }

    /// The WebSocket subprotocol name for this version.
    #[must_use]
    pub fn subprotocol(&self) -> String {
        format!("{}{}", SUBPROTOCOL_PREFIX, self.major)
    }

    /// Parse a subprotocol name back into a version.
    #[must_use]
    pub fn from_subprotocol(name: &str) -> Option<Self> {
        name.trim()
            .strip_prefix(SUBPROTOCOL_PREFIX)
            .and_then(|major| major.parse().ok())
            .map(Self::new)
    }

    /// Check if this version is compatible with another version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}", self.major)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
