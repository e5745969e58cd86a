//! Peripheral identity, connection state and the per-peripheral record.

use chrono::{DateTime, Utc};

/// Platform-assigned identifier of a BLE peripheral.
///
/// On Linux/Windows this is usually the MAC address, on macOS a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Connection lifecycle state of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Seen in a scan, never connected this session.
    #[default]
    Discovered,
    /// Bond (pairing) requested, waiting for the adapter.
    Bonding,
    /// Bonded, GATT service discovery in flight.
    ServicesResolving,
    /// Services resolved and notifications armed on the target characteristic.
    NotificationsActive,
    /// Bond removed or link lost.
    Disconnected,
    /// The last connection attempt failed.
    Error,
}

impl ConnectionState {
    /// Whether the peripheral is bonded or bonding right now.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Bonding | Self::ServicesResolving | Self::NotificationsActive
        )
    }

    /// Whether an adapter call for this peripheral is outstanding.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Bonding | Self::ServicesResolving)
    }

    /// Whether a connect request may start a new attempt from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Discovered | Self::Error | Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Bonding => write!(f, "Bonding"),
            Self::ServicesResolving => write!(f, "Resolving services"),
            Self::NotificationsActive => write!(f, "Notifications active"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Everything the registry knows about one peripheral.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralRecord {
    /// Registry key, never changes.
    pub id: PeripheralId,
    /// Advertised local name.
    pub name: Option<String>,
    /// Current lifecycle state.
    pub connection_state: ConnectionState,
    /// True only after a successful service discovery.
    pub services_resolved: bool,
    /// Admission order, assigned once.
    pub last_seen_order: u64,
    /// Found bonded during startup enumeration, not yet re-verified.
    pub previously_bonded: bool,
    /// Last advertised signal strength in dBm.
    pub rssi: Option<i16>,
    /// Time of the last event concerning this peripheral.
    pub last_seen: DateTime<Utc>,
}

impl PeripheralRecord {
    pub(crate) fn new(id: PeripheralId, last_seen_order: u64) -> Self {
        Self {
            id,
            name: None,
            connection_state: ConnectionState::Discovered,
            services_resolved: false,
            last_seen_order,
            previously_bonded: false,
            rssi: None,
            last_seen: Utc::now(),
        }
    }

    /// Name to show to a user, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Bonding.is_connected());
        assert!(ConnectionState::ServicesResolving.is_connected());
        assert!(ConnectionState::NotificationsActive.is_connected());
        assert!(!ConnectionState::Discovered.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Error.is_connected());

        assert!(ConnectionState::Bonding.is_transitioning());
        assert!(!ConnectionState::NotificationsActive.is_transitioning());
    }

    #[test]
    fn test_can_connect() {
        assert!(ConnectionState::Discovered.can_connect());
        assert!(ConnectionState::Error.can_connect());
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(!ConnectionState::Bonding.can_connect());
        assert!(!ConnectionState::NotificationsActive.can_connect());
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut record = PeripheralRecord::new(PeripheralId::from("AA:BB"), 0);
        assert_eq!(record.display_name(), "AA:BB");
        record.name = Some("MOCUTE-052".to_string());
        assert_eq!(record.display_name(), "MOCUTE-052");
    }
}
