//! Error types for the ble-hid-link crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio is off, missing, or permission to use it was not granted.
    #[error("Bluetooth adapter not available or not ready")]
    AdapterUnavailable,

    /// A scan was requested while another one is starting or running.
    #[error("A scan is already in progress")]
    AlreadyScanning,

    /// The specified peripheral is not in the registry or adapter cache.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Bonding (pairing) with the peripheral failed.
    #[error("Failed to bond with {identifier}: {reason}")]
    BondFailure {
        /// The peripheral that could not be bonded.
        identifier: String,
        /// Description of why bonding failed.
        reason: String,
    },

    /// Removing the bond with the peripheral failed.
    #[error("Failed to remove the bond with {identifier}: {reason}")]
    UnbondFailure {
        /// The peripheral whose bond could not be removed.
        identifier: String,
        /// Description of why unbonding failed.
        reason: String,
    },

    /// GATT service discovery failed.
    #[error("Service resolution failed for {identifier}: {reason}")]
    ServiceResolutionFailure {
        /// The peripheral whose services could not be resolved.
        identifier: String,
        /// Description of why discovery failed.
        reason: String,
    },

    /// The configured service/characteristic pair does not exist on the peripheral.
    #[error("Invalid target on {identifier}: service {service}, characteristic {characteristic}")]
    InvalidTarget {
        /// The peripheral that was addressed.
        identifier: String,
        /// The service UUID that was requested.
        service: String,
        /// The characteristic UUID that was requested.
        characteristic: String,
    },

    /// Subscribing to characteristic notifications failed.
    #[error("Notification subscription failed for {identifier}: {reason}")]
    NotificationFailure {
        /// The peripheral that rejected the subscription.
        identifier: String,
        /// Description of why the subscription failed.
        reason: String,
    },

    /// An adapter operation did not complete within the configured timeout.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The device manager's dispatcher is no longer running.
    #[error("Device manager stopped")]
    ManagerStopped,
}

impl Error {
    /// Short human readable reason, used when one error is wrapped into another.
    pub(crate) fn reason(&self) -> String {
        match self {
            Self::BondFailure { reason, .. }
            | Self::UnbondFailure { reason, .. }
            | Self::ServiceResolutionFailure { reason, .. }
            | Self::NotificationFailure { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::BondFailure {
            identifier: "AA:BB".to_string(),
            reason: "rejected".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to bond with AA:BB: rejected");
        assert_eq!(
            Error::AlreadyScanning.to_string(),
            "A scan is already in progress"
        );
    }

    #[test]
    fn test_reason_unwraps_nested_failures() {
        let err = Error::ServiceResolutionFailure {
            identifier: "AA:BB".to_string(),
            reason: "gatt error 133".to_string(),
        };
        assert_eq!(err.reason(), "gatt error 133");

        let timeout = Error::Timeout {
            operation: "bond".to_string(),
        };
        assert_eq!(timeout.reason(), "Operation timed out: bond");
    }
}
