//! The adapter abstraction the core drives.
//!
//! [`BleAdapter`] is the capability surface the device manager calls into:
//! scanning, bonding, service discovery and notification subscription, plus
//! a broadcast stream of [`AdapterEvent`]s. The production implementation is
//! [`BtleplugAdapter`](crate::ble::btleplug_adapter::BtleplugAdapter); tests
//! substitute a fake or a mock.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ble::uuids::GattTarget;
use crate::error::Result;
use crate::peripheral::PeripheralId;

/// A peripheral as reported by a scan or a bonded-device query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DiscoveredPeripheral {
    /// Create a peripheral report with a name and no RSSI.
    pub fn named(id: impl Into<PeripheralId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            rssi: None,
        }
    }
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Whether the characteristic supports notifications.
    pub notify: bool,
}

/// A GATT service found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics exposed by the service.
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    /// Get a characteristic of this service.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Check whether a resolved service list contains the target pair and the
/// target characteristic supports notifications.
pub fn contains_target(services: &[ServiceDescriptor], target: &GattTarget) -> bool {
    services
        .iter()
        .filter(|s| s.uuid == target.service)
        .filter_map(|s| s.characteristic(&target.characteristic))
        .any(|c| c.notify)
}

/// Parameters for a time-bounded scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Only report peripherals advertising these services (empty = all).
    pub services: Vec<Uuid>,
    /// How long the adapter scans before emitting [`AdapterEvent::ScanStopped`].
    pub duration: Duration,
    /// Report every advertisement rather than the first per peripheral.
    pub allow_duplicates: bool,
}

/// Event delivered by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A peripheral was seen in a scan.
    Discovery(DiscoveredPeripheral),
    /// The link to a peripheral came up.
    Connected(PeripheralId),
    /// The link to a peripheral went down.
    Disconnected(PeripheralId),
    /// An armed characteristic pushed a value.
    Notification {
        /// Peripheral that sent the value.
        id: PeripheralId,
        /// Characteristic the value belongs to.
        characteristic: Uuid,
        /// Raw value.
        value: Bytes,
    },
    /// The running scan ended.
    ScanStopped,
}

/// Capability surface of a BLE adapter.
///
/// Every method completes asynchronously; callers must not assume ordering
/// between calls for different peripherals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Fail with [`Error::AdapterUnavailable`](crate::Error::AdapterUnavailable)
    /// unless the radio is present and usable.
    async fn ensure_ready(&self) -> Result<()>;

    /// Start a scan that stops by itself after `request.duration`.
    ///
    /// Each scan ends with exactly one [`AdapterEvent::ScanStopped`], whether
    /// its timer or [`stop_scan`](Self::stop_scan) ends it.
    async fn scan(&self, request: ScanRequest) -> Result<()>;

    /// Stop the running scan early. Does nothing if it already ended.
    async fn stop_scan(&self) -> Result<()>;

    /// Bond (pair) with a peripheral.
    async fn bond(&self, id: &PeripheralId) -> Result<()>;

    /// Remove the bond with a peripheral.
    async fn unbond(&self, id: &PeripheralId) -> Result<()>;

    /// Run GATT service discovery and return what was found.
    async fn resolve_services(&self, id: &PeripheralId) -> Result<Vec<ServiceDescriptor>>;

    /// Enable notifications on one characteristic.
    async fn subscribe_notification(&self, id: &PeripheralId, target: GattTarget) -> Result<()>;

    /// Peripherals the OS already holds a bond for.
    async fn bonded_peripherals(&self) -> Result<Vec<DiscoveredPeripheral>>;

    /// Subscribe to adapter events.
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    fn hid_service() -> ServiceDescriptor {
        ServiceDescriptor {
            uuid: HID_SERVICE_UUID,
            characteristics: vec![
                CharacteristicDescriptor {
                    uuid: HID_INFORMATION_CHARACTERISTIC_UUID,
                    notify: false,
                },
                CharacteristicDescriptor {
                    uuid: HID_REPORT_CHARACTERISTIC_UUID,
                    notify: true,
                },
            ],
        }
    }

    #[test]
    fn test_contains_target() {
        let services = vec![hid_service()];
        assert!(contains_target(&services, &GattTarget::hid_report()));
    }

    #[test]
    fn test_contains_target_requires_matching_service() {
        // Right characteristic under the wrong service is not the target.
        let services = vec![ServiceDescriptor {
            uuid: BATTERY_SERVICE_UUID,
            characteristics: vec![CharacteristicDescriptor {
                uuid: HID_REPORT_CHARACTERISTIC_UUID,
                notify: true,
            }],
        }];
        assert!(!contains_target(&services, &GattTarget::hid_report()));
        assert!(!contains_target(&[], &GattTarget::hid_report()));
    }

    #[test]
    fn test_contains_target_requires_notify() {
        let mut service = hid_service();
        service.characteristics[1].notify = false;
        assert!(!contains_target(&[service], &GattTarget::hid_report()));

        let info_target = GattTarget::new(HID_SERVICE_UUID, HID_INFORMATION_CHARACTERISTIC_UUID);
        assert!(!contains_target(&[hid_service()], &info_target));
    }

    #[test]
    fn test_adapter_event_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AdapterEvent>();
    }
}
