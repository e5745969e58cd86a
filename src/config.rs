//! Device manager configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::ble::adapter::ScanRequest;
use crate::ble::uuids::{GattTarget, MOCUTE_NAME_FILTER};
use crate::discovery::DiscoveryFilter;

/// Settings for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerConfig {
    /// Advertised-name fragment a peripheral must contain to be admitted.
    pub name_filter: String,
    /// How long each scan runs before the adapter stops it.
    pub scan_duration: Duration,
    /// Report repeated advertisements of the same peripheral.
    pub allow_duplicates: bool,
    /// Service UUIDs the adapter filters scans on (empty = all).
    pub scan_services: Vec<Uuid>,
    /// Characteristic notifications are armed on after services resolve.
    pub target: GattTarget,
    /// Upper bound on bond, service discovery and subscribe calls.
    ///
    /// `None` lets a peripheral stay `Bonding`/`ServicesResolving` until the
    /// adapter answers or the user disconnects.
    pub operation_timeout: Option<Duration>,
    /// Capacity of the notice and notification broadcast channels.
    pub channel_capacity: usize,
}

impl ManagerConfig {
    /// Default scan duration (5 seconds).
    pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

    /// Set the name filter.
    pub fn with_name_filter(mut self, fragment: impl Into<String>) -> Self {
        self.name_filter = fragment.into();
        self
    }

    /// Set the scan duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the notification target.
    pub fn with_target(mut self, target: GattTarget) -> Self {
        self.target = target;
        self
    }

    /// Bound adapter calls by `timeout`.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Discovery filter built from `name_filter`.
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter::name_contains(self.name_filter.clone())
    }

    /// Adapter scan request built from the scan settings.
    pub fn scan_request(&self) -> ScanRequest {
        ScanRequest {
            services: self.scan_services.clone(),
            duration: self.scan_duration,
            allow_duplicates: self.allow_duplicates,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name_filter: MOCUTE_NAME_FILTER.to_string(),
            scan_duration: Self::DEFAULT_SCAN_DURATION,
            allow_duplicates: true,
            scan_services: Vec::new(),
            target: GattTarget::hid_report(),
            operation_timeout: None,
            channel_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::DiscoveredPeripheral;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.name_filter, "MOCUTE");
        assert_eq!(config.scan_duration, Duration::from_secs(5));
        assert!(config.allow_duplicates);
        assert!(config.operation_timeout.is_none());
        assert_eq!(config.target, GattTarget::hid_report());
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::default()
            .with_name_filter("8BitDo")
            .with_scan_duration(Duration::from_secs(10))
            .with_operation_timeout(Duration::from_secs(30));

        let request = config.scan_request();
        assert_eq!(request.duration, Duration::from_secs(10));
        assert!(request.services.is_empty());
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert!(config
            .discovery_filter()
            .matches(&DiscoveredPeripheral::named("A", "8BitDo Zero 2")));
    }
}
