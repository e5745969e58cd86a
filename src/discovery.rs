//! Scan lifecycle and discovery filtering.
//!
//! The coordinator guards against overlapping scans and decides which
//! discovery events are admitted into the registry.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::ble::adapter::{DiscoveredPeripheral, ScanRequest};
use crate::error::{Error, Result};
use crate::registry::PeripheralRegistry;

type Predicate = dyn Fn(&DiscoveredPeripheral) -> bool + Send + Sync;

/// Decides whether a discovered peripheral is admitted.
#[derive(Clone)]
pub struct DiscoveryFilter {
    label: String,
    predicate: Arc<Predicate>,
}

impl DiscoveryFilter {
    /// Admit peripherals whose advertised name contains `fragment`.
    ///
    /// Peripherals that advertise no name never match.
    pub fn name_contains(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        let label = format!("name contains {:?}", fragment);

        Self {
            label,
            predicate: Arc::new(move |p: &DiscoveredPeripheral| {
                p.name
                    .as_deref()
                    .map(|n| n.contains(fragment.as_str()))
                    .unwrap_or(false)
            }),
        }
    }

    /// Admit everything.
    pub fn any() -> Self {
        Self::custom("any", |_| true)
    }

    /// Admit peripherals accepted by an arbitrary predicate.
    pub fn custom<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&DiscoveredPeripheral) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Check a peripheral against the filter.
    pub fn matches(&self, peripheral: &DiscoveredPeripheral) -> bool {
        (self.predicate)(peripheral)
    }
}

impl std::fmt::Debug for DiscoveryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DiscoveryFilter").field(&self.label).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    Idle,
    /// Start requested, adapter has not answered yet. `stopped` records a
    /// scan-stop signal that overtook the start confirmation.
    Starting { stopped: bool },
    Scanning,
}

/// Owns the scan lifecycle and admission of discovery events.
#[derive(Debug)]
pub struct DiscoveryCoordinator {
    phase: ScanPhase,
    filter: DiscoveryFilter,
}

impl DiscoveryCoordinator {
    /// Create an idle coordinator that admits with `filter` until a scan sets another.
    pub fn new(filter: DiscoveryFilter) -> Self {
        Self {
            phase: ScanPhase::Idle,
            filter,
        }
    }

    /// Begin a scan with `filter`.
    ///
    /// Returns the request the caller must hand to the adapter, followed later
    /// by [`on_scan_started`](Self::on_scan_started) with the adapter's answer.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyScanning`] if a scan is starting or running. Nothing
    /// changes in that case.
    pub fn start_scan(
        &mut self,
        filter: DiscoveryFilter,
        request: ScanRequest,
    ) -> Result<ScanRequest> {
        if self.phase != ScanPhase::Idle {
            debug!("Already scanning, rejecting start request");
            return Err(Error::AlreadyScanning);
        }

        info!(
            "Starting {}s scan, filter {:?}",
            request.duration.as_secs(),
            filter
        );

        self.filter = filter;
        self.phase = ScanPhase::Starting { stopped: false };

        Ok(request)
    }

    /// Record the adapter's answer to a scan start.
    ///
    /// The scanning flag is raised only on success.
    pub fn on_scan_started(&mut self, result: Result<()>) -> Result<()> {
        let stopped = match self.phase {
            ScanPhase::Starting { stopped } => stopped,
            _ => false,
        };

        match result {
            Ok(()) if stopped => {
                debug!("Scan stopped before its start was confirmed");
                self.phase = ScanPhase::Idle;
                Ok(())
            }
            Ok(()) => {
                info!("Scanning...");
                self.phase = ScanPhase::Scanning;
                Ok(())
            }
            Err(e) => {
                self.phase = ScanPhase::Idle;
                Err(e)
            }
        }
    }

    /// Admit a discovery event into the registry if it passes the filter.
    ///
    /// Existing records keep their connection state; only the advertised
    /// name and signal strength are refreshed.
    pub fn on_discovery_event(
        &self,
        registry: &mut PeripheralRegistry,
        peripheral: &DiscoveredPeripheral,
    ) -> bool {
        if !self.filter.matches(peripheral) {
            trace!(
                "Ignoring {} ({:?}), does not match {:?}",
                peripheral.id,
                peripheral.name,
                self.filter
            );
            return false;
        }

        if !registry.contains(&peripheral.id) {
            info!(
                "Discovered {} ({})",
                peripheral.name.as_deref().unwrap_or("unnamed"),
                peripheral.id
            );
        }

        registry.upsert(&peripheral.id, |record| {
            if peripheral.name.is_some() {
                record.name = peripheral.name.clone();
            }
            if peripheral.rssi.is_some() {
                record.rssi = peripheral.rssi;
            }
        });

        true
    }

    /// Clear the scanning flag.
    pub fn on_scan_stopped(&mut self) {
        match self.phase {
            ScanPhase::Starting { .. } => {
                self.phase = ScanPhase::Starting { stopped: true };
            }
            ScanPhase::Scanning => {
                info!("Scan stopped");
                self.phase = ScanPhase::Idle;
            }
            ScanPhase::Idle => {
                debug!("Scan stop signalled while idle");
            }
        }
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.phase == ScanPhase::Scanning
    }

    /// Check if a scan start or scan is outstanding.
    pub fn is_busy(&self) -> bool {
        self.phase != ScanPhase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::{ConnectionState, PeripheralId};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn request() -> ScanRequest {
        ScanRequest {
            services: Vec::new(),
            duration: Duration::from_secs(5),
            allow_duplicates: true,
        }
    }

    fn mocute() -> DiscoveryFilter {
        DiscoveryFilter::name_contains("MOCUTE")
    }

    #[test]
    fn test_name_filter() {
        let filter = mocute();
        assert!(filter.matches(&DiscoveredPeripheral::named("A", "MOCUTE-X")));
        assert!(!filter.matches(&DiscoveredPeripheral::named("B", "Other")));
        assert!(!filter.matches(&DiscoveredPeripheral {
            id: PeripheralId::from("C"),
            name: None,
            rssi: Some(-60),
        }));
        assert!(DiscoveryFilter::any().matches(&DiscoveredPeripheral::named("B", "Other")));
    }

    #[test]
    fn test_scan_flag_set_only_after_confirmation() {
        let mut coordinator = DiscoveryCoordinator::new(mocute());
        coordinator.start_scan(mocute(), request()).unwrap();
        assert!(!coordinator.is_scanning());
        assert!(coordinator.is_busy());

        coordinator.on_scan_started(Ok(())).unwrap();
        assert!(coordinator.is_scanning());

        coordinator.on_scan_stopped();
        assert!(!coordinator.is_scanning());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn test_start_while_scanning_is_rejected() {
        let mut coordinator = DiscoveryCoordinator::new(mocute());
        coordinator.start_scan(mocute(), request()).unwrap();
        assert!(matches!(
            coordinator.start_scan(mocute(), request()),
            Err(Error::AlreadyScanning)
        ));

        coordinator.on_scan_started(Ok(())).unwrap();
        assert!(matches!(
            coordinator.start_scan(mocute(), request()),
            Err(Error::AlreadyScanning)
        ));
        assert!(coordinator.is_scanning());
    }

    #[test]
    fn test_failed_start_leaves_flag_clear() {
        let mut coordinator = DiscoveryCoordinator::new(mocute());
        coordinator.start_scan(mocute(), request()).unwrap();

        let result = coordinator.on_scan_started(Err(Error::AdapterUnavailable));
        assert!(matches!(result, Err(Error::AdapterUnavailable)));
        assert!(!coordinator.is_scanning());
        assert!(!coordinator.is_busy());

        // A new scan may be requested after the failure.
        assert!(coordinator.start_scan(mocute(), request()).is_ok());
    }

    #[test]
    fn test_stop_overtaking_start_confirmation() {
        let mut coordinator = DiscoveryCoordinator::new(mocute());
        coordinator.start_scan(mocute(), request()).unwrap();
        coordinator.on_scan_stopped();
        coordinator.on_scan_started(Ok(())).unwrap();
        assert!(!coordinator.is_scanning());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn test_filtered_discovery() {
        let coordinator = DiscoveryCoordinator::new(mocute());
        let mut registry = PeripheralRegistry::new();

        let mocute_x = DiscoveredPeripheral::named("A", "MOCUTE-X");
        let other = DiscoveredPeripheral::named("B", "Other");
        assert!(coordinator.on_discovery_event(&mut registry, &mocute_x));
        assert!(!coordinator.on_discovery_event(&mut registry, &other));

        assert_eq!(registry.lists().discovered_ids(), vec!["A"]);
    }

    #[test]
    fn test_rediscovery_preserves_connection_state() {
        let coordinator = DiscoveryCoordinator::new(mocute());
        let mut registry = PeripheralRegistry::new();
        let id = PeripheralId::from("A");

        let mocute_x = DiscoveredPeripheral::named("A", "MOCUTE-X");
        coordinator.on_discovery_event(&mut registry, &mocute_x);
        registry.upsert(&id, |r| {
            r.services_resolved = true;
            r.connection_state = ConnectionState::NotificationsActive;
        });

        let mut again = DiscoveredPeripheral::named("A", "MOCUTE-X");
        again.rssi = Some(-48);
        coordinator.on_discovery_event(&mut registry, &again);

        let record = registry.get(&id).unwrap();
        assert_eq!(record.connection_state, ConnectionState::NotificationsActive);
        assert!(record.services_resolved);
        assert_eq!(record.rssi, Some(-48));
        assert_eq!(record.last_seen_order, 0);
        assert_eq!(registry.len(), 1);
    }
}
