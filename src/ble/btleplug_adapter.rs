//! [`BleAdapter`] implementation on top of btleplug.
//!
//! btleplug has no explicit bonding API. Connecting to a HID peripheral makes
//! the OS pair with it, so `bond` maps to a link connect and `unbond` to a
//! link disconnect; the OS-level bond record is left to the platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::adapter::{
    AdapterEvent, BleAdapter, CharacteristicDescriptor, DiscoveredPeripheral, ScanRequest,
    ServiceDescriptor,
};
use crate::ble::uuids::GattTarget;
use crate::error::{Error, Result};
use crate::peripheral::PeripheralId;

type PeripheralCache = Arc<RwLock<HashMap<PeripheralId, Peripheral>>>;

/// A timed scan. Whoever clears `live` first ends it and reports
/// [`AdapterEvent::ScanStopped`].
struct ActiveScan {
    timer: JoinHandle<()>,
    live: Arc<AtomicBool>,
}

/// Adapter backed by the first system Bluetooth adapter.
pub struct BtleplugAdapter {
    /// The BLE adapter.
    adapter: Adapter,
    /// Peripherals seen so far, by identifier.
    peripherals: PeripheralCache,
    /// Whether repeated advertisements are forwarded.
    allow_duplicates: Arc<AtomicBool>,
    /// Channel for adapter events.
    event_tx: broadcast::Sender<AdapterEvent>,
    /// Central event pump.
    event_handle: RwLock<Option<JoinHandle<()>>>,
    /// The running scan.
    active_scan: RwLock<Option<ActiveScan>>,
    /// Notification pumps, one per subscribed peripheral.
    notification_handles: RwLock<HashMap<PeripheralId, JoinHandle<()>>>,
}

impl BtleplugAdapter {
    /// Open the first system Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::AdapterUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::AdapterUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Wrap a specific adapter.
    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let (event_tx, _) = broadcast::channel(128);
        let peripherals: PeripheralCache = Arc::new(RwLock::new(HashMap::new()));
        let allow_duplicates = Arc::new(AtomicBool::new(true));

        let mut events = adapter.events().await.map_err(Error::Bluetooth)?;

        let handle = {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            let allow_duplicates = allow_duplicates.clone();
            let event_tx = event_tx.clone();

            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    Self::handle_event(event, &adapter, &peripherals, &allow_duplicates, &event_tx)
                        .await;
                }
                debug!("Central event stream ended");
            })
        };

        Ok(Self {
            adapter,
            peripherals,
            allow_duplicates,
            event_tx,
            event_handle: RwLock::new(Some(handle)),
            active_scan: RwLock::new(None),
            notification_handles: RwLock::new(HashMap::new()),
        })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    /// Translate a btleplug central event.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        peripherals: &PeripheralCache,
        allow_duplicates: &AtomicBool,
        event_tx: &broadcast::Sender<AdapterEvent>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::process_peripheral(adapter, id, peripherals, event_tx).await;
            }
            CentralEvent::DeviceUpdated(id) => {
                if allow_duplicates.load(Ordering::Relaxed) {
                    trace!("Device updated: {:?}", id);
                    Self::process_peripheral(adapter, id, peripherals, event_tx).await;
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                let _ = event_tx.send(AdapterEvent::Connected(PeripheralId::new(id.to_string())));
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let _ = event_tx.send(AdapterEvent::Disconnected(PeripheralId::new(
                    id.to_string(),
                )));
            }
            _ => {}
        }
    }

    /// Cache a peripheral and report it as discovered.
    async fn process_peripheral(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        peripherals: &PeripheralCache,
        event_tx: &broadcast::Sender<AdapterEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let Some(discovered) = describe(&peripheral).await else {
            return;
        };

        peripherals
            .write()
            .insert(discovered.id.clone(), peripheral);

        let _ = event_tx.send(AdapterEvent::Discovery(discovered));
    }

    /// Forward notifications of `peripheral` as adapter events.
    async fn start_notification_pump(
        &self,
        id: &PeripheralId,
        peripheral: &Peripheral,
    ) -> Result<()> {
        let mut notifications = peripheral.notifications().await.map_err(Error::Bluetooth)?;
        let event_tx = self.event_tx.clone();
        let peripheral_id = id.clone();

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes on {}",
                    peripheral_id,
                    notification.value.len(),
                    notification.uuid
                );
                let _ = event_tx.send(AdapterEvent::Notification {
                    id: peripheral_id.clone(),
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                });
            }
            debug!("Notification stream for {} ended", peripheral_id);
        });

        if let Some(previous) = self.notification_handles.write().insert(id.clone(), handle) {
            previous.abort();
        }

        Ok(())
    }

    fn stop_notification_pump(&self, id: &PeripheralId) {
        if let Some(handle) = self.notification_handles.write().remove(id) {
            handle.abort();
        }
    }
}

/// Build a discovery report from a peripheral's advertised properties.
async fn describe(peripheral: &Peripheral) -> Option<DiscoveredPeripheral> {
    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    Some(DiscoveredPeripheral {
        id: PeripheralId::new(peripheral.id().to_string()),
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn ensure_ready(&self) -> Result<()> {
        self.adapter
            .adapter_info()
            .await
            .map_err(|_e| Error::AdapterUnavailable)?;
        Ok(())
    }

    async fn scan(&self, request: ScanRequest) -> Result<()> {
        self.allow_duplicates
            .store(request.allow_duplicates, Ordering::Relaxed);

        self.adapter
            .start_scan(ScanFilter {
                services: request.services.clone(),
            })
            .await
            .map_err(Error::Bluetooth)?;

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let duration = request.duration;
        let live = Arc::new(AtomicBool::new(true));

        let timer = {
            let live = live.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if !live.swap(false, Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop scan after {:?}: {}", duration, e);
                }
                let _ = event_tx.send(AdapterEvent::ScanStopped);
            })
        };

        let previous = self.active_scan.write().replace(ActiveScan { timer, live });
        if let Some(previous) = previous {
            previous.live.store(false, Ordering::SeqCst);
            previous.timer.abort();
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let active = self.active_scan.write().take();
        let Some(active) = active else {
            debug!("No scan to stop");
            return Ok(());
        };

        if !active.live.swap(false, Ordering::SeqCst) {
            debug!("Scan already ended by its timer");
            return Ok(());
        }
        active.timer.abort();

        let result = self.adapter.stop_scan().await.map_err(Error::Bluetooth);
        let _ = self.event_tx.send(AdapterEvent::ScanStopped);
        result
    }

    async fn bond(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.peripheral(id)?;

        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral {} already connected at BLE level", id);
            return Ok(());
        }

        peripheral.connect().await.map_err(Error::Bluetooth)
    }

    async fn unbond(&self, id: &PeripheralId) -> Result<()> {
        self.stop_notification_pump(id);

        let peripheral = self.peripheral(id)?;
        match peripheral.disconnect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to disconnect {}: {}", id, e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    async fn resolve_services(&self, id: &PeripheralId) -> Result<Vec<ServiceDescriptor>> {
        let peripheral = self.peripheral(id)?;
        peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = peripheral
            .services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicDescriptor {
                        uuid: c.uuid,
                        notify: c.properties.contains(btleplug::api::CharPropFlags::NOTIFY),
                    })
                    .collect(),
            })
            .collect();

        Ok(services)
    }

    async fn subscribe_notification(&self, id: &PeripheralId, target: GattTarget) -> Result<()> {
        let peripheral = self.peripheral(id)?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service)
            .ok_or_else(|| Error::InvalidTarget {
                identifier: id.to_string(),
                service: target.service.to_string(),
                characteristic: target.characteristic.to_string(),
            })?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            characteristic.uuid, characteristic.properties
        );

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        self.start_notification_pump(id, &peripheral).await
    }

    async fn bonded_peripherals(&self) -> Result<Vec<DiscoveredPeripheral>> {
        // No bonded-device query in btleplug; links the OS already holds are the closest match.
        let mut bonded = Vec::new();

        for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            let Some(discovered) = describe(&peripheral).await else {
                continue;
            };
            self.peripherals
                .write()
                .insert(discovered.id.clone(), peripheral);
            bonded.push(discovered);
        }

        Ok(bonded)
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.event_handle.write().take() {
            handle.abort();
        }
        if let Some(active) = self.active_scan.write().take() {
            active.timer.abort();
        }
        for (_, handle) in self.notification_handles.write().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BtleplugAdapter>();
    }
}
