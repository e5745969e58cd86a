//! Recording fake adapter for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::ble::adapter::{
    AdapterEvent, BleAdapter, CharacteristicDescriptor, DiscoveredPeripheral, ScanRequest,
    ServiceDescriptor,
};
use crate::ble::uuids::*;
use crate::error::{Error, Result};
use crate::peripheral::PeripheralId;

/// One adapter call, as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    EnsureReady,
    Scan(ScanRequest),
    StopScan,
    Bond(PeripheralId),
    Unbond(PeripheralId),
    ResolveServices(PeripheralId),
    Subscribe(PeripheralId, GattTarget),
    BondedPeripherals,
}

impl Call {
    fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::Bond(id)
            | Self::Unbond(id)
            | Self::ResolveServices(id)
            | Self::Subscribe(id, _) => Some(id),
            _ => None,
        }
    }
}

/// How the fake answers.
pub(crate) struct Behavior {
    pub ready: bool,
    pub fail_scan: bool,
    pub fail_bond: bool,
    pub fail_resolve: bool,
    pub fail_subscribe: bool,
    pub hang_bond: bool,
    pub bond_delay: Option<Duration>,
    pub unbond_delay: Option<Duration>,
    pub services: Vec<ServiceDescriptor>,
    pub bonded: Vec<DiscoveredPeripheral>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready: true,
            fail_scan: false,
            fail_bond: false,
            fail_resolve: false,
            fail_subscribe: false,
            hang_bond: false,
            bond_delay: None,
            unbond_delay: None,
            services: hid_services(),
            bonded: Vec::new(),
        }
    }
}

/// HID service exposing the report characteristic, plus a battery service.
pub(crate) fn hid_services() -> Vec<ServiceDescriptor> {
    vec![
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
        },
        ServiceDescriptor {
            uuid: BATTERY_SERVICE_UUID,
            characteristics: vec![CharacteristicDescriptor {
                uuid: BATTERY_LEVEL_CHARACTERISTIC_UUID,
                notify: true,
            }],
        },
    ]
}

/// Adapter that records every call and answers from [`Behavior`].
pub(crate) struct FakeAdapter {
    calls: Mutex<Vec<Call>>,
    behavior: Mutex<Behavior>,
    scanning: AtomicBool,
    events_tx: broadcast::Sender<AdapterEvent>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);

        Self {
            calls: Mutex::new(Vec::new()),
            behavior: Mutex::new(Behavior::default()),
            scanning: AtomicBool::new(false),
            events_tx,
        }
    }

    pub fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock()
    }

    pub fn emit(&self, event: AdapterEvent) {
        let _ = self.events_tx.send(event);
    }

    /// End the running scan the way its timer would.
    pub fn finish_scan(&self) {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.emit(AdapterEvent::ScanStopped);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, id: &PeripheralId) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.peripheral() == Some(id))
            .cloned()
            .collect()
    }

    pub fn count<F: Fn(&Call) -> bool>(&self, predicate: F) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

fn failure(operation: &str) -> Error {
    Error::Bluetooth(btleplug::Error::Other(
        format!("fake {} failure", operation).into(),
    ))
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn ensure_ready(&self) -> Result<()> {
        self.record(Call::EnsureReady);
        if self.behavior().ready {
            Ok(())
        } else {
            Err(Error::AdapterUnavailable)
        }
    }

    async fn scan(&self, request: ScanRequest) -> Result<()> {
        self.record(Call::Scan(request));
        if self.behavior().fail_scan {
            Err(failure("scan"))
        } else {
            self.scanning.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Call::StopScan);
        self.finish_scan();
        Ok(())
    }

    async fn bond(&self, id: &PeripheralId) -> Result<()> {
        self.record(Call::Bond(id.clone()));

        let (hang, delay, fail) = {
            let behavior = self.behavior();
            (behavior.hang_bond, behavior.bond_delay, behavior.fail_bond)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            Err(failure("bond"))
        } else {
            Ok(())
        }
    }

    async fn unbond(&self, id: &PeripheralId) -> Result<()> {
        self.record(Call::Unbond(id.clone()));
        let delay = self.behavior().unbond_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn resolve_services(&self, id: &PeripheralId) -> Result<Vec<ServiceDescriptor>> {
        self.record(Call::ResolveServices(id.clone()));
        let behavior = self.behavior();
        if behavior.fail_resolve {
            Err(failure("resolve"))
        } else {
            Ok(behavior.services.clone())
        }
    }

    async fn subscribe_notification(&self, id: &PeripheralId, target: GattTarget) -> Result<()> {
        self.record(Call::Subscribe(id.clone(), target));
        if self.behavior().fail_subscribe {
            Err(failure("subscribe"))
        } else {
            Ok(())
        }
    }

    async fn bonded_peripherals(&self) -> Result<Vec<DiscoveredPeripheral>> {
        self.record(Call::BondedPeripherals);
        Ok(self.behavior().bonded.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }
}
