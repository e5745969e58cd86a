//! Device manager for discovering, bonding and monitoring BLE HID peripherals.
//!
//! The manager owns the peripheral registry, the discovery coordinator and
//! the connection state machine inside one dispatcher task. User requests,
//! adapter events and adapter-call completions are all messages on the same
//! queue, so no two mutations of a peripheral ever interleave. Adapter calls
//! run in their own tasks and report back through the queue; the dispatcher
//! never waits on the radio.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterEvent, BleAdapter, ScanRequest};
use crate::ble::btleplug_adapter::BtleplugAdapter;
use crate::callback::CallbackHandle;
use crate::config::ManagerConfig;
use crate::discovery::{DiscoveryCoordinator, DiscoveryFilter};
use crate::error::{Error, Result};
use crate::lifecycle::{AdapterRequest, Completion, ConnectionLifecycle, Step};
use crate::notice::{Notice, NoticeKind};
use crate::peripheral::{ConnectionState, PeripheralId, PeripheralRecord};
use crate::registry::PeripheralRegistry;
use crate::view::DeviceLists;

/// A value pushed by an armed characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    /// Peripheral that sent the value.
    pub peripheral: PeripheralId,
    /// Characteristic the value belongs to.
    pub characteristic: Uuid,
    /// Raw value, typically a HID input report.
    pub value: Bytes,
}

enum Message {
    Scan {
        filter: DiscoveryFilter,
        request: ScanRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    ScanStarted {
        result: Result<()>,
        reply: oneshot::Sender<Result<()>>,
    },
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    Completion(Completion),
    Shutdown,
}

/// Central manager for BLE HID peripherals.
pub struct DeviceManager {
    /// Settings the manager was started with.
    config: ManagerConfig,
    /// Dispatcher queue.
    tx: mpsc::UnboundedSender<Message>,
    /// Latest device lists.
    lists_rx: watch::Receiver<DeviceLists>,
    /// Mirror of the coordinator's scanning flag.
    is_scanning: Arc<AtomicBool>,
    /// Notice channel.
    notice_tx: broadcast::Sender<Notice>,
    /// Notification value channel.
    notification_tx: broadcast::Sender<NotificationEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Dispatcher task handle.
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DeviceManager {
    /// Create a device manager on the first system Bluetooth adapter with
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let adapter = BtleplugAdapter::new().await?;
        Self::start(Arc::new(adapter), ManagerConfig::default()).await
    }

    /// Start a device manager on `adapter`.
    ///
    /// Checks that the adapter is ready, then seeds the registry with the
    /// peripherals the OS already holds a bond for. Those start out
    /// `Disconnected` and marked previously bonded: their services and
    /// notifications are not re-verified until the user connects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if the adapter is not ready.
    pub async fn start(adapter: Arc<dyn BleAdapter>, config: ManagerConfig) -> Result<Self> {
        adapter.ensure_ready().await?;

        let mut registry = PeripheralRegistry::new();

        match adapter.bonded_peripherals().await {
            Ok(bonded) => {
                info!("Found {} bonded peripherals", bonded.len());
                for peripheral in bonded {
                    registry.upsert(&peripheral.id, |r| {
                        if peripheral.name.is_some() {
                            r.name = peripheral.name.clone();
                        }
                        r.connection_state = ConnectionState::Disconnected;
                        r.previously_bonded = true;
                    });
                }
            }
            Err(e) => {
                warn!("Could not enumerate bonded peripherals: {}", e);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (notice_tx, _) = broadcast::channel(config.channel_capacity);
        let (notification_tx, _) = broadcast::channel(config.channel_capacity);
        let is_scanning = Arc::new(AtomicBool::new(false));
        let lists_rx = registry.subscribe();
        let events = adapter.subscribe();

        let dispatcher = Dispatcher {
            adapter,
            operation_timeout: config.operation_timeout,
            registry,
            discovery: DiscoveryCoordinator::new(config.discovery_filter()),
            lifecycle: ConnectionLifecycle::new(config.target),
            tx: tx.clone(),
            is_scanning: is_scanning.clone(),
            notice_tx: notice_tx.clone(),
            notification_tx: notification_tx.clone(),
        };

        let handle = tokio::spawn(dispatcher.run(rx, events));

        info!("Device manager started");

        Ok(Self {
            config,
            tx,
            lists_rx,
            is_scanning,
            notice_tx,
            notification_tx,
            callback_counter: AtomicU64::new(0),
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// The configuration the manager runs with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Scan with the configured name filter and duration.
    ///
    /// Resolves once the adapter has confirmed the scan started. The scan
    /// ends by itself after the configured duration.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyScanning`] if a scan is starting or running, or the
    /// adapter's error if it refused to scan.
    pub async fn request_scan(&self) -> Result<()> {
        self.start_scan(self.config.discovery_filter(), self.config.scan_duration)
            .await
    }

    /// Scan for `duration`, admitting peripherals accepted by `filter`.
    ///
    /// # Errors
    ///
    /// See [`request_scan`](Self::request_scan).
    pub async fn start_scan(&self, filter: DiscoveryFilter, duration: Duration) -> Result<()> {
        let mut request = self.config.scan_request();
        request.duration = duration;

        let (reply, reply_rx) = oneshot::channel();
        self.send(Message::Scan {
            filter,
            request,
            reply,
        })?;

        reply_rx.await.map_err(|_| Error::ManagerStopped)?
    }

    /// Ask the adapter to end the running scan early.
    pub fn request_stop_scan(&self) -> Result<()> {
        self.send(Message::StopScan)
    }

    /// Start bonding with a peripheral.
    ///
    /// Fire-and-forget: the outcome shows up as state changes on the
    /// peripheral and, on failure, as a notice. A peripheral that is already
    /// bonding or bonded is left alone.
    ///
    /// # Errors
    ///
    /// [`Error::PeripheralNotFound`] if the peripheral is unknown.
    pub fn request_connect(&self, id: &PeripheralId) -> Result<()> {
        self.ensure_known(id)?;
        self.send(Message::Connect(id.clone()))
    }

    /// Disconnect a peripheral and remove its bond.
    ///
    /// Fire-and-forget, like [`request_connect`](Self::request_connect).
    ///
    /// # Errors
    ///
    /// [`Error::PeripheralNotFound`] if the peripheral is unknown.
    pub fn request_disconnect(&self, id: &PeripheralId) -> Result<()> {
        self.ensure_known(id)?;
        self.send(Message::Disconnect(id.clone()))
    }

    /// Every known peripheral, in the order it was first seen.
    pub fn discovered_devices(&self) -> Vec<PeripheralRecord> {
        self.lists_rx.borrow().discovered.clone()
    }

    /// Peripherals currently bonding or bonded, in the order first seen.
    pub fn connected_devices(&self) -> Vec<PeripheralRecord> {
        self.lists_rx.borrow().connected.clone()
    }

    /// Both device lists.
    pub fn device_lists(&self) -> DeviceLists {
        self.lists_rx.borrow().clone()
    }

    /// Get a specific peripheral.
    pub fn device(&self, id: &PeripheralId) -> Option<PeripheralRecord> {
        self.lists_rx
            .borrow()
            .discovered
            .iter()
            .find(|r| r.id == *id)
            .cloned()
    }

    /// Watch the device lists; a new value is published on every change.
    pub fn subscribe_devices(&self) -> watch::Receiver<DeviceLists> {
        self.lists_rx.clone()
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Subscribe to user-visible notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// Register a callback for notices.
    pub fn on_notice<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.notice_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(notice) = rx.recv().await {
                callback(notice);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Subscribe to values pushed by armed characteristics.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notification_tx.subscribe()
    }

    /// Register a callback for notification values.
    pub fn on_notification<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(NotificationEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.notification_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                callback(event);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Stop the dispatcher. Bonds are left in place.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down device manager");

        let _ = self.tx.send(Message::Shutdown);

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    fn ensure_known(&self, id: &PeripheralId) -> Result<()> {
        if self.lists_rx.borrow().discovered.iter().any(|r| r.id == *id) {
            Ok(())
        } else {
            Err(Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
        }
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ManagerStopped)
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.lists_rx.borrow().discovered.len())
            .field("is_scanning", &self.is_scanning())
            .finish()
    }
}

/// Sole owner of the registry. Runs as one task.
struct Dispatcher {
    adapter: Arc<dyn BleAdapter>,
    operation_timeout: Option<Duration>,
    registry: PeripheralRegistry,
    discovery: DiscoveryCoordinator,
    lifecycle: ConnectionLifecycle,
    tx: mpsc::UnboundedSender<Message>,
    is_scanning: Arc<AtomicBool>,
    notice_tx: broadcast::Sender<Notice>,
    notification_tx: broadcast::Sender<NotificationEvent>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Message>,
        mut events: broadcast::Receiver<AdapterEvent>,
    ) {
        let mut events_open = true;

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(Message::Shutdown) | None => break,
                    Some(message) => self.handle_message(message),
                },
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.handle_adapter_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} adapter events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Adapter event stream closed");
                        events_open = false;
                    }
                },
            }

            self.is_scanning
                .store(self.discovery.is_scanning(), Ordering::SeqCst);
        }

        debug!("Device manager dispatcher ended");
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Scan {
                filter,
                request,
                reply,
            } => match self.discovery.start_scan(filter, request) {
                Ok(request) => {
                    let adapter = self.adapter.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = adapter.scan(request).await;
                        let _ = tx.send(Message::ScanStarted { result, reply });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Message::ScanStarted { result, reply } => {
                let result = self.discovery.on_scan_started(result);
                self.is_scanning
                    .store(self.discovery.is_scanning(), Ordering::SeqCst);

                if let Err(e) = result {
                    error!("Failed to start scan: {}", e);
                    // Report to the caller, or as a notice if it stopped waiting.
                    if let Err(Err(e)) = reply.send(Err(e)) {
                        self.publish_notice(Notice::failure(NoticeKind::ScanFailure, None, &e));
                    }
                } else {
                    let _ = reply.send(Ok(()));
                }
            }
            Message::StopScan => {
                if !self.discovery.is_busy() {
                    debug!("Not scanning, ignoring stop request");
                    return;
                }
                // The adapter reports ScanStopped itself once the scan has ended.
                let adapter = self.adapter.clone();
                tokio::spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        warn!("Failed to stop scan: {}", e);
                    }
                });
            }
            Message::Connect(id) => match self.lifecycle.connect(&mut self.registry, &id) {
                Ok(step) => self.apply(step),
                Err(e) => warn!("Connect request rejected: {}", e),
            },
            Message::Disconnect(id) => match self.lifecycle.disconnect(&mut self.registry, &id) {
                Ok(step) => self.apply(step),
                Err(e) => warn!("Disconnect request rejected: {}", e),
            },
            Message::Completion(completion) => {
                let step = self.lifecycle.on_completion(&mut self.registry, completion);
                self.apply(step);
            }
            Message::Shutdown => {}
        }
    }

    fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Discovery(peripheral) => {
                self.discovery
                    .on_discovery_event(&mut self.registry, &peripheral);
            }
            AdapterEvent::Connected(id) => {
                debug!("Peripheral {} connected", id);
            }
            AdapterEvent::Disconnected(id) => {
                debug!("Peripheral {} disconnected", id);
                self.lifecycle.on_link_lost(&mut self.registry, &id);
            }
            AdapterEvent::Notification {
                id,
                characteristic,
                value,
            } => {
                if self.lifecycle.accepts_notification(&self.registry, &id) {
                    trace!("{} bytes from {} on {}", value.len(), id, characteristic);
                    let _ = self.notification_tx.send(NotificationEvent {
                        peripheral: id,
                        characteristic,
                        value,
                    });
                } else {
                    trace!("Dropping notification from inactive peripheral {}", id);
                }
            }
            AdapterEvent::ScanStopped => self.discovery.on_scan_stopped(),
        }
    }

    fn apply(&mut self, step: Step) {
        if let Some(notice) = step.notice {
            self.publish_notice(notice);
        }
        if let Some(request) = step.request {
            self.execute(request);
        }
    }

    fn publish_notice(&self, notice: Notice) {
        debug!("Notice: {}", notice);
        let _ = self.notice_tx.send(notice);
    }

    /// Run one adapter call in the background and queue its completion.
    fn execute(&self, request: AdapterRequest) {
        debug!("Issuing {:?} for {}", request, request.peripheral());

        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        let limit = self.operation_timeout;

        tokio::spawn(async move {
            let completion = match request {
                AdapterRequest::Bond { id, attempt } => {
                    let result = bounded(limit, "bond", adapter.bond(&id)).await;
                    Completion::Bonded {
                        id,
                        attempt,
                        result,
                    }
                }
                AdapterRequest::ResolveServices { id, attempt } => {
                    let result =
                        bounded(limit, "resolve services", adapter.resolve_services(&id)).await;
                    Completion::ServicesResolved {
                        id,
                        attempt,
                        result,
                    }
                }
                AdapterRequest::Subscribe {
                    id,
                    attempt,
                    target,
                } => {
                    let result = bounded(
                        limit,
                        "subscribe notification",
                        adapter.subscribe_notification(&id, target),
                    )
                    .await;
                    Completion::Subscribed {
                        id,
                        attempt,
                        result,
                    }
                }
                AdapterRequest::Unbond { id } => {
                    let result = bounded(limit, "unbond", adapter.unbond(&id)).await;
                    Completion::Unbonded { id, result }
                }
            };

            let _ = tx.send(Message::Completion(completion));
        });
    }
}

/// Await `operation`, failing with [`Error::Timeout`] past `limit`.
async fn bounded<T, F>(limit: Option<Duration>, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::Timeout {
                operation: operation.to_string(),
            })?,
        None => future.await,
    }
}
