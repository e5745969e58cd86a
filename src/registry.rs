//! The peripheral registry.
//!
//! Single source of truth for known devices. Records are keyed by
//! [`PeripheralId`], admitted once and then mutated in place through
//! [`PeripheralRegistry::upsert`]. Every mutation republishes the
//! [`DeviceLists`] projection on a watch channel.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::peripheral::{ConnectionState, PeripheralId, PeripheralRecord};
use crate::view::{project, DeviceLists};

/// Ordered, de-duplicated set of peripheral records.
#[derive(Debug)]
pub struct PeripheralRegistry {
    records: HashMap<PeripheralId, PeripheralRecord>,
    next_order: u64,
    lists_tx: watch::Sender<DeviceLists>,
}

impl PeripheralRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (lists_tx, _) = watch::channel(DeviceLists::default());

        Self {
            records: HashMap::new(),
            next_order: 0,
            lists_tx,
        }
    }

    /// Insert a default record for `id` if absent, then apply `mutator` to it.
    ///
    /// New records start `Discovered` with the next admission order. The order
    /// of an existing record is never touched, whatever the mutator does.
    pub fn upsert<F>(&mut self, id: &PeripheralId, mutator: F) -> &PeripheralRecord
    where
        F: FnOnce(&mut PeripheralRecord),
    {
        let next_order = &mut self.next_order;
        let record = self.records.entry(id.clone()).or_insert_with(|| {
            let order = *next_order;
            *next_order += 1;
            debug!("Admitting peripheral {} at position {}", id, order);
            PeripheralRecord::new(id.clone(), order)
        });

        let order = record.last_seen_order;
        mutator(record);
        record.id = id.clone();
        record.last_seen_order = order;
        record.last_seen = Utc::now();

        debug_assert!(
            record.connection_state != ConnectionState::NotificationsActive
                || record.services_resolved,
            "{} has notifications active without resolved services",
            id
        );

        trace!(
            "Peripheral {} is now {} (services resolved: {})",
            id,
            record.connection_state,
            record.services_resolved
        );

        self.publish();

        &self.records[id]
    }

    /// Look up a record by identifier.
    pub fn get(&self, id: &PeripheralId) -> Option<PeripheralRecord> {
        self.records.get(id).cloned()
    }

    /// Whether a record exists for `id`.
    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.records.contains_key(id)
    }

    /// All records sorted by admission order.
    pub fn snapshot_all(&self) -> Vec<PeripheralRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.last_seen_order);
        records
    }

    /// Number of known peripherals.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no peripheral has been admitted yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current projection.
    pub fn lists(&self) -> DeviceLists {
        self.lists_tx.borrow().clone()
    }

    /// Watch the projection; the receiver always holds the latest lists.
    pub fn subscribe(&self) -> watch::Receiver<DeviceLists> {
        self.lists_tx.subscribe()
    }

    fn publish(&self) {
        let lists = project(&self.snapshot_all());
        self.lists_tx.send_replace(lists);
    }
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::new()
    }
}
