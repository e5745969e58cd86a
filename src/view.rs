//! Projection of the registry into the two lists a UI presents.

use crate::peripheral::PeripheralRecord;

/// The discovered and connected device lists.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceLists {
    /// Every known peripheral, in admission order.
    pub discovered: Vec<PeripheralRecord>,
    /// Peripherals currently bonded or bonding, in admission order.
    pub connected: Vec<PeripheralRecord>,
}

impl DeviceLists {
    /// Identifiers of the discovered list, mostly useful for assertions and logging.
    pub fn discovered_ids(&self) -> Vec<&str> {
        self.discovered.iter().map(|r| r.id.as_str()).collect()
    }

    /// Identifiers of the connected list.
    pub fn connected_ids(&self) -> Vec<&str> {
        self.connected.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Derive both lists from records already sorted by `last_seen_order`.
pub fn project<'a, I>(records: I) -> DeviceLists
where
    I: IntoIterator<Item = &'a PeripheralRecord>,
{
    let mut lists = DeviceLists::default();

    for record in records {
        if record.connection_state.is_connected() {
            lists.connected.push(record.clone());
        }
        lists.discovered.push(record.clone());
    }

    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::{ConnectionState, PeripheralId};
    use pretty_assertions::assert_eq;

    fn record(id: &str, order: u64, state: ConnectionState) -> PeripheralRecord {
        let mut record = PeripheralRecord::new(PeripheralId::from(id), order);
        record.connection_state = state;
        record
    }

    #[test]
    fn test_project_empty() {
        let lists = project(&Vec::<PeripheralRecord>::new());
        assert!(lists.discovered.is_empty());
        assert!(lists.connected.is_empty());
    }

    #[test]
    fn test_project_splits_by_state() {
        let records = vec![
            record("A", 0, ConnectionState::NotificationsActive),
            record("B", 1, ConnectionState::Discovered),
            record("C", 2, ConnectionState::Bonding),
            record("D", 3, ConnectionState::Error),
            record("E", 4, ConnectionState::ServicesResolving),
            record("F", 5, ConnectionState::Disconnected),
        ];

        let lists = project(&records);
        assert_eq!(lists.discovered_ids(), vec!["A", "B", "C", "D", "E", "F"]);
        assert_eq!(lists.connected_ids(), vec!["A", "C", "E"]);
    }
}
