//! BLE module.
//!
//! The [`BleAdapter`] trait is the seam between the state machines and the
//! radio. [`BtleplugAdapter`] implements it on the system Bluetooth stack.

pub mod adapter;
pub mod btleplug_adapter;
pub mod uuids;

pub use adapter::{
    AdapterEvent, BleAdapter, CharacteristicDescriptor, DiscoveredPeripheral, ScanRequest,
    ServiceDescriptor,
};
pub use btleplug_adapter::BtleplugAdapter;
pub use uuids::*;
