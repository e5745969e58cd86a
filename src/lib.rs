// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-hid-link
//!
//! Peripheral registry and connection state machine for BLE HID
//! controllers such as MOCUTE gamepads.
//!
//! The library discovers nearby controllers, keeps one record per
//! peripheral, and drives each one through bonding, service resolution and
//! notification setup. Every user request is fire-and-forget: progress is
//! observed through the device lists, failures arrive as [`Notice`]s.
//!
//! ## Features
//!
//! - **Filtered Discovery**: Admit only peripherals whose advertised name matches
//! - **Connection Lifecycle**: `Discovered → Bonding → ServicesResolving → NotificationsActive`
//! - **Failure Surfacing**: Each failed step raises exactly one notice
//! - **Live Views**: Discovered and connected lists on a watch channel
//! - **Input Reports**: HID report notifications forwarded as raw bytes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_hid_link::{DeviceManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::new().await?;
//!     manager.request_scan().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     for device in manager.discovered_devices() {
//!         println!("Found {} ({})", device.display_name(), device.id);
//!         manager.request_connect(&device.id)?;
//!     }
//!
//!     let mut notices = manager.subscribe_notices();
//!     while let Ok(notice) = notices.recv().await {
//!         println!("{}", notice);
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod config;
pub mod device_manager;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod notice;
pub mod peripheral;
pub mod registry;
pub mod view;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::ManagerConfig;
pub use device_manager::{DeviceManager, NotificationEvent};
pub use discovery::DiscoveryFilter;
pub use error::{Error, Result};
pub use notice::{Notice, NoticeKind};
pub use peripheral::{ConnectionState, PeripheralId, PeripheralRecord};
pub use view::DeviceLists;

// Re-export commonly used types from submodules
pub use ble::adapter::{AdapterEvent, BleAdapter, DiscoveredPeripheral};
pub use ble::uuids::GattTarget;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<DeviceManager>();
        let _ = std::any::TypeId::of::<PeripheralRecord>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Notice>();
        let _ = std::any::TypeId::of::<DeviceLists>();
        let _ = std::any::TypeId::of::<ManagerConfig>();
    }

    #[test]
    fn test_default_target_is_hid_report() {
        let config = ManagerConfig::default();
        assert_eq!(config.target, GattTarget::hid_report());
        assert_eq!(ConnectionState::default(), ConnectionState::Discovered);
    }
}
