//! BLE UUIDs for HID-over-GATT peripherals.
//!
//! Bluetooth SIG 16-bit UUIDs expanded onto the base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

// Human Interface Device Service
/// HID Service UUID (0x1812).
pub const HID_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1812_0000_1000_8000_00805f9b34fb);
/// HID Report characteristic UUID (0x2A4D, Read, Notify).
pub const HID_REPORT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a4d_0000_1000_8000_00805f9b34fb);
/// HID Information characteristic UUID (0x2A4A).
pub const HID_INFORMATION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a4a_0000_1000_8000_00805f9b34fb);

// Battery Service
/// Battery Service UUID (0x180F).
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (0x2A19).
pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// Name fragment advertised by MOCUTE controllers.
pub const MOCUTE_NAME_FILTER: &str = "MOCUTE";

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit Bluetooth SIG UUID onto the base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// A GATT service/characteristic pair addressed for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattTarget {
    /// Service that owns the characteristic.
    pub service: Uuid,
    /// Characteristic to subscribe to.
    pub characteristic: Uuid,
}

impl GattTarget {
    /// Create a new target.
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// The HID Report characteristic of the HID service.
    pub const fn hid_report() -> Self {
        Self::new(HID_SERVICE_UUID, HID_REPORT_CHARACTERISTIC_UUID)
    }
}

impl Default for GattTarget {
    fn default() -> Self {
        Self::hid_report()
    }
}

impl std::fmt::Display for GattTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            HID_SERVICE_UUID.to_string(),
            "00001812-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HID_REPORT_CHARACTERISTIC_UUID.to_string(),
            "00002a4d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uuid_from_u16() {
        assert_eq!(uuid_from_u16(0x1812), HID_SERVICE_UUID);
        assert_eq!(uuid_from_u16(0x2a19), BATTERY_LEVEL_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_default_target_is_hid_report() {
        let target = GattTarget::default();
        assert_eq!(target.service, HID_SERVICE_UUID);
        assert_eq!(target.characteristic, HID_REPORT_CHARACTERISTIC_UUID);
    }
}
