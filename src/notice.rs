//! User-visible notices.
//!
//! Adapter failures never bubble out of the dispatcher as errors; they move
//! the affected peripheral to `Error` and are surfaced exactly once as a
//! [`Notice`] for the UI layer to show.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::peripheral::PeripheralId;

/// What a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoticeKind {
    /// The adapter refused to start a scan.
    ScanFailure,
    /// Bonding failed.
    BondFailure,
    /// Service discovery failed.
    ServiceResolutionFailure,
    /// The configured service/characteristic is missing on the peripheral.
    InvalidTarget,
    /// Notification subscription failed.
    NotificationFailure,
    /// Removing a bond failed.
    UnbondFailure,
    /// A bond was removed.
    Disconnected,
}

impl NoticeKind {
    /// Whether this notice reports a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Notice {
    /// Notice category.
    pub kind: NoticeKind,
    /// Peripheral concerned, if any.
    pub peripheral: Option<PeripheralId>,
    /// Text to display.
    pub message: String,
    /// When the notice was raised.
    pub at: DateTime<Utc>,
}

impl Notice {
    /// Build a failure notice from an error.
    pub fn failure(kind: NoticeKind, peripheral: Option<PeripheralId>, error: &Error) -> Self {
        Self {
            kind,
            peripheral,
            message: error.to_string(),
            at: Utc::now(),
        }
    }

    /// Notice that the bond with `name` was removed.
    pub fn disconnected(peripheral: PeripheralId, name: &str) -> Self {
        Self {
            kind: NoticeKind::Disconnected,
            peripheral: Some(peripheral),
            message: format!("Disconnected from {}", name),
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
