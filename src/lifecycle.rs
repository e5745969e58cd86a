//! Connection lifecycle state machine.
//!
//! Drives each peripheral through bond → resolve services → arm
//! notifications. The machine never talks to the adapter itself: every
//! transition returns a [`Step`] naming the adapter call to issue next, and
//! the call's outcome comes back later as a [`Completion`]. Subscription
//! requests are only produced from a successful service-discovery
//! completion, so notifications can never be armed before services resolve.
//!
//! Each `connect` opens a new attempt. Completions carry the attempt they
//! belong to and are dropped when the peripheral has moved on (disconnected,
//! or reconnected since). A bond requested while the peripheral's unbond is
//! still outstanding is held back until the unbond completes, so calls for one
//! peripheral reach the adapter in order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::ble::adapter::{contains_target, ServiceDescriptor};
use crate::ble::uuids::GattTarget;
use crate::error::{Error, Result};
use crate::notice::{Notice, NoticeKind};
use crate::peripheral::{ConnectionState, PeripheralId};
use crate::registry::PeripheralRegistry;

/// Identifies one connect cycle of one peripheral.
pub type AttemptId = u64;

/// An adapter call the state machine wants issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRequest {
    /// Bond with the peripheral.
    Bond {
        /// Peripheral to bond.
        id: PeripheralId,
        /// Attempt the call belongs to.
        attempt: AttemptId,
    },
    /// Run service discovery.
    ResolveServices {
        /// Peripheral to inspect.
        id: PeripheralId,
        /// Attempt the call belongs to.
        attempt: AttemptId,
    },
    /// Enable notifications on the target characteristic.
    Subscribe {
        /// Peripheral to subscribe on.
        id: PeripheralId,
        /// Attempt the call belongs to.
        attempt: AttemptId,
        /// Service/characteristic pair.
        target: GattTarget,
    },
    /// Remove the bond.
    Unbond {
        /// Peripheral to unbond.
        id: PeripheralId,
    },
}

impl AdapterRequest {
    /// Peripheral the request addresses.
    pub fn peripheral(&self) -> &PeripheralId {
        match self {
            Self::Bond { id, .. }
            | Self::ResolveServices { id, .. }
            | Self::Subscribe { id, .. }
            | Self::Unbond { id } => id,
        }
    }
}

/// Outcome of an adapter call, fed back into the state machine.
#[derive(Debug)]
pub enum Completion {
    /// Bond call finished.
    Bonded {
        /// Peripheral concerned.
        id: PeripheralId,
        /// Attempt the call belonged to.
        attempt: AttemptId,
        /// Adapter result.
        result: Result<()>,
    },
    /// Service discovery finished.
    ServicesResolved {
        /// Peripheral concerned.
        id: PeripheralId,
        /// Attempt the call belonged to.
        attempt: AttemptId,
        /// Adapter result.
        result: Result<Vec<ServiceDescriptor>>,
    },
    /// Notification subscription finished.
    Subscribed {
        /// Peripheral concerned.
        id: PeripheralId,
        /// Attempt the call belonged to.
        attempt: AttemptId,
        /// Adapter result.
        result: Result<()>,
    },
    /// Unbond finished.
    Unbonded {
        /// Peripheral concerned.
        id: PeripheralId,
        /// Adapter result.
        result: Result<()>,
    },
}

/// What a transition asks of its caller.
#[derive(Debug, Default)]
pub struct Step {
    /// Adapter call to issue.
    pub request: Option<AdapterRequest>,
    /// Notice to surface.
    pub notice: Option<Notice>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }

    fn request(request: AdapterRequest) -> Self {
        Self {
            request: Some(request),
            notice: None,
        }
    }

    fn notice(notice: Notice) -> Self {
        Self {
            request: None,
            notice: Some(notice),
        }
    }
}

/// The per-peripheral connection state machine.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    target: GattTarget,
    attempts: HashMap<PeripheralId, AttemptId>,
    next_attempt: AttemptId,
    /// Peripherals with an unbond in flight.
    unbonding: HashSet<PeripheralId>,
}

impl ConnectionLifecycle {
    /// Create a state machine that arms notifications on `target`.
    pub fn new(target: GattTarget) -> Self {
        Self {
            target,
            attempts: HashMap::new(),
            next_attempt: 0,
            unbonding: HashSet::new(),
        }
    }

    /// The service/characteristic pair notifications are armed on.
    pub fn target(&self) -> GattTarget {
        self.target
    }

    /// Start bonding with a peripheral.
    ///
    /// A no-op unless the peripheral is `Discovered`, `Disconnected` or `Error`.
    ///
    /// # Errors
    ///
    /// [`Error::PeripheralNotFound`] if the registry has no such peripheral.
    pub fn connect(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: &PeripheralId,
    ) -> Result<Step> {
        let record = registry.get(id).ok_or_else(|| Error::PeripheralNotFound {
            identifier: id.to_string(),
        })?;

        if !record.connection_state.can_connect() {
            debug!(
                "Ignoring connect for {}, already {}",
                id, record.connection_state
            );
            return Ok(Step::none());
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.attempts.insert(id.clone(), attempt);

        info!("Bonding with {}", record.display_name());

        registry.upsert(id, |r| {
            r.connection_state = ConnectionState::Bonding;
            r.services_resolved = false;
        });

        if self.unbonding.contains(id) {
            debug!("Deferring bond with {} until its unbond completes", id);
            return Ok(Step::none());
        }

        Ok(Step::request(AdapterRequest::Bond {
            id: id.clone(),
            attempt,
        }))
    }

    /// Tear down a peripheral's link and remove its bond.
    ///
    /// Outstanding calls of the current attempt are abandoned: their
    /// completions will be ignored.
    ///
    /// # Errors
    ///
    /// [`Error::PeripheralNotFound`] if the registry has no such peripheral.
    pub fn disconnect(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: &PeripheralId,
    ) -> Result<Step> {
        let record = registry.get(id).ok_or_else(|| Error::PeripheralNotFound {
            identifier: id.to_string(),
        })?;

        let bonded = match record.connection_state {
            ConnectionState::Bonding
            | ConnectionState::ServicesResolving
            | ConnectionState::NotificationsActive
            | ConnectionState::Error => true,
            ConnectionState::Disconnected => record.previously_bonded,
            ConnectionState::Discovered => false,
        };

        if !bonded {
            debug!(
                "Ignoring disconnect for {}, nothing to tear down ({})",
                id, record.connection_state
            );
            return Ok(Step::none());
        }

        self.attempts.remove(id);

        info!("Disconnecting {}", record.display_name());

        registry.upsert(id, |r| {
            r.connection_state = ConnectionState::Disconnected;
            r.services_resolved = false;
        });

        if !self.unbonding.insert(id.clone()) {
            debug!("Unbond already pending for {}", id);
            return Ok(Step::none());
        }

        Ok(Step::request(AdapterRequest::Unbond { id: id.clone() }))
    }

    /// The adapter reported the link to a peripheral dropped.
    ///
    /// Only a bonded peripheral (`ServicesResolving` or `NotificationsActive`)
    /// is moved to `Disconnected`. While `Bonding`, the outstanding bond call
    /// reports the outcome.
    pub fn on_link_lost(&mut self, registry: &mut PeripheralRegistry, id: &PeripheralId) {
        let Some(record) = registry.get(id) else {
            return;
        };

        match record.connection_state {
            ConnectionState::ServicesResolving | ConnectionState::NotificationsActive => {}
            ConnectionState::Bonding => {
                debug!("Link to {} dropped while bonding, awaiting bond result", id);
                return;
            }
            _ => return,
        }

        warn!(
            "Link to {} lost while {}",
            record.display_name(),
            record.connection_state
        );

        self.attempts.remove(id);

        registry.upsert(id, |r| {
            r.connection_state = ConnectionState::Disconnected;
            r.services_resolved = false;
            // The OS still holds the bond.
            r.previously_bonded = true;
        });
    }

    /// Whether a value pushed by `id` should be delivered.
    pub fn accepts_notification(
        &self,
        registry: &PeripheralRegistry,
        id: &PeripheralId,
    ) -> bool {
        registry
            .get(id)
            .map(|r| r.connection_state == ConnectionState::NotificationsActive)
            .unwrap_or(false)
    }

    /// Feed an adapter call outcome back into the machine.
    pub fn on_completion(
        &mut self,
        registry: &mut PeripheralRegistry,
        completion: Completion,
    ) -> Step {
        match completion {
            Completion::Bonded {
                id,
                attempt,
                result,
            } => {
                if !self.is_current(registry, &id, attempt, ConnectionState::Bonding) {
                    return Step::none();
                }
                self.on_bonded(registry, id, attempt, result)
            }
            Completion::ServicesResolved {
                id,
                attempt,
                result,
            } => {
                if !self.is_current(registry, &id, attempt, ConnectionState::ServicesResolving) {
                    return Step::none();
                }
                self.on_services_resolved(registry, id, attempt, result)
            }
            Completion::Subscribed {
                id,
                attempt,
                result,
            } => {
                let expected = ConnectionState::NotificationsActive;
                if !self.is_current(registry, &id, attempt, expected) {
                    return Step::none();
                }
                self.on_subscribed(registry, id, result)
            }
            Completion::Unbonded { id, result } => self.on_unbonded(registry, id, result),
        }
    }

    fn on_bonded(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: PeripheralId,
        attempt: AttemptId,
        result: Result<()>,
    ) -> Step {
        match result {
            Ok(()) => {
                info!("Peripheral {} paired successfully", id);
                registry.upsert(&id, |r| r.connection_state = ConnectionState::ServicesResolving);
                Step::request(AdapterRequest::ResolveServices { id, attempt })
            }
            Err(e) => {
                let error = Error::BondFailure {
                    identifier: id.to_string(),
                    reason: e.reason(),
                };
                self.fail(registry, id, NoticeKind::BondFailure, error)
            }
        }
    }

    fn on_services_resolved(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: PeripheralId,
        attempt: AttemptId,
        result: Result<Vec<ServiceDescriptor>>,
    ) -> Step {
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                let error = Error::ServiceResolutionFailure {
                    identifier: id.to_string(),
                    reason: e.reason(),
                };
                return self.fail(registry, id, NoticeKind::ServiceResolutionFailure, error);
            }
        };

        debug!("Resolved {} services on {}", services.len(), id);

        if !contains_target(&services, &self.target) {
            registry.upsert(&id, |r| r.services_resolved = true);
            let error = Error::InvalidTarget {
                identifier: id.to_string(),
                service: self.target.service.to_string(),
                characteristic: self.target.characteristic.to_string(),
            };
            return self.fail(registry, id, NoticeKind::InvalidTarget, error);
        }

        registry.upsert(&id, |r| {
            r.services_resolved = true;
            r.connection_state = ConnectionState::NotificationsActive;
        });

        Step::request(AdapterRequest::Subscribe {
            id,
            attempt,
            target: self.target,
        })
    }

    fn on_subscribed(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: PeripheralId,
        result: Result<()>,
    ) -> Step {
        match result {
            Ok(()) => {
                info!("Started notification on {} ({})", id, self.target);
                Step::none()
            }
            Err(e) => {
                let error = Error::NotificationFailure {
                    identifier: id.to_string(),
                    reason: e.reason(),
                };
                self.fail(registry, id, NoticeKind::NotificationFailure, error)
            }
        }
    }

    fn on_unbonded(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: PeripheralId,
        result: Result<()>,
    ) -> Step {
        self.unbonding.remove(&id);

        // Reconnected while the unbond was in flight: issue the held-back bond.
        let reconnect = self.attempts.get(&id).copied().filter(|_| {
            registry
                .get(&id)
                .map(|r| r.connection_state == ConnectionState::Bonding)
                .unwrap_or(false)
        });
        if let Some(attempt) = reconnect {
            let notice = match result {
                Ok(()) => {
                    debug!("Unbond of {} done, resuming bond", id);
                    None
                }
                Err(e) => {
                    let error = Error::UnbondFailure {
                        identifier: id.to_string(),
                        reason: e.reason(),
                    };
                    warn!("{}", error);
                    registry.upsert(&id, |r| r.previously_bonded = true);
                    Some(Notice::failure(NoticeKind::UnbondFailure, Some(id.clone()), &error))
                }
            };
            return Step {
                request: Some(AdapterRequest::Bond { id, attempt }),
                notice,
            };
        }

        match result {
            Ok(()) => {
                let record = registry.upsert(&id, |r| r.previously_bonded = false);
                info!("Removed bond with {}", record.display_name());
                let notice = Notice::disconnected(id.clone(), record.display_name());
                Step::notice(notice)
            }
            Err(e) => {
                let error = Error::UnbondFailure {
                    identifier: id.to_string(),
                    reason: e.reason(),
                };
                warn!("{}", error);
                registry.upsert(&id, |r| r.previously_bonded = true);
                Step::notice(Notice::failure(NoticeKind::UnbondFailure, Some(id), &error))
            }
        }
    }

    /// Move a peripheral to `Error` and produce its notice.
    fn fail(
        &mut self,
        registry: &mut PeripheralRegistry,
        id: PeripheralId,
        kind: NoticeKind,
        error: Error,
    ) -> Step {
        warn!("{}", error);
        self.attempts.remove(&id);
        registry.upsert(&id, |r| r.connection_state = ConnectionState::Error);
        Step::notice(Notice::failure(kind, Some(id), &error))
    }

    fn is_current(
        &self,
        registry: &PeripheralRegistry,
        id: &PeripheralId,
        attempt: AttemptId,
        expected: ConnectionState,
    ) -> bool {
        let current = self.attempts.get(id) == Some(&attempt)
            && registry
                .get(id)
                .map(|r| r.connection_state == expected)
                .unwrap_or(false);

        if !current {
            debug!(
                "Dropping stale completion for {} (attempt {}, expected {})",
                id, attempt, expected
            );
        }

        current
    }
}
