//! Stream Readiness Gate.
//!
//! Per device: `Unknown -> Checking -> {Ready | Unknown}`. At most one probe is
//! outstanding per device, `Ready` is terminal until the session ends or the
//! device disconnects. Every probe carries a [`ProbeTicket`]; a result whose
//! ticket no longer matches is dropped.

use std::collections::HashMap;

use fleetdeck_core::{DeviceAddress, StreamReadiness};

use crate::fleet::FleetReconciler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTicket {
    pub address: DeviceAddress,
    pub generation: u64,
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct ReadinessGate {
    active: bool,
    generation: u64,
    next_seq: u64,
    in_flight: HashMap<DeviceAddress, u64>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, address: &DeviceAddress) -> bool {
        self.in_flight.contains_key(address)
    }

    pub fn begin_session(&mut self, fleet: &mut FleetReconciler, targets: &[DeviceAddress]) {
        self.active = true;
        self.generation += 1;
        self.in_flight.clear();
        for addr in targets {
            set_readiness(fleet, addr, StreamReadiness::Unknown);
        }
        log::debug!("readiness gate generation {} started", self.generation);
    }

    /// Invalidates every outstanding probe and resets all devices to `Unknown`.
    pub fn end_session(&mut self, fleet: &mut FleetReconciler) {
        if !self.active {
            return;
        }
        self.active = false;
        self.generation += 1;
        self.in_flight.clear();
        for addr in fleet.addresses() {
            set_readiness(fleet, &addr, StreamReadiness::Unknown);
        }
        log::debug!("readiness gate ended; generation now {}", self.generation);
    }

    /// Forgets any outstanding probe for a device that just dropped off, so
    /// a reconnect starts a fresh cycle.
    pub fn on_disconnected(&mut self, fleet: &mut FleetReconciler, address: &DeviceAddress) {
        self.in_flight.remove(address);
        let next = if self.active {
            StreamReadiness::Unreachable
        } else {
            StreamReadiness::Unknown
        };
        set_readiness(fleet, address, next);
    }

    /// Marks every due target `Checking` and returns one ticket per new probe.
    ///
    /// Due means connected, `Unknown`, and not already in flight. Disconnected
    /// targets are shown as `Unreachable`; they come back as `Unknown` once
    /// they reconnect.
    pub fn collect_due(&mut self, fleet: &mut FleetReconciler, targets: &[DeviceAddress]) -> Vec<ProbeTicket> {
        if !self.active {
            return Vec::new();
        }

        let mut tickets = Vec::new();
        for addr in targets {
            let Some(rec) = fleet.get(addr) else {
                continue;
            };
            let (connected, readiness) = (rec.is_connected(), rec.readiness);

            if !connected {
                self.in_flight.remove(addr);
                set_readiness(fleet, addr, StreamReadiness::Unreachable);
                continue;
            }
            if readiness == StreamReadiness::Unreachable {
                set_readiness(fleet, addr, StreamReadiness::Unknown);
            } else if readiness != StreamReadiness::Unknown {
                continue;
            }
            if self.in_flight.contains_key(addr) {
                continue;
            }

            self.next_seq += 1;
            self.in_flight.insert(addr.clone(), self.next_seq);
            set_readiness(fleet, addr, StreamReadiness::Checking);
            tickets.push(ProbeTicket {
                address: addr.clone(),
                generation: self.generation,
                seq: self.next_seq,
            });
        }
        tickets
    }

    /// Applies a probe outcome. Any error resolves to `Unknown` so the next
    /// probe tick retries. Returns whether the result was applied.
    pub fn on_result(
        &mut self,
        ticket: &ProbeTicket,
        result: anyhow::Result<bool>,
        fleet: &mut FleetReconciler,
    ) -> bool {
        if ticket.generation != self.generation
            || self.in_flight.get(&ticket.address) != Some(&ticket.seq)
        {
            log::debug!(
                "stale readiness result for {} (gen {}, seq {}) dropped",
                ticket.address,
                ticket.generation,
                ticket.seq
            );
            return false;
        }
        self.in_flight.remove(&ticket.address);

        let next = match result {
            Ok(true) => {
                log::info!("stream ready: {}", ticket.address);
                StreamReadiness::Ready
            }
            Ok(false) => StreamReadiness::Unknown,
            Err(e) => {
                log::warn!("readiness probe for {} failed: {e:#}", ticket.address);
                StreamReadiness::Unknown
            }
        };
        set_readiness(fleet, &ticket.address, next);
        true
    }
}

fn set_readiness(fleet: &mut FleetReconciler, address: &DeviceAddress, next: StreamReadiness) {
    let current = fleet.get(address).map(|r| r.readiness);
    if current.is_some_and(|c| c != next) {
        if let Some(rec) = fleet.record_mut(address) {
            rec.readiness = next;
        }
    }
}
