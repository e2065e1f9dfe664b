use std::collections::BTreeSet;

use fleetdeck_core::protocol::{EVENT_START_GOPROS, EVENT_STOP_GOPROS, RecordAck, targets_payload};
use fleetdeck_core::{DeviceAddress, DeviceRecordingState};
use thiserror::Error;

use crate::fleet::FleetReconciler;
use crate::session::{RecordingSession, SessionState};
use crate::traits::EventChannel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no devices selected")]
    NoTargets,

    #[error("cannot {op} while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    #[error("coordinator channel unavailable: {0}")]
    Channel(String),
}

/// Recording Session Controller.
///
/// `Idle -> Starting -> Recording -> Stopping -> Idle`. Acknowledgements are
/// correlated by address against the frozen target set; the first ack per
/// device per phase wins.
#[derive(Debug, Default)]
pub struct RecordingController {
    state: SessionState,
    session: Option<RecordingSession>,
    generation: u64,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn targets(&self) -> Vec<DeviceAddress> {
        self.session
            .as_ref()
            .map(|s| s.targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_target(&self, address: &DeviceAddress) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.targets.contains(address))
    }

    /// Freezes `targets` and asks the coordinator to start them.
    pub fn start(
        &mut self,
        targets: BTreeSet<DeviceAddress>,
        channel: &dyn EventChannel,
    ) -> Result<u64, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                op: "start",
                state: self.state.label(),
            });
        }
        if targets.is_empty() {
            return Err(SessionError::NoTargets);
        }

        let list: Vec<DeviceAddress> = targets.iter().cloned().collect();
        channel
            .emit(EVENT_START_GOPROS, targets_payload(&list))
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        self.generation += 1;
        self.session = Some(RecordingSession::new(self.generation, targets));
        self.state = SessionState::Starting;
        log::info!(
            "recording session {} starting for {} device(s)",
            self.generation,
            list.len()
        );
        Ok(self.generation)
    }

    /// Valid from `Recording`, or from `Starting` to cancel early. A failed
    /// emit is a hard channel failure and aborts straight to `Idle`.
    pub fn stop(
        &mut self,
        channel: &dyn EventChannel,
        fleet: &mut FleetReconciler,
    ) -> Result<(), SessionError> {
        if !self.state.is_streaming() {
            return Err(SessionError::InvalidState {
                op: "stop",
                state: self.state.label(),
            });
        }

        let targets = self.targets();
        if let Err(e) = channel.emit(EVENT_STOP_GOPROS, targets_payload(&targets)) {
            log::warn!("stop command could not be sent; aborting session: {e}");
            self.force_idle(fleet);
            return Err(SessionError::Channel(e.to_string()));
        }

        if let Some(s) = self.session.as_mut() {
            s.acks.clear();
        }
        self.state = SessionState::Stopping;
        log::info!("recording session {} stopping", self.generation);
        Ok(())
    }

    /// Applies one acknowledgement batch. Returns the new session state when
    /// the batch caused a transition.
    pub fn on_acks(&mut self, acks: &[RecordAck], fleet: &mut FleetReconciler) -> Option<SessionState> {
        let phase = self.state;
        let Some(session) = self.session.as_mut() else {
            log::debug!("dropping {} acknowledgement(s) outside a session", acks.len());
            return None;
        };
        if !matches!(phase, SessionState::Starting | SessionState::Stopping) {
            log::debug!("dropping late acknowledgement(s) while {}", phase.label());
            return None;
        }

        for ack in acks {
            if !session.targets.contains(&ack.address) {
                log::debug!("acknowledgement from non-target {} ignored", ack.address);
                continue;
            }
            if session.acks.contains_key(&ack.address) {
                log::debug!("duplicate acknowledgement from {} ignored", ack.address);
                continue;
            }
            let ok = ack.is_success();
            session.acks.insert(ack.address.clone(), ok);

            let Some(rec) = fleet.record_mut(&ack.address) else {
                continue;
            };
            match (phase, ok) {
                // Success during start stays pending until the whole fleet answered.
                (SessionState::Starting, true) => {}
                (SessionState::Starting, false) => {
                    log::warn!("{} failed to start (code {})", ack.address, ack.response_code);
                    rec.recording = DeviceRecordingState::Error;
                }
                (_, true) => rec.recording = DeviceRecordingState::Idle,
                (_, false) => {
                    log::warn!("{} failed to stop (code {})", ack.address, ack.response_code);
                    rec.recording = DeviceRecordingState::Error;
                }
            }
        }

        if !session.all_acknowledged() {
            return None;
        }

        match phase {
            SessionState::Starting => {
                let started: Vec<DeviceAddress> = session
                    .acks
                    .iter()
                    .filter(|(_, ok)| **ok)
                    .map(|(a, _)| a.clone())
                    .collect();
                for addr in &started {
                    if let Some(rec) = fleet.record_mut(addr) {
                        rec.recording = DeviceRecordingState::Recording;
                    }
                }
                session.acks.clear();
                self.state = SessionState::Recording;
                log::info!(
                    "recording session {} recording ({}/{} started)",
                    self.generation,
                    started.len(),
                    session.targets.len()
                );
            }
            _ => {
                self.session = None;
                self.state = SessionState::Idle;
                clear_stale_recording(fleet);
                log::info!("recording session {} stopped", self.generation);
            }
        }
        Some(self.state)
    }

    /// Hard channel failure. `Starting` and `Stopping` drop straight to `Idle`
    /// with no partial commit. Returns whether the session was aborted.
    pub fn abort(&mut self, fleet: &mut FleetReconciler) -> bool {
        if !matches!(self.state, SessionState::Starting | SessionState::Stopping) {
            return false;
        }
        log::warn!(
            "recording session {} aborted while {}",
            self.generation,
            self.state.label()
        );
        self.force_idle(fleet);
        true
    }

    fn force_idle(&mut self, fleet: &mut FleetReconciler) {
        self.session = None;
        self.state = SessionState::Idle;
        clear_stale_recording(fleet);
    }
}

/// No device may stay `Recording` once the session is `Idle`, targets or not.
fn clear_stale_recording(fleet: &mut FleetReconciler) {
    let cleared = fleet.clear_recording();
    if !cleared.is_empty() {
        log::debug!("cleared recording flag on {} device(s) after session end", cleared.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use fleetdeck_core::Connectivity;
    use fleetdeck_core::protocol::StatusUpdate;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryChannel {
        sent: Mutex<Vec<(String, Value)>>,
        broken: bool,
    }

    impl EventChannel for MemoryChannel {
        fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()> {
            if self.broken {
                return Err(anyhow!("closed"));
            }
            self.sent.lock().unwrap().push((event.to_string(), payload));
            Ok(())
        }
    }

    fn fleet_with(addrs: &[&str]) -> FleetReconciler {
        let mut fleet = FleetReconciler::new();
        fleet.apply_status(
            addrs
                .iter()
                .map(|a| StatusUpdate {
                    address: DeviceAddress::new(*a),
                    connectivity: Some(Connectivity::Connected),
                    recording: Some(DeviceRecordingState::Idle),
                    stream: None,
                })
                .collect(),
            false,
        );
        fleet
    }

    fn set(addrs: &[&str]) -> BTreeSet<DeviceAddress> {
        addrs.iter().map(|a| DeviceAddress::new(*a)).collect()
    }

    fn ack(addr: &str, code: i64) -> RecordAck {
        RecordAck {
            address: DeviceAddress::new(addr),
            response_code: code,
        }
    }

    fn recording_of(fleet: &FleetReconciler, addr: &str) -> DeviceRecordingState {
        fleet.get(&DeviceAddress::new(addr)).unwrap().recording
    }

    #[test]
    fn partial_failure_still_reaches_recording_in_any_order() {
        for order in [["A", "B"], ["B", "A"]] {
            let mut fleet = fleet_with(&["A", "B"]);
            let ch = MemoryChannel::default();
            let mut ctl = RecordingController::new();
            ctl.start(set(&["A", "B"]), &ch).unwrap();

            for addr in order {
                let code = if addr == "A" { 200 } else { 500 };
                ctl.on_acks(&[ack(addr, code)], &mut fleet);
            }

            assert_eq!(ctl.state(), SessionState::Recording);
            assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Recording);
            assert_eq!(recording_of(&fleet, "B"), DeviceRecordingState::Error);
        }
    }

    #[test]
    fn success_stays_pending_until_every_target_answers() {
        let mut fleet = fleet_with(&["A", "B"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A", "B"]), &ch).unwrap();

        assert_eq!(ctl.on_acks(&[ack("A", 200)], &mut fleet), None);
        assert_eq!(ctl.state(), SessionState::Starting);
        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Idle);
    }

    #[test]
    fn start_emits_frozen_targets() {
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["10.0.0.2", "10.0.0.1"]), &ch).unwrap();

        let sent = ch.sent.lock().unwrap();
        assert_eq!(sent[0].0, "start_gopros");
        assert_eq!(sent[0].1["addresses"], serde_json::json!(["10.0.0.1", "10.0.0.2"]));
        assert_eq!(ctl.targets().len(), 2);
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut fleet = fleet_with(&["A"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();

        assert_eq!(ctl.start(BTreeSet::new(), &ch), Err(SessionError::NoTargets));
        assert!(matches!(
            ctl.stop(&ch, &mut fleet),
            Err(SessionError::InvalidState { op: "stop", .. })
        ));

        ctl.start(set(&["A"]), &ch).unwrap();
        assert!(matches!(
            ctl.start(set(&["A"]), &ch),
            Err(SessionError::InvalidState { op: "start", .. })
        ));
    }

    #[test]
    fn failed_start_emit_stays_idle() {
        let ch = MemoryChannel {
            broken: true,
            ..Default::default()
        };
        let mut ctl = RecordingController::new();
        assert!(matches!(ctl.start(set(&["A"]), &ch), Err(SessionError::Channel(_))));
        assert_eq!(ctl.state(), SessionState::Idle);
        assert!(ctl.session().is_none());
    }

    #[test]
    fn stop_cycle_returns_to_idle() {
        let mut fleet = fleet_with(&["A", "B"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A", "B"]), &ch).unwrap();
        ctl.on_acks(&[ack("A", 200), ack("B", 200)], &mut fleet);
        assert_eq!(ctl.state(), SessionState::Recording);

        ctl.stop(&ch, &mut fleet).unwrap();
        assert_eq!(ctl.state(), SessionState::Stopping);
        assert_eq!(ch.sent.lock().unwrap()[1].0, "stop_gopros");

        ctl.on_acks(&[ack("B", 500)], &mut fleet);
        assert_eq!(ctl.state(), SessionState::Stopping);
        assert_eq!(ctl.on_acks(&[ack("A", 200)], &mut fleet), Some(SessionState::Idle));

        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Idle);
        assert_eq!(recording_of(&fleet, "B"), DeviceRecordingState::Error);
        assert!(ctl.targets().is_empty());
    }

    #[test]
    fn session_end_clears_recording_on_bystanders() {
        let mut fleet = fleet_with(&["A", "B"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A"]), &ch).unwrap();
        ctl.on_acks(&[ack("A", 200)], &mut fleet);

        // B is not a target but reports recording mid-session.
        fleet.apply_status(
            vec![StatusUpdate {
                address: DeviceAddress::new("B"),
                connectivity: None,
                recording: Some(DeviceRecordingState::Recording),
                stream: None,
            }],
            true,
        );
        assert_eq!(recording_of(&fleet, "B"), DeviceRecordingState::Recording);

        ctl.stop(&ch, &mut fleet).unwrap();
        assert_eq!(ctl.on_acks(&[ack("A", 200)], &mut fleet), Some(SessionState::Idle));
        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Idle);
        assert_eq!(recording_of(&fleet, "B"), DeviceRecordingState::Idle);
    }

    #[test]
    fn abort_clears_recording_on_bystanders() {
        let mut fleet = fleet_with(&["A", "B"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A"]), &ch).unwrap();
        fleet.record_mut(&DeviceAddress::new("B")).unwrap().recording = DeviceRecordingState::Recording;

        assert!(ctl.abort(&mut fleet));
        assert_eq!(recording_of(&fleet, "B"), DeviceRecordingState::Idle);
    }

    #[test]
    fn first_ack_wins_and_strangers_are_ignored() {
        let mut fleet = fleet_with(&["A", "B", "C"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A", "B"]), &ch).unwrap();

        ctl.on_acks(&[ack("A", 500), ack("A", 200), ack("C", 200)], &mut fleet);
        assert_eq!(ctl.state(), SessionState::Starting);
        ctl.on_acks(&[ack("B", 200)], &mut fleet);

        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Error);
        assert_eq!(recording_of(&fleet, "C"), DeviceRecordingState::Idle);
    }

    #[test]
    fn channel_loss_while_starting_aborts() {
        let mut fleet = fleet_with(&["A"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A"]), &ch).unwrap();
        fleet.record_mut(&DeviceAddress::new("A")).unwrap().recording = DeviceRecordingState::Recording;

        assert!(ctl.abort(&mut fleet));
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Idle);
        assert!(!ctl.abort(&mut fleet));
    }

    #[test]
    fn failed_stop_emit_aborts_to_idle() {
        let mut fleet = fleet_with(&["A"]);
        let ok = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        ctl.start(set(&["A"]), &ok).unwrap();
        ctl.on_acks(&[ack("A", 200)], &mut fleet);

        let broken = MemoryChannel {
            broken: true,
            ..Default::default()
        };
        assert!(matches!(ctl.stop(&broken, &mut fleet), Err(SessionError::Channel(_))));
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(recording_of(&fleet, "A"), DeviceRecordingState::Idle);
    }

    #[test]
    fn generation_increases_per_session() {
        let mut fleet = fleet_with(&["A"]);
        let ch = MemoryChannel::default();
        let mut ctl = RecordingController::new();
        let g1 = ctl.start(set(&["A"]), &ch).unwrap();
        ctl.stop(&ch, &mut fleet).unwrap();
        ctl.on_acks(&[ack("A", 200)], &mut fleet);
        let g2 = ctl.start(set(&["A"]), &ch).unwrap();
        assert!(g2 > g1);
    }
}
