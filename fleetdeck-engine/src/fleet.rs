//! Fleet Status Reconciler: the canonical address -> device record map.
//!
//! Status pushes and poll responses arrive on the same event and feed the same
//! merge. Connectivity and recording state are replaced, settings are merged by
//! key, operator-owned fields (selection, visibility) are never touched. An
//! address missing from a batch is left as it was.

use std::collections::BTreeMap;

use fleetdeck_core::protocol::{EVENT_GET_GOPRO_STATUS, SettingsUpdate, StatusUpdate};
use fleetdeck_core::{Connectivity, DeviceAddress, DeviceRecord, DeviceRecordingState};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::traits::EventChannel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceAddress),

    #[error("selection is frozen while a recording session is active")]
    SessionActive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetSnapshot {
    pub revision: u64,
    pub devices: Vec<DeviceRecord>,
}

/// Per-device transitions produced by one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub touched: Vec<DeviceAddress>,
    pub connected: Vec<DeviceAddress>,
    pub disconnected: Vec<DeviceAddress>,
    pub stream_changed: Vec<DeviceAddress>,
}

pub struct FleetReconciler {
    devices: BTreeMap<DeviceAddress, DeviceRecord>,
    revision: u64,
    dirty: bool,

    polling: bool,
    suspended: bool,

    changes: watch::Sender<FleetSnapshot>,
}

impl Default for FleetReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetReconciler {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(FleetSnapshot::default());
        Self {
            devices: BTreeMap::new(),
            revision: 0,
            dirty: false,
            polling: false,
            suspended: false,
            changes,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.changes.subscribe()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.dirty
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            revision: self.revision,
            devices: self.devices.values().cloned().collect(),
        }
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.devices.keys().cloned().collect()
    }

    pub fn selected(&self) -> Vec<DeviceAddress> {
        self.devices
            .values()
            .filter(|d| d.selected)
            .map(|d| d.address.clone())
            .collect()
    }

    /// Mutable access for the session controller and readiness gate.
    pub(crate) fn record_mut(&mut self, address: &DeviceAddress) -> Option<&mut DeviceRecord> {
        let rec = self.devices.get_mut(address)?;
        self.dirty = true;
        Some(rec)
    }

    /// Stores `Idle` for every device still marked `Recording`. Called when a
    /// session ends; returns the devices that changed.
    pub fn clear_recording(&mut self) -> Vec<DeviceAddress> {
        let mut cleared = Vec::new();
        for rec in self.devices.values_mut() {
            if rec.recording == DeviceRecordingState::Recording {
                rec.recording = DeviceRecordingState::Idle;
                cleared.push(rec.address.clone());
            }
        }
        if !cleared.is_empty() {
            self.dirty = true;
        }
        cleared
    }

    /// Fire-and-forget poll.
    pub fn request_snapshot(&self, channel: &dyn EventChannel) -> anyhow::Result<()> {
        channel.emit(EVENT_GET_GOPRO_STATUS, Value::Null)
    }

    pub fn start_polling(&mut self) {
        if !self.polling {
            log::info!("fleet polling started");
        }
        self.polling = true;
    }

    pub fn stop_polling(&mut self) {
        if self.polling {
            log::info!("fleet polling stopped");
        }
        self.polling = false;
    }

    /// Suspends polling while a recording session owns the channel.
    pub fn set_suspended(&mut self, suspended: bool) {
        if self.suspended != suspended {
            log::debug!("fleet polling suspended={suspended}");
        }
        self.suspended = suspended;
    }

    pub fn is_polling(&self) -> bool {
        self.polling && !self.suspended
    }

    /// Called on every poll-interval tick. Returns whether a poll was issued.
    pub fn on_poll_tick(&self, channel: &dyn EventChannel) -> bool {
        if !self.is_polling() {
            return false;
        }
        if let Err(e) = self.request_snapshot(channel) {
            // Transient: the next tick retries.
            log::warn!("status poll failed: {e}");
            return false;
        }
        true
    }

    /// Merges one status batch without publishing. See [`Self::commit`].
    ///
    /// `Recording` reported while no session is active is stored as `Idle`.
    pub fn merge_status(&mut self, updates: Vec<StatusUpdate>, session_active: bool) -> MergeOutcome {
        let mut out = MergeOutcome::default();

        for u in updates {
            let rec = self
                .devices
                .entry(u.address.clone())
                .or_insert_with(|| {
                    log::info!("new device sighted: {}", u.address);
                    DeviceRecord::new(u.address.clone())
                });

            if let Some(c) = u.connectivity {
                if rec.connectivity != c {
                    match c {
                        Connectivity::Connected => out.connected.push(u.address.clone()),
                        Connectivity::Disconnected => out.disconnected.push(u.address.clone()),
                    }
                }
                rec.connectivity = c;
            }

            if let Some(mut r) = u.recording {
                if r == DeviceRecordingState::Recording && !session_active {
                    log::debug!("{} reports recording outside a session; storing idle", u.address);
                    r = DeviceRecordingState::Idle;
                }
                rec.recording = r;
            }

            if let Some(s) = u.stream {
                if rec.stream.as_ref() != Some(&s) {
                    rec.stream = Some(s);
                    out.stream_changed.push(u.address.clone());
                }
            }

            out.touched.push(u.address);
            self.dirty = true;
        }

        out
    }

    /// Merges settings by key into each addressed record, creating records on
    /// first sighting. Returns the addresses whose settings changed.
    pub fn merge_settings(&mut self, updates: Vec<SettingsUpdate>) -> Vec<DeviceAddress> {
        let mut changed = Vec::new();
        for u in updates {
            let rec = self
                .devices
                .entry(u.address.clone())
                .or_insert_with(|| DeviceRecord::new(u.address.clone()));
            if rec.merge_settings(u.settings) {
                changed.push(u.address);
                self.dirty = true;
            }
        }
        changed
    }

    pub fn apply_status(&mut self, updates: Vec<StatusUpdate>, session_active: bool) -> MergeOutcome {
        let out = self.merge_status(updates, session_active);
        self.commit();
        out
    }

    pub fn apply_settings(&mut self, updates: Vec<SettingsUpdate>) -> Vec<DeviceAddress> {
        let out = self.merge_settings(updates);
        self.commit();
        out
    }

    pub fn set_selected(&mut self, address: &DeviceAddress, selected: bool) -> Result<(), SelectionError> {
        let rec = self
            .record_mut(address)
            .ok_or_else(|| SelectionError::UnknownDevice(address.clone()))?;
        rec.selected = selected;
        Ok(())
    }

    pub fn set_visible(&mut self, address: &DeviceAddress, visible: bool) -> Result<(), SelectionError> {
        let rec = self
            .record_mut(address)
            .ok_or_else(|| SelectionError::UnknownDevice(address.clone()))?;
        rec.visible = visible;
        Ok(())
    }

    /// Publishes one change notification if anything changed since the last
    /// commit. Synchronous sub-updates of one inbound message coalesce here.
    pub fn commit(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.revision += 1;
        self.changes.send_replace(self.snapshot());
        true
    }
}
