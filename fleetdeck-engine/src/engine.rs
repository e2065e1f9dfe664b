use crate::audio::{AudioController, AudioError, AudioView};
use crate::fleet::{FleetReconciler, SelectionError};
use crate::media::{LocalFeed, MediaSessionManager};
use crate::readiness::{ProbeTicket, ReadinessGate};
use crate::recording::{RecordingController, SessionError};
use crate::session::SessionState;
use crate::traits::{EventChannel, LocalCamera, SinkFactory};
use fleetdeck_core::protocol::{EVENT_UPDATE_ALL_GOPRO_SETTINGS, Inbound, targets_payload};
use fleetdeck_core::{AppConfig, DeviceAddress, DeviceRecord, PlaybackPolicy, StreamEndpoints};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub endpoints: StreamEndpoints,
    pub playback: PlaybackPolicy,

    // Applied to every target when a streaming session starts.
    pub default_visible: bool,
}

impl CoreConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            endpoints: StreamEndpoints::new(cfg.stream_base_url.clone()),
            playback: cfg.playback,
            default_visible: cfg.default_visible,
        }
    }
}

/// Everything a presentation layer needs, in one serializable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetView {
    pub revision: u64,
    pub devices: Vec<DeviceRecord>,
    pub session: SessionState,
    pub targets: Vec<DeviceAddress>,
    pub started_at_unix_ms: Option<i64>,
    pub polling: bool,
    pub live_views: Vec<DeviceAddress>,
    pub local_feed: LocalFeed,
    pub audio: AudioView,
}

/// The client core: every component instance, constructed once and owned by
/// whoever drives it. All methods run to completion; the owner feeds timers,
/// inbound messages and probe results in, and spawns the returned probes.
pub struct FleetCore {
    cfg: CoreConfig,
    channel: Arc<dyn EventChannel>,

    fleet: FleetReconciler,
    recording: RecordingController,
    gate: ReadinessGate,
    media: MediaSessionManager,
    audio: AudioController,

    published: u64,
    view_tx: watch::Sender<FleetView>,
}

impl FleetCore {
    pub fn new(cfg: CoreConfig, channel: Arc<dyn EventChannel>, sinks: Arc<dyn SinkFactory>) -> Self {
        let media = MediaSessionManager::new(sinks, cfg.playback, cfg.endpoints.clone());
        let (view_tx, _) = watch::channel(FleetView::default());
        Self {
            cfg,
            channel,
            fleet: FleetReconciler::new(),
            recording: RecordingController::new(),
            gate: ReadinessGate::new(),
            media,
            audio: AudioController::new(),
            published: 0,
            view_tx,
        }
    }

    pub fn fleet(&self) -> &FleetReconciler {
        &self.fleet
    }

    pub fn recording(&self) -> &RecordingController {
        &self.recording
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn media(&self) -> &MediaSessionManager {
        &self.media
    }

    pub fn audio(&self) -> &AudioController {
        &self.audio
    }

    pub fn session_state(&self) -> SessionState {
        self.recording.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> FleetView {
        let session = self.recording.session();
        FleetView {
            revision: self.published,
            devices: self.fleet.records().cloned().collect(),
            session: self.recording.state(),
            targets: self.recording.targets(),
            started_at_unix_ms: session.map(|s| s.started_at_unix_ms),
            polling: self.fleet.is_polling(),
            live_views: self.media.live_addresses(),
            local_feed: self.media.local_feed().clone(),
            audio: self.audio.view(),
        }
    }

    // ---- lifecycle ----

    pub fn start_polling(&mut self) {
        self.fleet.start_polling();
        if let Err(e) = self.fleet.request_snapshot(self.channel.as_ref()) {
            log::warn!("initial status poll failed: {e}");
        }
        self.publish();
    }

    pub fn stop_polling(&mut self) {
        self.fleet.stop_polling();
        self.publish();
    }

    pub fn request_snapshot(&self) -> anyhow::Result<()> {
        self.fleet.request_snapshot(self.channel.as_ref())
    }

    /// Hard channel failure: aborts a starting/stopping session and stops
    /// polling until the owner reconnects.
    pub fn on_channel_lost(&mut self) {
        log::warn!("coordinator channel lost");
        let prev = self.recording.state();
        self.recording.abort(&mut self.fleet);
        self.sync_session(prev);
        self.fleet.stop_polling();
        self.publish();
    }

    /// Disposes every sink, local preview included.
    pub fn shutdown(&mut self) {
        self.media.teardown_all();
        self.media.detach_local_camera();
        self.fleet.stop_polling();
        self.publish();
    }

    // ---- inbound ----

    /// Applies one decoded inbound message and publishes once. Returns the
    /// readiness probes that became due.
    pub fn handle_inbound(&mut self, msg: Inbound) -> Vec<ProbeTicket> {
        let mut tickets = Vec::new();
        match msg {
            Inbound::Status(updates) => {
                let active = self.recording.state().is_active();
                let out = self.fleet.merge_status(updates, active);
                for addr in &out.disconnected {
                    if self.recording.is_target(addr) {
                        self.gate.on_disconnected(&mut self.fleet, addr);
                    }
                }
                tickets = self.collect_probes();
                let streaming = self.streaming();
                self.media.reconcile(&out.touched, &self.fleet, streaming);
            }
            Inbound::RecordAcks(acks) => {
                let prev = self.recording.state();
                if self.recording.on_acks(&acks, &mut self.fleet).is_some() {
                    tickets = self.sync_session(prev);
                }
            }
            Inbound::Settings(updates) => {
                self.fleet.merge_settings(updates);
            }
            Inbound::AudioDevices(devices) => self.audio.on_devices(devices),
            Inbound::AudioSaved { filepath } => self.audio.on_saved(filepath),
        }
        self.publish();
        tickets
    }

    // ---- timers ----

    pub fn on_poll_tick(&mut self) -> bool {
        self.fleet.on_poll_tick(self.channel.as_ref())
    }

    pub fn on_probe_tick(&mut self) -> Vec<ProbeTicket> {
        let tickets = self.collect_probes();
        let streaming = self.streaming();
        let retried = self.media.retry_pending(&self.fleet, streaming);
        if retried || self.fleet.has_pending_changes() {
            self.publish();
        }
        tickets
    }

    pub fn on_audio_tick(&mut self) {
        if self.audio.is_recording() {
            self.audio.tick();
            self.publish();
        }
    }

    pub fn on_probe_result(&mut self, ticket: &ProbeTicket, result: anyhow::Result<bool>) {
        if self.gate.on_result(ticket, result, &mut self.fleet) {
            let streaming = self.streaming();
            self.media
                .reconcile(std::slice::from_ref(&ticket.address), &self.fleet, streaming);
            self.publish();
        }
    }

    // ---- operator: fleet ----

    pub fn select_device(&mut self, address: &DeviceAddress, selected: bool) -> Result<(), SelectionError> {
        if self.recording.state().is_active() {
            return Err(SelectionError::SessionActive);
        }
        self.fleet.set_selected(address, selected)?;
        self.publish();
        Ok(())
    }

    pub fn set_visible(&mut self, address: &DeviceAddress, visible: bool) -> Result<(), SelectionError> {
        self.fleet.set_visible(address, visible)?;
        let streaming = self.streaming();
        self.media
            .reconcile(std::slice::from_ref(address), &self.fleet, streaming);
        self.publish();
        Ok(())
    }

    /// Starts a session over the current selection. Returns the first probes.
    pub fn start_recording(&mut self) -> Result<Vec<ProbeTicket>, SessionError> {
        let prev = self.recording.state();
        let targets: BTreeSet<DeviceAddress> = self.fleet.selected().into_iter().collect();
        self.recording.start(targets, self.channel.as_ref())?;
        let tickets = self.sync_session(prev);
        self.publish();
        Ok(tickets)
    }

    pub fn stop_recording(&mut self) -> Result<(), SessionError> {
        let prev = self.recording.state();
        let res = self.recording.stop(self.channel.as_ref(), &mut self.fleet);
        self.sync_session(prev);
        self.publish();
        res
    }

    /// Pushes settings to the selection, or to every known device when
    /// nothing is selected.
    pub fn update_all_settings(&mut self) -> Result<(), SessionError> {
        let state = self.recording.state();
        if state.is_active() {
            return Err(SessionError::InvalidState {
                op: "update settings",
                state: state.label(),
            });
        }
        let mut addrs = self.fleet.selected();
        if addrs.is_empty() {
            addrs = self.fleet.addresses();
        }
        if addrs.is_empty() {
            return Err(SessionError::NoTargets);
        }
        self.channel
            .emit(EVENT_UPDATE_ALL_GOPRO_SETTINGS, targets_payload(&addrs))
            .map_err(|e| SessionError::Channel(e.to_string()))
    }

    // ---- operator: audio ----

    pub fn refresh_audio_devices(&self) -> Result<(), AudioError> {
        self.audio.refresh_devices(self.channel.as_ref())
    }

    pub fn select_audio_device(&mut self, index: u32) -> Result<(), AudioError> {
        self.audio.select_device(index)?;
        self.publish();
        Ok(())
    }

    pub fn select_audio_channels(&mut self, channels: Vec<u16>) -> Result<(), AudioError> {
        self.audio.select_channels(channels)?;
        self.publish();
        Ok(())
    }

    pub fn start_audio(&mut self) -> Result<(), AudioError> {
        self.audio.start_recording(self.channel.as_ref())?;
        self.publish();
        Ok(())
    }

    pub fn stop_audio(&mut self) -> Result<u64, AudioError> {
        let total = self.audio.stop_recording(self.channel.as_ref())?;
        self.publish();
        Ok(total)
    }

    // ---- operator: local camera ----

    pub fn attach_local_camera(&mut self, camera: &dyn LocalCamera) -> LocalFeed {
        let feed = self.media.attach_local_camera(camera).clone();
        self.publish();
        feed
    }

    pub fn detach_local_camera(&mut self) {
        self.media.detach_local_camera();
        self.publish();
    }

    // ---- internals ----

    fn streaming(&self) -> bool {
        self.recording.state().is_streaming()
    }

    fn collect_probes(&mut self) -> Vec<ProbeTicket> {
        let targets = self.recording.targets();
        self.gate.collect_due(&mut self.fleet, &targets)
    }

    /// Applies the side effects of a session state change.
    fn sync_session(&mut self, prev: SessionState) -> Vec<ProbeTicket> {
        let now = self.recording.state();
        if prev == now {
            return Vec::new();
        }
        self.fleet.set_suspended(now.is_active());

        let mut tickets = Vec::new();
        if !prev.is_streaming() && now.is_streaming() {
            let targets = self.recording.targets();
            for addr in &targets {
                // Targets always exist: they came from the selection.
                let _ = self.fleet.set_visible(addr, self.cfg.default_visible);
            }
            self.gate.begin_session(&mut self.fleet, &targets);
            tickets = self.collect_probes();
        }
        if prev.is_streaming() && !now.is_streaming() {
            self.gate.end_session(&mut self.fleet);
            self.media.teardown_all();
        }

        if now == SessionState::Idle {
            // Hand device state back to the poll loop right away.
            if let Err(e) = self.fleet.request_snapshot(self.channel.as_ref()) {
                log::debug!("post-session status poll failed: {e}");
            }
        }
        tickets
    }

    fn publish(&mut self) {
        self.fleet.commit();
        self.published += 1;
        self.view_tx.send_replace(self.view());
    }
}
