use fleetdeck_core::protocol::{
    EVENT_GET_AUDIO_DEVICES, EVENT_START_AUDIO, EVENT_START_RECORDING, EVENT_STOP_AUDIO,
    EVENT_STOP_RECORDING, audio_channels_payload, audio_device_payload,
};
use fleetdeck_core::{AudioDevice, format_elapsed};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::traits::EventChannel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("no audio device selected")]
    NoDeviceSelected,

    #[error("audio is already recording")]
    AlreadyRecording,

    #[error("audio is not recording")]
    NotRecording,

    #[error("unknown audio device index {0}")]
    UnknownDevice(u32),

    #[error("channel {channel} out of range (device has {count})")]
    InvalidChannel { channel: u16, count: u16 },

    #[error("coordinator channel unavailable: {0}")]
    Channel(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioAvailability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioView {
    pub availability: AudioAvailability,
    pub devices: Vec<AudioDevice>,
    pub selected: Option<AudioDevice>,
    pub channels: Vec<u16>,
    pub recording: bool,
    pub elapsed: String,
    pub final_elapsed: Option<String>,
    pub artifact_path: Option<String>,
}

/// Audio Session Controller.
///
/// Elapsed time is counted locally from the start call, one [`tick`] per
/// second; the coordinator's acknowledgement plays no part in it.
///
/// [`tick`]: AudioController::tick
#[derive(Debug, Default)]
pub struct AudioController {
    availability: AudioAvailability,
    devices: Vec<AudioDevice>,
    selected: Option<AudioDevice>,
    // 1-based input channels; empty means the device default.
    channels: Vec<u16>,

    recording: bool,
    elapsed_secs: u64,
    final_secs: Option<u64>,
    artifact_path: Option<String>,
}

impl AudioController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn final_secs(&self) -> Option<u64> {
        self.final_secs
    }

    pub fn artifact_path(&self) -> Option<&str> {
        self.artifact_path.as_deref()
    }

    pub fn selected(&self) -> Option<&AudioDevice> {
        self.selected.as_ref()
    }

    pub fn devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    pub fn refresh_devices(&self, channel: &dyn EventChannel) -> Result<(), AudioError> {
        channel
            .emit(EVENT_GET_AUDIO_DEVICES, Value::Null)
            .map_err(|e| AudioError::Channel(e.to_string()))
    }

    /// Replaces the device list wholesale. The selection survives only if its
    /// index is still listed, or while recording.
    pub fn on_devices(&mut self, devices: Vec<AudioDevice>) {
        self.availability = if devices.is_empty() {
            AudioAvailability::Unavailable
        } else {
            AudioAvailability::Available
        };

        if !self.recording {
            let refreshed = self
                .selected
                .as_ref()
                .and_then(|sel| devices.iter().find(|d| d.index == sel.index).cloned());
            if refreshed.is_none() && self.selected.is_some() {
                log::info!("selected audio device is gone; clearing selection");
                self.channels.clear();
            }
            self.selected = refreshed;
        }

        log::debug!("audio device list replaced ({} device(s))", devices.len());
        self.devices = devices;
    }

    pub fn select_device(&mut self, index: u32) -> Result<&AudioDevice, AudioError> {
        if self.recording {
            return Err(AudioError::AlreadyRecording);
        }
        let device = self
            .devices
            .iter()
            .find(|d| d.index == index)
            .cloned()
            .ok_or(AudioError::UnknownDevice(index))?;

        if self.selected.as_ref().map(|d| d.index) != Some(index) {
            self.channels.clear();
        }
        Ok(self.selected.insert(device))
    }

    /// Picks explicit input channels on a multi-channel device. An empty list
    /// restores the device default.
    pub fn select_channels(&mut self, mut channels: Vec<u16>) -> Result<(), AudioError> {
        if self.recording {
            return Err(AudioError::AlreadyRecording);
        }
        let device = self.selected.as_ref().ok_or(AudioError::NoDeviceSelected)?;
        if let Some(&bad) = channels
            .iter()
            .find(|&&c| c == 0 || c > device.channel_count)
        {
            return Err(AudioError::InvalidChannel {
                channel: bad,
                count: device.channel_count,
            });
        }
        channels.sort_unstable();
        channels.dedup();
        self.channels = channels;
        Ok(())
    }

    pub fn start_recording(&mut self, channel: &dyn EventChannel) -> Result<(), AudioError> {
        let device = self.selected.as_ref().ok_or(AudioError::NoDeviceSelected)?;
        if self.recording {
            return Err(AudioError::AlreadyRecording);
        }

        let (event, payload) = if self.channels.is_empty() {
            (EVENT_START_AUDIO, audio_device_payload(device.index))
        } else {
            (
                EVENT_START_RECORDING,
                audio_channels_payload(device.index, &self.channels),
            )
        };
        channel
            .emit(event, payload)
            .map_err(|e| AudioError::Channel(e.to_string()))?;

        log::info!("audio recording started on {:?}", device.name);
        self.recording = true;
        self.elapsed_secs = 0;
        self.final_secs = None;
        self.artifact_path = None;
        Ok(())
    }

    /// One second of local wall clock.
    pub fn tick(&mut self) {
        if self.recording {
            self.elapsed_secs += 1;
        }
    }

    /// Stops locally even when the stop command cannot be sent; the live
    /// counter must not keep running against a dead channel.
    pub fn stop_recording(&mut self, channel: &dyn EventChannel) -> Result<u64, AudioError> {
        if !self.recording {
            return Err(AudioError::NotRecording);
        }

        if let Some(device) = self.selected.as_ref() {
            let (event, payload) = if self.channels.is_empty() {
                (EVENT_STOP_AUDIO, audio_device_payload(device.index))
            } else {
                (
                    EVENT_STOP_RECORDING,
                    audio_channels_payload(device.index, &self.channels),
                )
            };
            if let Err(e) = channel.emit(event, payload) {
                log::warn!("audio stop command could not be sent: {e}");
            }
        }

        let total = self.elapsed_secs;
        self.recording = false;
        self.final_secs = Some(total);
        self.elapsed_secs = 0;
        log::info!("audio recording stopped after {}", format_elapsed(total));
        Ok(total)
    }

    pub fn on_saved(&mut self, filepath: String) {
        log::info!("audio saved: {filepath}");
        self.artifact_path = Some(filepath);
    }

    pub fn live_display(&self) -> String {
        format_elapsed(self.elapsed_secs)
    }

    pub fn final_display(&self) -> Option<String> {
        self.final_secs.map(format_elapsed)
    }

    pub fn view(&self) -> AudioView {
        AudioView {
            availability: self.availability,
            devices: self.devices.clone(),
            selected: self.selected.clone(),
            channels: self.channels.clone(),
            recording: self.recording,
            elapsed: self.live_display(),
            final_elapsed: self.final_display(),
            artifact_path: self.artifact_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
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

    fn mic(index: u32, channels: u16) -> AudioDevice {
        AudioDevice {
            index,
            name: format!("Mic {index}"),
            channel_count: channels,
        }
    }

    fn ready_controller() -> AudioController {
        let mut audio = AudioController::new();
        audio.on_devices(vec![mic(0, 1), mic(3, 8)]);
        audio
    }

    #[test]
    fn sixty_one_seconds_freezes_as_01_01() {
        let ch = MemoryChannel::default();
        let mut audio = ready_controller();
        audio.select_device(0).unwrap();
        audio.start_recording(&ch).unwrap();
        for _ in 0..61 {
            audio.tick();
        }
        audio.stop_recording(&ch).unwrap();

        assert_eq!(audio.final_display().as_deref(), Some("01:01"));
        assert_eq!(audio.live_display(), "00:00");

        let sent = ch.sent.lock().unwrap();
        assert_eq!(sent[0], ("start_audio".to_string(), json!({"device_index": 0})));
        assert_eq!(sent[1], ("stop_audio".to_string(), json!({"device_index": 0})));
    }

    #[test]
    fn start_preconditions() {
        let ch = MemoryChannel::default();
        let mut audio = ready_controller();
        assert_eq!(audio.start_recording(&ch), Err(AudioError::NoDeviceSelected));

        audio.select_device(0).unwrap();
        audio.start_recording(&ch).unwrap();
        assert_eq!(audio.start_recording(&ch), Err(AudioError::AlreadyRecording));
        assert_eq!(audio.select_device(3).map(|_| ()), Err(AudioError::AlreadyRecording));
    }

    #[test]
    fn stop_without_recording_is_rejected() {
        let mut audio = ready_controller();
        assert_eq!(
            audio.stop_recording(&MemoryChannel::default()),
            Err(AudioError::NotRecording)
        );
    }

    #[test]
    fn stop_proceeds_locally_when_channel_is_gone() {
        let mut audio = ready_controller();
        audio.select_device(0).unwrap();
        audio.start_recording(&MemoryChannel::default()).unwrap();
        audio.tick();

        let broken = MemoryChannel {
            broken: true,
            ..Default::default()
        };
        assert_eq!(audio.stop_recording(&broken), Ok(1));
        assert!(!audio.is_recording());
    }

    #[test]
    fn ticks_only_count_while_recording() {
        let mut audio = ready_controller();
        audio.tick();
        assert_eq!(audio.elapsed_secs(), 0);
    }

    #[test]
    fn save_confirmation_records_artifact() {
        let mut audio = ready_controller();
        audio.on_saved("/data/audio/take1.wav".into());
        assert_eq!(audio.artifact_path(), Some("/data/audio/take1.wav"));
    }

    #[test]
    fn device_list_replaces_and_reports_availability() {
        let mut audio = AudioController::new();
        assert_eq!(audio.view().availability, AudioAvailability::Unknown);

        audio.on_devices(vec![mic(0, 1), mic(1, 2)]);
        audio.select_device(1).unwrap();
        audio.on_devices(vec![mic(0, 1)]);
        assert_eq!(audio.devices().len(), 1);
        assert!(audio.selected().is_none());

        audio.on_devices(Vec::new());
        assert_eq!(audio.view().availability, AudioAvailability::Unavailable);
    }

    #[test]
    fn channel_selection_switches_to_multichannel_events() {
        let ch = MemoryChannel::default();
        let mut audio = ready_controller();
        audio.select_device(3).unwrap();

        assert_eq!(
            audio.select_channels(vec![9]),
            Err(AudioError::InvalidChannel { channel: 9, count: 8 })
        );
        audio.select_channels(vec![2, 1, 2]).unwrap();
        audio.start_recording(&ch).unwrap();
        audio.stop_recording(&ch).unwrap();

        let sent = ch.sent.lock().unwrap();
        assert_eq!(sent[0].0, "start_recording");
        assert_eq!(sent[0].1, json!({"device_index": 3, "channels": [1, 2]}));
        assert_eq!(sent[1].0, "stop_recording");
    }

    #[test]
    fn unknown_device_index_is_rejected() {
        let mut audio = ready_controller();
        assert_eq!(audio.select_device(42).map(|_| ()), Err(AudioError::UnknownDevice(42)));
    }
}
