//! Event names and payload shapes exchanged with the coordinator.
//!
//! Decoding is tolerant per entry: a malformed entry in a batch is dropped
//! (and logged) while the rest of the batch is still returned.

use crate::device::Settings;
use crate::types::{AudioDevice, Connectivity, DeviceAddress, DeviceRecordingState, StreamLocator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

// Inbound
pub const EVENT_GOPRO_STATUS: &str = "gopro_status";
pub const EVENT_GOPRO_RECORD_RESPONSE: &str = "gopro_record_response";
pub const EVENT_GOPRO_SETTINGS: &str = "gopro_settings";
pub const EVENT_AUDIO_DEVICES: &str = "audio_devices";
pub const EVENT_AUDIO_SAVED: &str = "audio_saved";

pub const INBOUND_EVENTS: [&str; 5] = [
    EVENT_GOPRO_STATUS,
    EVENT_GOPRO_RECORD_RESPONSE,
    EVENT_GOPRO_SETTINGS,
    EVENT_AUDIO_DEVICES,
    EVENT_AUDIO_SAVED,
];

// Outbound
pub const EVENT_GET_GOPRO_STATUS: &str = "get_gopro_status";
pub const EVENT_START_GOPROS: &str = "start_gopros";
pub const EVENT_STOP_GOPROS: &str = "stop_gopros";
pub const EVENT_UPDATE_ALL_GOPRO_SETTINGS: &str = "update_all_gopro_settings";
pub const EVENT_GET_AUDIO_DEVICES: &str = "get_audio_devices";
pub const EVENT_START_AUDIO: &str = "start_audio";
pub const EVENT_STOP_AUDIO: &str = "stop_audio";
pub const EVENT_START_RECORDING: &str = "start_recording";
pub const EVENT_STOP_RECORDING: &str = "stop_recording";

/// Acknowledgement code the coordinator uses for success.
pub const RESPONSE_SUCCESS: i64 = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown inbound event: {0}")]
    UnknownEvent(String),

    #[error("malformed {event} payload: {reason}")]
    Malformed { event: &'static str, reason: String },
}

/// Wire envelope: one JSON text frame per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub address: DeviceAddress,
    // `None` means the entry did not carry the field; the stored value stays.
    pub connectivity: Option<Connectivity>,
    pub recording: Option<DeviceRecordingState>,
    pub stream: Option<StreamLocator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAck {
    pub address: DeviceAddress,
    pub response_code: i64,
}

impl RecordAck {
    pub fn is_success(&self) -> bool {
        self.response_code == RESPONSE_SUCCESS
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsUpdate {
    pub address: DeviceAddress,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Status(Vec<StatusUpdate>),
    RecordAcks(Vec<RecordAck>),
    Settings(Vec<SettingsUpdate>),
    AudioDevices(Vec<AudioDevice>),
    AudioSaved { filepath: String },
}

pub fn decode_inbound(event: &str, data: Value) -> Result<Inbound, ProtocolError> {
    match event {
        EVENT_GOPRO_STATUS => Ok(Inbound::Status(decode_status(data))),
        EVENT_GOPRO_RECORD_RESPONSE => Ok(Inbound::RecordAcks(decode_acks(data))),
        EVENT_GOPRO_SETTINGS => Ok(Inbound::Settings(decode_settings(data))),
        EVENT_AUDIO_DEVICES => Ok(Inbound::AudioDevices(decode_audio_devices(data))),
        EVENT_AUDIO_SAVED => decode_audio_saved(data),
        other => Err(ProtocolError::UnknownEvent(other.to_string())),
    }
}

fn batch_entries(event: &str, data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Object(_) => vec![data],
        Value::Null => vec![],
        other => {
            log::warn!("{event}: expected a list of entries, got {other}");
            vec![]
        }
    }
}

fn address_of(event: &str, raw: Option<String>) -> Option<DeviceAddress> {
    match raw.map(|a| a.trim().to_string()) {
        Some(a) if !a.is_empty() => Some(DeviceAddress::new(a)),
        _ => {
            log::warn!("{event}: dropping entry without address");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStatusEntry {
    #[serde(default, alias = "ip")]
    address: Option<String>,
    #[serde(default)]
    connectivity: Option<String>,
    // Legacy: HTTP-like reachability code from the coordinator's device poll.
    #[serde(default)]
    status: Option<Value>,
    #[serde(default, rename = "recordingStateCode", alias = "recording_state_code", alias = "state")]
    recording: Option<Value>,
    #[serde(default)]
    stream: Option<String>,
}

pub fn decode_status(data: Value) -> Vec<StatusUpdate> {
    let mut out = Vec::new();
    for entry in batch_entries(EVENT_GOPRO_STATUS, data) {
        let raw: RawStatusEntry = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{EVENT_GOPRO_STATUS}: dropping malformed entry: {e}");
                continue;
            }
        };
        let Some(address) = address_of(EVENT_GOPRO_STATUS, raw.address) else {
            continue;
        };

        let connectivity = match raw.connectivity.as_deref().map(str::to_ascii_lowercase) {
            Some(c) if c == "connected" => Some(Connectivity::Connected),
            Some(c) if c == "disconnected" => Some(Connectivity::Disconnected),
            _ => match raw.status.as_ref().and_then(Value::as_i64) {
                Some(200) => Some(Connectivity::Connected),
                Some(_) => Some(Connectivity::Disconnected),
                None => None,
            },
        };

        let recording = match raw.recording {
            Some(Value::Number(n)) => n.as_i64().map(DeviceRecordingState::from_code),
            Some(Value::String(s)) => {
                let state = DeviceRecordingState::from_label(&s);
                if state.is_none() {
                    log::debug!("{EVENT_GOPRO_STATUS}: unknown recording state {s:?} for {address}");
                }
                state
            }
            _ => None,
        };

        out.push(StatusUpdate {
            address,
            connectivity,
            recording,
            stream: raw
                .stream
                .filter(|s| !s.trim().is_empty())
                .map(StreamLocator::new),
        });
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawAck {
    #[serde(default, alias = "ip")]
    address: Option<String>,
    #[serde(default, rename = "responseCode", alias = "response_code", alias = "status")]
    response_code: Option<i64>,
}

pub fn decode_acks(data: Value) -> Vec<RecordAck> {
    let mut out = Vec::new();
    for entry in batch_entries(EVENT_GOPRO_RECORD_RESPONSE, data) {
        let raw: RawAck = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{EVENT_GOPRO_RECORD_RESPONSE}: dropping malformed entry: {e}");
                continue;
            }
        };
        let Some(address) = address_of(EVENT_GOPRO_RECORD_RESPONSE, raw.address) else {
            continue;
        };
        let Some(response_code) = raw.response_code else {
            log::warn!("{EVENT_GOPRO_RECORD_RESPONSE}: dropping entry without code for {address}");
            continue;
        };
        out.push(RecordAck {
            address,
            response_code,
        });
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default, alias = "ip")]
    address: Option<String>,
    #[serde(default)]
    settings: Option<Value>,
}

pub fn decode_settings(data: Value) -> Vec<SettingsUpdate> {
    let mut out = Vec::new();
    for entry in batch_entries(EVENT_GOPRO_SETTINGS, data) {
        let raw: RawSettings = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{EVENT_GOPRO_SETTINGS}: dropping malformed entry: {e}");
                continue;
            }
        };
        let Some(address) = address_of(EVENT_GOPRO_SETTINGS, raw.address) else {
            continue;
        };
        let Some(Value::Object(map)) = raw.settings else {
            log::warn!("{EVENT_GOPRO_SETTINGS}: dropping entry without settings object for {address}");
            continue;
        };
        out.push(SettingsUpdate {
            address,
            settings: map.into_iter().collect(),
        });
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawAudioDevice {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "channelCount", alias = "channel_count", alias = "maxInputChannels")]
    channel_count: Option<u16>,
}

pub fn decode_audio_devices(data: Value) -> Vec<AudioDevice> {
    let mut out = Vec::new();
    for entry in batch_entries(EVENT_AUDIO_DEVICES, data) {
        let raw: RawAudioDevice = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{EVENT_AUDIO_DEVICES}: dropping malformed entry: {e}");
                continue;
            }
        };
        let Some(index) = raw.index else {
            log::warn!("{EVENT_AUDIO_DEVICES}: dropping entry without index");
            continue;
        };
        out.push(AudioDevice {
            index,
            name: raw.name.unwrap_or_else(|| format!("device {index}")),
            channel_count: raw.channel_count.unwrap_or(1).max(1),
        });
    }
    out
}

fn decode_audio_saved(data: Value) -> Result<Inbound, ProtocolError> {
    let filepath = data
        .get("filepath")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Malformed {
            event: EVENT_AUDIO_SAVED,
            reason: "missing filepath".into(),
        })?;
    Ok(Inbound::AudioSaved { filepath })
}

pub fn targets_payload(addresses: &[DeviceAddress]) -> Value {
    json!({ "addresses": addresses.iter().map(DeviceAddress::as_str).collect::<Vec<_>>() })
}

pub fn audio_device_payload(device_index: u32) -> Value {
    json!({ "device_index": device_index })
}

pub fn audio_channels_payload(device_index: u32, channels: &[u16]) -> Value {
    json!({ "device_index": device_index, "channels": channels })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_batch_drops_only_malformed_entries() {
        let data = json!([
            {"ip": "10.0.0.1", "connectivity": "connected", "recordingStateCode": 0},
            {"connectivity": "connected"},
            {"address": "10.0.0.2", "status": 400},
            "garbage",
        ]);
        let updates = decode_status(data);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].address.as_str(), "10.0.0.1");
        assert_eq!(updates[0].connectivity, Some(Connectivity::Connected));
        assert_eq!(updates[0].recording, Some(DeviceRecordingState::Idle));
        assert_eq!(updates[1].connectivity, Some(Connectivity::Disconnected));
        assert_eq!(updates[1].recording, None);
    }

    #[test]
    fn status_accepts_string_state_and_stream_override() {
        let data = json!({"ip": "10.0.0.3", "status": 200, "state": "Recording", "stream": "http://x/s.m3u8"});
        let updates = decode_status(data);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].recording, Some(DeviceRecordingState::Recording));
        assert_eq!(updates[0].stream, Some(StreamLocator::new("http://x/s.m3u8")));
    }

    #[test]
    fn acks_require_address_and_code() {
        let data = json!([
            {"address": "a", "responseCode": 200},
            {"address": "b"},
            {"ip": "c", "status": 500},
        ]);
        let acks = decode_acks(data);
        assert_eq!(acks.len(), 2);
        assert!(acks[0].is_success());
        assert!(!acks[1].is_success());
    }

    #[test]
    fn settings_need_an_object() {
        let data = json!([
            {"address": "a", "settings": {"2": 9}},
            {"address": "b", "settings": false},
        ]);
        let updates = decode_settings(data);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].settings.get("2"), Some(&json!(9)));
    }

    #[test]
    fn audio_devices_accept_legacy_channel_field() {
        let data = json!([
            {"index": 0, "name": "Built-in", "maxInputChannels": 2},
            {"name": "no index"},
            {"index": 3},
        ]);
        let devices = decode_audio_devices(data);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].channel_count, 2);
        assert_eq!(devices[1].name, "device 3");
        assert_eq!(devices[1].channel_count, 1);
    }

    #[test]
    fn audio_saved_requires_filepath() {
        assert_eq!(
            decode_inbound(EVENT_AUDIO_SAVED, json!({"filepath": "audio_recordings/a.wav"})),
            Ok(Inbound::AudioSaved {
                filepath: "audio_recordings/a.wav".into()
            })
        );
        assert!(decode_inbound(EVENT_AUDIO_SAVED, json!({})).is_err());
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert_eq!(
            decode_inbound("nope", Value::Null),
            Err(ProtocolError::UnknownEvent("nope".into()))
        );
    }

    #[test]
    fn envelope_omits_null_data() {
        let env = Envelope {
            event: EVENT_GET_GOPRO_STATUS.into(),
            data: Value::Null,
        };
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"event":"get_gopro_status"}"#);

        let back: Envelope = serde_json::from_str(r#"{"event":"x"}"#).unwrap();
        assert_eq!(back.data, Value::Null);
    }
}
