use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a fleet device. Unique key of the device map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(pub String);

impl DeviceAddress {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Location of a live stream (playlist URL or local source path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamLocator(pub String);

impl StreamLocator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRecordingState {
    Idle,
    Recording,
    Error,
}

impl DeviceRecordingState {
    /// Maps the coordinator's numeric state code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Recording,
            _ => Self::Error,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "recording" => Some(Self::Recording),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamReadiness {
    #[default]
    Unknown,
    Checking,
    Ready,
    Unreachable,
}

/// One local audio input as enumerated by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub index: u32,
    pub name: String,
    pub channel_count: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_state_codes() {
        assert_eq!(DeviceRecordingState::from_code(0), DeviceRecordingState::Idle);
        assert_eq!(DeviceRecordingState::from_code(1), DeviceRecordingState::Recording);
        assert_eq!(DeviceRecordingState::from_code(7), DeviceRecordingState::Error);
        assert_eq!(DeviceRecordingState::from_code(-1), DeviceRecordingState::Error);
    }

    #[test]
    fn recording_state_labels_are_case_insensitive() {
        assert_eq!(
            DeviceRecordingState::from_label(" Recording "),
            Some(DeviceRecordingState::Recording)
        );
        assert_eq!(DeviceRecordingState::from_label("IDLE"), Some(DeviceRecordingState::Idle));
        assert_eq!(DeviceRecordingState::from_label("busy"), None);
    }
}
