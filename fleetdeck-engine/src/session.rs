use fleetdeck_core::DeviceAddress;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl SessionState {
    /// Any state other than `Idle`. Polling is suspended and the selection is
    /// frozen while this holds.
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }

    /// Live views exist only while the fleet is starting or recording.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Starting | Self::Recording)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
        }
    }
}

/// The singleton recording session while one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    pub generation: u64,
    pub targets: BTreeSet<DeviceAddress>,
    pub started_at_unix_ms: i64,

    // Acknowledgements for the current phase (start or stop), keyed by address.
    // `true` is success.
    pub acks: BTreeMap<DeviceAddress, bool>,
}

impl RecordingSession {
    pub fn new(generation: u64, targets: BTreeSet<DeviceAddress>) -> Self {
        Self {
            generation,
            targets,
            started_at_unix_ms: now_unix_ms(),
            acks: BTreeMap::new(),
        }
    }

    pub fn all_acknowledged(&self) -> bool {
        self.targets.iter().all(|t| self.acks.contains_key(t))
    }

    pub fn pending(&self) -> Vec<DeviceAddress> {
        self.targets
            .iter()
            .filter(|t| !self.acks.contains_key(*t))
            .cloned()
            .collect()
    }
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().try_into().unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_and_streaming_flags() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Starting.is_streaming());
        assert!(SessionState::Recording.is_streaming());
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Stopping.is_streaming());
    }

    #[test]
    fn pending_tracks_missing_acks() {
        let targets: BTreeSet<_> = ["a", "b"].into_iter().map(DeviceAddress::new).collect();
        let mut s = RecordingSession::new(1, targets);
        assert!(!s.all_acknowledged());
        s.acks.insert(DeviceAddress::new("b"), false);
        assert_eq!(s.pending(), vec![DeviceAddress::new("a")]);
        s.acks.insert(DeviceAddress::new("a"), true);
        assert!(s.all_acknowledged());
    }
}
