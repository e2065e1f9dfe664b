use crate::types::{
    Connectivity, DeviceAddress, DeviceRecordingState, StreamLocator, StreamReadiness,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device-specific settings, opaque to the client. Latest value per key wins.
pub type Settings = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub connectivity: Connectivity,
    pub recording: DeviceRecordingState,
    pub settings: Settings,

    // Operator-owned. Never touched by status merges.
    pub selected: bool,
    pub visible: bool,

    pub readiness: StreamReadiness,

    // Locator pushed by the coordinator; when absent the derived playlist path is used.
    pub stream: Option<StreamLocator>,
}

impl DeviceRecord {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            connectivity: Connectivity::Disconnected,
            recording: DeviceRecordingState::Idle,
            settings: Settings::new(),
            selected: false,
            visible: false,
            readiness: StreamReadiness::Unknown,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity == Connectivity::Connected
    }

    /// Merges `incoming` into the stored settings: new keys add, existing keys
    /// overwrite, keys absent from `incoming` persist.
    pub fn merge_settings(&mut self, incoming: Settings) -> bool {
        let mut changed = false;
        for (k, v) in incoming {
            if self.settings.get(&k) != Some(&v) {
                self.settings.insert(k, v);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_merge_by_key() {
        let mut rec = DeviceRecord::new(DeviceAddress::new("172.21.100.51"));

        let mut first = Settings::new();
        first.insert("a".into(), json!(1));
        assert!(rec.merge_settings(first));

        let mut second = Settings::new();
        second.insert("b".into(), json!(2));
        assert!(rec.merge_settings(second));

        assert_eq!(rec.settings.get("a"), Some(&json!(1)));
        assert_eq!(rec.settings.get("b"), Some(&json!(2)));
        assert_eq!(rec.settings.len(), 2);
    }

    #[test]
    fn identical_settings_report_no_change() {
        let mut rec = DeviceRecord::new(DeviceAddress::new("x"));
        let mut s = Settings::new();
        s.insert("3".into(), json!(5));
        assert!(rec.merge_settings(s.clone()));
        assert!(!rec.merge_settings(s));
    }
}
