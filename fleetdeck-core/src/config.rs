use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback policy handed to every live-view sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackPolicy {
    pub autoplay: bool,
    // Muted by default so autoplay is never blocked.
    pub muted: bool,
    pub low_latency: bool,
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            autoplay: true,
            muted: true,
            low_latency: true,
        }
    }
}

/// External player used for live views. When absent, sinks are headless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    // Visibility assigned to every target when a streaming session starts.
    #[serde(default = "default_true")]
    pub default_visible: bool,

    #[serde(default)]
    pub playback: PlaybackPolicy,
    #[serde(default)]
    pub player: Option<PlayerConfig>,
    #[serde(default)]
    pub local_camera: Option<String>,
}

fn default_coordinator_url() -> String {
    "ws://localhost:5000/ws".into()
}

fn default_stream_base_url() -> String {
    "http://localhost:5000".into()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_probe_interval_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            coordinator_url: default_coordinator_url(),
            stream_base_url: default_stream_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            default_visible: true,
            playback: PlaybackPolicy::default(),
            player: None,
            local_camera: None,
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"stream_base_url":"http://10.0.0.2:5000"}"#).unwrap();
        assert_eq!(cfg.stream_base_url, "http://10.0.0.2:5000");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert!(cfg.default_visible);
        assert!(cfg.playback.muted);
        assert!(cfg.player.is_none());
    }
}
