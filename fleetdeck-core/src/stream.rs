use crate::types::{DeviceAddress, StreamLocator};
use serde::{Deserialize, Serialize};

const STREAM_PREFIX: &str = "gopro_";
const HLS_DIR: &str = "hls_streams";
const PLAYLIST_EXT: &str = "m3u8";

/// Per-device stream resource name: address separators normalized to `_`.
///
/// `172.21.100.51` -> `gopro_172_21_100_51`
pub fn stream_name(address: &DeviceAddress) -> String {
    let normalized: String = address
        .as_str()
        .trim()
        .chars()
        .map(|c| if c == '.' || c == ':' { '_' } else { c })
        .collect();
    format!("{STREAM_PREFIX}{normalized}")
}

/// Derives playlist and readiness locations from the coordinator's stream base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoints {
    pub base_url: String,
}

impl StreamEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn playlist(&self, address: &DeviceAddress) -> StreamLocator {
        let file = format!("{}.{PLAYLIST_EXT}", stream_name(address));
        StreamLocator::new(join_url(&self.base_url, &format!("{HLS_DIR}/{file}")))
    }

    pub fn readiness_url(&self, address: &DeviceAddress) -> String {
        let file = format!("{}.{PLAYLIST_EXT}", stream_name(address));
        join_url(&self.base_url, &format!("{HLS_DIR}/check_ready/{file}"))
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}
