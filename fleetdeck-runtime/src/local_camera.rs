use std::path::PathBuf;

use anyhow::anyhow;
use fleetdeck_core::StreamLocator;
use fleetdeck_engine::traits::LocalCamera;

/// Local camera from configuration: a device node (`/dev/video0`), a file, or
/// a URL (`rtsp://`, `http://`).
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCamera {
    source: Option<String>,
}

impl ConfiguredCamera {
    pub fn new(source: Option<String>) -> Self {
        Self {
            source: source.filter(|s| !s.trim().is_empty()),
        }
    }
}

impl LocalCamera for ConfiguredCamera {
    fn open(&self) -> anyhow::Result<StreamLocator> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| anyhow!("no local camera configured"))?;

        if source.contains("://") {
            return Ok(StreamLocator::new(source));
        }
        let path = PathBuf::from(source);
        if !path.exists() {
            return Err(anyhow!("local camera not found: {}", path.display()));
        }
        Ok(StreamLocator::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_camera_is_unavailable() {
        assert!(ConfiguredCamera::new(None).open().is_err());
        assert!(ConfiguredCamera::new(Some("  ".into())).open().is_err());
    }

    #[test]
    fn missing_device_node_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video9");
        let err = ConfiguredCamera::new(Some(path.display().to_string()))
            .open()
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn existing_path_and_urls_open() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let src = file.path().display().to_string();
        assert_eq!(
            ConfiguredCamera::new(Some(src.clone())).open().unwrap(),
            StreamLocator::new(src)
        );
        assert_eq!(
            ConfiguredCamera::new(Some("rtsp://127.0.0.1/cam".into())).open().unwrap().as_str(),
            "rtsp://127.0.0.1/cam"
        );
    }
}
