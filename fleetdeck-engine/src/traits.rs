use async_trait::async_trait;
use fleetdeck_core::{DeviceAddress, PlaybackPolicy, StreamLocator};
use serde_json::Value;

/// Outbound half of the coordinator channel. Fire-and-forget: an `Err` means
/// the channel itself is gone, not that the coordinator rejected anything.
pub trait EventChannel: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok(true)` once the device's stream can be played.
    async fn is_ready(&self, address: &DeviceAddress) -> anyhow::Result<bool>;
}

/// What a sink is showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SinkTarget {
    Device(DeviceAddress),
    LocalCamera,
}

/// A live video decode/render attachment.
pub trait VideoSink: Send {
    fn locator(&self) -> &StreamLocator;

    /// Switches the source without tearing the sink down.
    fn set_source(&mut self, locator: &StreamLocator) -> anyhow::Result<()>;

    /// Releases every resource held by the sink.
    fn dispose(self: Box<Self>);
}

pub trait SinkFactory: Send + Sync {
    fn create(
        &self,
        target: &SinkTarget,
        locator: &StreamLocator,
        policy: &PlaybackPolicy,
    ) -> anyhow::Result<Box<dyn VideoSink>>;
}

/// The local camera, if the host has one.
pub trait LocalCamera: Send + Sync {
    fn open(&self) -> anyhow::Result<StreamLocator>;
}
