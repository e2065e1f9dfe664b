use std::sync::Arc;

use anyhow::Context;
use fleetdeck_core::protocol::{INBOUND_EVENTS, Inbound, decode_inbound};
use fleetdeck_core::{AppConfig, StreamEndpoints};
use fleetdeck_engine::engine::{CoreConfig, FleetCore};
use fleetdeck_engine::traits::SinkFactory;
use fleetdeck_providers::coordinator::{CoordinatorClient, CoordinatorConfig, Subscription};
use tokio::sync::mpsc;

use crate::channel::CoordinatorChannel;
use crate::defaults::default_player;
use crate::driver::{DriverConfig, FleetHandle, FleetRuntime};
use crate::local_camera::ConfiguredCamera;
use crate::probe::HttpReadinessProbe;
use crate::sinks::{HeadlessSinkFactory, PlayerSinkFactory};

/// Routes every inbound coordinator event through the decoder into one
/// ordered queue. Entries that fail to decode are logged and dropped.
pub fn bind_inbound(client: &CoordinatorClient) -> (mpsc::UnboundedReceiver<Inbound>, Vec<Subscription>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscriptions = INBOUND_EVENTS
        .iter()
        .map(|&event| {
            let tx = tx.clone();
            client.subscribe(event, move |data| match decode_inbound(event, data) {
                Ok(msg) => {
                    let _ = tx.send(msg);
                }
                Err(e) => log::warn!("dropping {event}: {e}"),
            })
        })
        .collect();
    (rx, subscriptions)
}

/// External player when one is configured (or `force_player`), otherwise a
/// headless registry.
pub fn sink_factory_for(cfg: &AppConfig, force_player: bool) -> Arc<dyn SinkFactory> {
    match (&cfg.player, force_player) {
        (Some(player), _) => Arc::new(PlayerSinkFactory::new(player.clone())),
        (None, true) => Arc::new(PlayerSinkFactory::new(default_player())),
        (None, false) => Arc::new(HeadlessSinkFactory::new()),
    }
}

/// Connects to the coordinator and starts the fleet driver.
pub async fn connect_fleet(cfg: &AppConfig, sinks: Arc<dyn SinkFactory>) -> anyhow::Result<FleetHandle> {
    let client = CoordinatorClient::connect(CoordinatorConfig::new(&cfg.coordinator_url)?)
        .await
        .with_context(|| format!("connect coordinator at {}", cfg.coordinator_url))?;
    log::info!("connected to coordinator at {}", cfg.coordinator_url);

    let (inbound, subscriptions) = bind_inbound(&client);

    let core = FleetCore::new(
        CoreConfig::from_app(cfg),
        Arc::new(CoordinatorChannel::new(client.clone())),
        sinks,
    );
    let probe = HttpReadinessProbe::new(
        StreamEndpoints::new(cfg.stream_base_url.clone()),
        cfg.probe_timeout(),
    )?;
    let camera = ConfiguredCamera::new(cfg.local_camera.clone());

    let closed = async move { client.closed().await };
    Ok(FleetRuntime::new(
        core,
        Arc::new(probe),
        Arc::new(camera),
        DriverConfig::from_app(cfg),
    )
    .with_subscriptions(subscriptions)
    .spawn(inbound, closed))
}
