use fleetdeck_engine::traits::EventChannel;
use fleetdeck_providers::coordinator::CoordinatorClient;
use serde_json::Value;

/// Exposes the coordinator client to the engine as its outbound channel.
#[derive(Clone)]
pub struct CoordinatorChannel {
    client: CoordinatorClient,
}

impl CoordinatorChannel {
    pub fn new(client: CoordinatorClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &CoordinatorClient {
        &self.client
    }
}

impl EventChannel for CoordinatorChannel {
    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()> {
        log::debug!("-> {event}");
        self.client.emit(event, payload)
    }
}
