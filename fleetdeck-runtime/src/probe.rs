use std::time::Duration;

use fleetdeck_core::{DeviceAddress, StreamEndpoints};
use fleetdeck_engine::traits::ReadinessProbe;
use fleetdeck_providers::probe::check_ready;
use fleetdeck_providers::runtime::HttpExecutor;

/// Readiness probe against the coordinator's `check_ready` resource.
pub struct HttpReadinessProbe {
    http: HttpExecutor,
    endpoints: StreamEndpoints,
}

impl HttpReadinessProbe {
    pub fn new(endpoints: StreamEndpoints, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpExecutor::new(timeout)?,
            endpoints,
        })
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn is_ready(&self, address: &DeviceAddress) -> anyhow::Result<bool> {
        check_ready(&self.http, &self.endpoints, address).await
    }
}
