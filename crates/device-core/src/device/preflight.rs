//! Connectivity pre-flight
//!
//! Some WebSocket clients fail the first secure upgrade to a host they have
//! never talked HTTP to. Before the device starts its transport it fires one
//! plain HTTPS request at the signaling host to warm that path up. The probe
//! is best effort: it runs detached, its outcome is only logged, and it
//! never delays or fails device construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::error::{DeviceError, DeviceResult, StackError, StackResult};

/// Upper bound for one probe request
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A best-effort reachability check against the signaling host
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, url: &Url) -> StackResult<()>;
}

/// Probe issuing a single HTTPS GET with `reqwest`
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self, url: &Url) -> StackResult<()> {
        let response = self
            .client
            .get(url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| StackError::transport(format!("pre-flight request failed: {}", e)))?;
        debug!("Pre-flight {} answered {}", url, response.status());
        Ok(())
    }
}

/// Run `probe` against `url` in the background, swallowing any failure
///
/// Only fails when there is no tokio runtime to run the probe on.
pub(crate) fn spawn_probe(probe: Arc<dyn ConnectivityProbe>, url: Url) -> DeviceResult<()> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| DeviceError::internal("the pre-flight probe requires a tokio runtime"))?;

    runtime.spawn(async move {
        if let Err(e) = probe.probe(&url).await {
            // Expected for hosts that only speak WebSocket
            info!("Pre-flight request to {} failed: {}", url, e);
        }
    });
    Ok(())
}
