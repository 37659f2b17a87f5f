//! Builder for [`Device`]
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_device_core::{DeviceBuilder, DeviceConfig, UserAgentConfig, UserAgent, StackResult};
//!
//! fn my_user_agent(_config: UserAgentConfig) -> StackResult<Arc<dyn UserAgent>> {
//!     // wire up the real signaling stack here
//!     # unimplemented!()
//! }
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::new("sip.example.com", 7443).with_credentials("alice", "secret");
//! let device = DeviceBuilder::new(config)
//!     .user_agent_factory(my_user_agent)
//!     .build()
//!     .await
//!     .expect("valid configuration");
//! device.start_ws().await.expect("transport start");
//! # })
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::media::{AudioSinkFactory, HeadlessSinkFactory};
use crate::stack::UserAgentFactory;

use super::preflight::{spawn_probe, ConnectivityProbe, HttpProbe};
use super::Device;

/// Fluent builder for a [`Device`]
///
/// Only the configuration and a user agent factory are required. The audio
/// sink factory defaults to [`HeadlessSinkFactory`] and the pre-flight probe
/// to [`HttpProbe`].
pub struct DeviceBuilder {
    config: DeviceConfig,
    user_agent_factory: Option<Arc<dyn UserAgentFactory>>,
    sink_factory: Arc<dyn AudioSinkFactory>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl DeviceBuilder {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            user_agent_factory: None,
            sink_factory: Arc::new(HeadlessSinkFactory),
            probe: Some(Arc::new(HttpProbe::new())),
        }
    }

    /// Factory that builds the user agent from the derived configuration
    pub fn user_agent_factory(mut self, factory: impl UserAgentFactory + 'static) -> Self {
        self.user_agent_factory = Some(Arc::new(factory));
        self
    }

    /// Factory for the per-call audio sinks
    pub fn sink_factory(mut self, factory: impl AudioSinkFactory + 'static) -> Self {
        self.sink_factory = Arc::new(factory);
        self
    }

    /// Replace the connectivity pre-flight probe
    pub fn probe(mut self, probe: impl ConnectivityProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Skip the connectivity pre-flight entirely
    pub fn without_probe(mut self) -> Self {
        self.probe = None;
        self
    }

    /// Validate the configuration, fire the pre-flight and create the user agent
    ///
    /// # Errors
    ///
    /// * `DeviceError::MissingParameter` - host or port missing, or no user agent factory
    /// * `DeviceError::Configuration` - the configuration cannot produce a transport URL
    /// * `DeviceError::Stack` - the user agent factory failed
    /// * `DeviceError::Internal` - polled outside a tokio runtime
    pub async fn build(self) -> DeviceResult<Arc<Device>> {
        self.config.validate()?;
        let factory = self
            .user_agent_factory
            .ok_or(DeviceError::MissingParameter {
                name: "user_agent_factory",
            })?;

        if let Some(probe) = self.probe {
            spawn_probe(probe, self.config.probe_url()?)?;
        }

        let ua_config = self.config.user_agent_config()?;
        debug!("Creating user agent for {} via {:?}", ua_config.uri, ua_config.ws_servers);
        let user_agent = factory.create(ua_config)?;

        let device = Device::new(self.config, user_agent, self.sink_factory)?;
        info!("Device ready for {}", device.config().aor());
        Ok(device)
    }
}
