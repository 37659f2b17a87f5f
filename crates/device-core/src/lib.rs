//! # Device Core - WebRTC SIP Device Layer
//!
//! This crate sits between an application and a SIP signaling stack with a
//! WebRTC media engine. It lets the application place, receive and control
//! voice calls without handling raw protocol notifications itself:
//!
//! - **Device**: transport connection, registration, a single active-call slot
//! - **Call**: a simplified status view over one signaling session, early
//!   media coordination and remote audio attachment
//!
//! The signaling stack, media engine and audio output are supplied by the
//! application through the traits in [`stack`] and [`media`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_device_core::{
//!     CallEvent, Device, DeviceConfig, DeviceEvent, RegisterOptions, StackResult,
//!     UserAgent, UserAgentConfig,
//! };
//!
//! fn signaling_stack(_config: UserAgentConfig) -> StackResult<Arc<dyn UserAgent>> {
//!     # unimplemented!()
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("sip.example.com", 7443)
//!         .with_credentials("alice", "secret")
//!         .with_path("/ws");
//!
//!     let device = Device::builder(config)
//!         .user_agent_factory(signaling_stack)
//!         .build()
//!         .await?;
//!
//!     let mut events = device.subscribe();
//!     device.start_ws().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::WsConnected => device.register(RegisterOptions::default()).await?,
//!             DeviceEvent::Registered => break,
//!             _ => {}
//!         }
//!     }
//!
//!     let call = device.initiate_call("12065551111").await?;
//!     let mut call_events = call.subscribe();
//!     while let Some(event) = call_events.recv().await {
//!         if let CallEvent::Accepted { .. } = event {
//!             call.send_digits("1234#").await?;
//!             call.terminate().await?;
//!         }
//!     }
//!
//!     device.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             Application                  │
//! └───────┬──────────────────────▲───────────┘
//!         │ commands             │ DeviceEvent / CallEvent
//! ┌───────▼──────────────────────┴───────────┐
//! │ Device ──owns──► Call (active slot)      │ ◄── This crate
//! └───────┬──────────────────────▲───────────┘
//!         │ UserAgent /          │ UserAgentEvent /
//!         │ SignalingSession     │ SessionEvent
//! ┌───────▼──────────────────────┴───────────┐
//! │ SIP signaling stack + WebRTC media       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Logging goes through `tracing`; the crate never installs a subscriber.

pub mod call;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod media;
pub mod registration;
pub mod stack;

// Re-export main types
pub use call::early_media::{EarlyMediaOutcome, EarlyMediaPoller};
pub use call::{Call, CallContext, CallDirection, CallEnd, CallStatus, EndReason};
pub use config::{DeviceConfig, EarlyMediaPolicy, LogLevel, TurnServer, UserAgentConfig};
pub use device::preflight::{ConnectivityProbe, HttpProbe};
pub use device::{Device, DeviceBuilder};
pub use error::{DeviceError, DeviceResult, StackError, StackResult};
pub use events::{CallEvent, DeviceEvent, EventBus, EventStream};
pub use media::{AudioSink, AudioSinkFactory, HeadlessSinkFactory, MediaAttachment};
pub use registration::{
    ConnectionState, RegisterOptions, RegistrationState, UnregisterOptions, UnregisterStrategy,
};
pub use stack::{
    SessionEvent, SignalingSession, SipRequest, SipResponse, UserAgent, UserAgentEvent,
    UserAgentFactory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
