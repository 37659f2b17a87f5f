//! Device connection and registration lifecycle
//!
//! A [`Device`] owns the user agent, tracks the transport connection and the
//! registrar binding, and holds a single active-call slot.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │   Client Application    │
//! └───────────┬─────────────┘
//!             │ commands            ▲ DeviceEvent
//! ┌───────────▼─────────────────────┴───┐
//! │ Device                              │ ◄── This Module
//! │  connection: ConnectionState        │
//! │  registration: RegistrationState    │
//! │  active call slot: Option<Call>     │
//! └───────────┬─────────────────────▲───┘
//!             │ start / register /  │ UserAgentEvent
//!             │ invite              │ (pump task)
//! ┌───────────▼─────────────────────┴───┐
//! │ UserAgent (signaling stack)         │
//! └─────────────────────────────────────┘
//! ```
//!
//! Connection and registration state change only when the user agent
//! reports them. [`Device::start_ws`] followed by an immediate
//! [`Device::is_ws_connected`] still reports the previous state.
//!
//! The slot holds at most one call. [`Device::initiate_call`] and every
//! inbound INVITE replace it; the replaced call is not terminated, so the
//! application should end it first.

pub mod builder;
pub mod preflight;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::call::{Call, CallContext};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::events::{DeviceEvent, EventBus, EventStream};
use crate::media::AudioSinkFactory;
use crate::registration::{
    ConnectionState, RegisterOptions, RegistrationState, UnregisterOptions, UnregisterStrategy,
};
use crate::stack::{SignalingSession, UserAgent, UserAgentEvent};

pub use builder::DeviceBuilder;

/// A registered endpoint able to place and receive one call at a time
pub struct Device {
    config: DeviceConfig,
    user_agent: Arc<dyn UserAgent>,
    call_context: CallContext,
    connection: RwLock<ConnectionState>,
    registration: RwLock<RegistrationState>,
    active_call: RwLock<Option<Arc<Call>>>,
    events: EventBus<DeviceEvent>,
}

impl Device {
    /// Start building a device from `config`
    pub fn builder(config: DeviceConfig) -> DeviceBuilder {
        DeviceBuilder::new(config)
    }

    /// Wire a device around an already created user agent
    ///
    /// The user agent notification pump is spawned here, so this fails with
    /// `DeviceError::Internal` outside a tokio runtime.
    pub(crate) fn new(
        config: DeviceConfig,
        user_agent: Arc<dyn UserAgent>,
        sink_factory: Arc<dyn AudioSinkFactory>,
    ) -> DeviceResult<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| DeviceError::internal("a device requires a tokio runtime"))?;

        let call_context = CallContext::new(sink_factory, config.early_media);
        let device = Arc::new(Device {
            config,
            user_agent,
            call_context,
            connection: RwLock::new(ConnectionState::Disconnected),
            registration: RwLock::new(RegistrationState::Unregistered),
            active_call: RwLock::new(None),
            events: EventBus::new(),
        });

        match device.user_agent.take_events() {
            Some(rx) => {
                runtime.spawn(pump_user_agent_events(Arc::downgrade(&device), rx));
            }
            None => error!("User agent notifications already taken, device state will not update"),
        }

        Ok(device)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ===== TRANSPORT =====

    /// Ask the user agent to connect its transport
    pub async fn start_ws(&self) -> DeviceResult<()> {
        debug!("Starting transport for {}", self.config.aor());
        self.user_agent.start().await?;
        Ok(())
    }

    /// Ask the user agent to disconnect its transport
    pub async fn stop_ws(&self) -> DeviceResult<()> {
        debug!("Stopping transport for {}", self.config.aor());
        self.user_agent.stop().await?;
        Ok(())
    }

    /// Whether the transport last reported itself connected
    pub fn is_ws_connected(&self) -> bool {
        *self.connection.read() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    // ===== REGISTRATION =====

    /// Issue a REGISTER
    ///
    /// From `Unregistered` or `Failed` the state moves to `Registering` until
    /// the user agent reports the outcome. A refresh of an active binding
    /// stays `Registered` until a notification says otherwise.
    pub async fn register(&self, options: RegisterOptions) -> DeviceResult<()> {
        info!("Registering {}", self.config.aor());
        let previous = {
            let mut registration = self.registration.write();
            if registration.is_registered() {
                None
            } else {
                Some(std::mem::replace(&mut *registration, RegistrationState::Registering))
            }
        };

        if let Err(e) = self.user_agent.register(&options).await {
            if let Some(previous) = previous {
                let mut registration = self.registration.write();
                if *registration == RegistrationState::Registering {
                    *registration = previous;
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the registrar binding
    ///
    /// Routed according to [`DeviceConfig::unregister_strategy`].
    pub async fn unregister(&self, options: UnregisterOptions) -> DeviceResult<()> {
        info!("Unregistering {} (all bindings: {})", self.config.aor(), options.all);
        match self.config.unregister_strategy {
            UnregisterStrategy::Distinct => self.user_agent.unregister(&options).await?,
            UnregisterStrategy::ViaRegister => {
                warn!("Unregistering through the register primitive, the binding may be refreshed instead of removed");
                self.user_agent.register(&options.as_register_options()).await?
            }
        }
        Ok(())
    }

    /// Whether the registrar last reported the binding as active
    pub fn is_registered(&self) -> bool {
        self.registration.read().is_registered()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.read().clone()
    }

    // ===== CALLS =====

    /// Place a call to `destination` and install it as the active call
    pub async fn initiate_call(&self, destination: &str) -> DeviceResult<Arc<Call>> {
        let call = Call::outgoing(self.user_agent.clone(), self.call_context.clone());
        call.make_call(destination).await?;
        self.install_call(call.clone());
        Ok(call)
    }

    /// The call currently in the slot, if any
    pub fn active_call(&self) -> Option<Arc<Call>> {
        self.active_call.read().clone()
    }

    /// Answer the call in the slot
    pub async fn answer_active_call(&self) -> DeviceResult<()> {
        let call = self.active_call().ok_or(DeviceError::NoActiveCall)?;
        call.answer().await
    }

    /// Transfer the active call to `target`
    pub async fn refer_number(&self, target: &str) -> DeviceResult<()> {
        let call = self.active_call().ok_or(DeviceError::NoActiveCall)?;
        call.refer(target).await
    }

    /// End the active call, if still live, and stop the transport
    pub async fn shutdown(&self) -> DeviceResult<()> {
        if let Some(call) = self.active_call() {
            if !call.is_ended() {
                if let Err(e) = call.terminate().await {
                    warn!("Failed to terminate call {} during shutdown: {}", call.id(), e);
                }
            }
        }
        self.stop_ws().await
    }

    fn install_call(&self, call: Arc<Call>) {
        let previous = self.active_call.write().replace(call);
        if let Some(previous) = previous {
            if !previous.is_ended() {
                warn!("Replacing call {} that has not ended", previous.id());
            }
        }
    }

    // ===== NOTIFICATIONS =====

    /// Subscribe to this device's notifications
    pub fn subscribe(&self) -> EventStream<DeviceEvent> {
        self.events.subscribe()
    }

    /// Apply one user agent notification
    ///
    /// Called by the device's notification pump in emission order.
    pub fn handle_user_agent_event(&self, event: UserAgentEvent) {
        let event = match event {
            UserAgentEvent::Connecting { attempts } => {
                debug!("Transport connecting (attempt {})", attempts);
                *self.connection.write() = ConnectionState::Connecting;
                DeviceEvent::WsConnecting { attempts }
            }
            UserAgentEvent::Connected => {
                info!("Transport connected");
                *self.connection.write() = ConnectionState::Connected;
                DeviceEvent::WsConnected
            }
            UserAgentEvent::Disconnected => {
                info!("Transport disconnected");
                *self.connection.write() = ConnectionState::Disconnected;
                DeviceEvent::WsDisconnected
            }
            UserAgentEvent::Registered => {
                info!("Registered as {}", self.config.aor());
                *self.registration.write() = RegistrationState::Registered;
                DeviceEvent::Registered
            }
            UserAgentEvent::Unregistered { cause, response } => {
                info!("Unregistered {}", self.config.aor());
                *self.registration.write() = RegistrationState::Unregistered;
                DeviceEvent::Unregistered { cause, response }
            }
            UserAgentEvent::RegistrationFailed { cause, response } => {
                warn!("Registration failed for {}: {:?}", self.config.aor(), cause);
                *self.registration.write() = RegistrationState::Failed {
                    cause: cause.clone(),
                    response: response.clone(),
                };
                DeviceEvent::RegistrationFailed { cause, response }
            }
            UserAgentEvent::Invite(session) => match self.accept_invite(session) {
                Some(call) => DeviceEvent::IncomingInvite { call },
                None => return,
            },
            UserAgentEvent::Message(message) => DeviceEvent::Message { message },
        };

        self.events.emit(event);
    }

    fn accept_invite(&self, session: Arc<dyn SignalingSession>) -> Option<Arc<Call>> {
        let call = Call::incoming(self.call_context.clone());
        if let Err(e) = call.incoming_call(session.clone()) {
            error!("Could not bind inbound session {}: {}", session.id(), e);
            return None;
        }
        info!("Incoming call {} on session {}", call.id(), session.id());
        self.install_call(call.clone());
        Some(call)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("aor", &self.config.aor())
            .field("connection", &self.connection_state())
            .field("registration", &self.registration_state())
            .field("active_call", &self.active_call())
            .finish_non_exhaustive()
    }
}

async fn pump_user_agent_events(device: Weak<Device>, mut rx: mpsc::UnboundedReceiver<UserAgentEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(device) = device.upgrade() else {
            debug!("Device dropped, stopping user agent notification pump");
            break;
        };
        device.handle_user_agent_event(event);
    }
}
