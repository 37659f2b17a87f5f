//! Transport connection and registration state
//!
//! Both state machines are owned by the `Device` and are driven only by
//! user agent notifications. The `start_ws`/`stop_ws` and
//! `register`/`unregister` operations are commands: the state they request
//! becomes visible once the matching notification arrives.
//!
//! # Connection
//!
//! `Disconnected` → `Connecting` → `Connected`, and back to `Disconnected`
//! whenever the transport drops.
//!
//! # Registration
//!
//! `Unregistered` → `Registering` → `Registered`, or `Failed` with the cause
//! and the triggering response when the registrar rejects the binding.
//! Periodic re-registration performed by the stack may fail at any time,
//! so `Registered` can move to `Failed` without any call on our side.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_device_core::registration::{RegistrationState, UnregisterOptions};
//!
//! let state = RegistrationState::Registered;
//! assert!(state.is_registered());
//! assert_eq!(state.to_string(), "registered");
//!
//! let options = UnregisterOptions::default().all_bindings();
//! assert!(options.all);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stack::SipResponse;

/// State of the signaling transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// State of the registrar binding
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    /// A REGISTER has been issued and no outcome has arrived yet
    Registering,
    Registered,
    /// The registrar refused the binding, or a refresh failed
    Failed {
        cause: Option<String>,
        response: Option<SipResponse>,
    },
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RegistrationState::Failed { .. })
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "unregistered"),
            RegistrationState::Registering => write!(f, "registering"),
            RegistrationState::Registered => write!(f, "registered"),
            RegistrationState::Failed { cause: Some(cause), .. } => {
                write!(f, "registration-failed ({})", cause)
            }
            RegistrationState::Failed { cause: None, .. } => write!(f, "registration-failed"),
        }
    }
}

/// Options for a REGISTER
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOptions {
    /// Raw header lines added to the request (`"X-Tenant: acme"`)
    #[serde(default)]
    pub extra_headers: Vec<String>,
}

impl RegisterOptions {
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.extra_headers.push(header.into());
        self
    }
}

/// Options for removing the registrar binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterOptions {
    #[serde(default)]
    pub extra_headers: Vec<String>,
    /// Remove every binding for the address of record, not just this contact
    #[serde(default)]
    pub all: bool,
}

impl UnregisterOptions {
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.extra_headers.push(header.into());
        self
    }

    pub fn all_bindings(mut self) -> Self {
        self.all = true;
        self
    }

    /// Payload used when unregistration is routed through the register primitive
    pub(crate) fn as_register_options(&self) -> RegisterOptions {
        RegisterOptions {
            extra_headers: self.extra_headers.clone(),
        }
    }
}

/// Which user agent primitive `Device::unregister` issues
///
/// The legacy web SDK called `register` for both operations and only varied
/// the options payload. That looks like a defect, so the distinct primitive
/// is the default; `ViaRegister` keeps the old coupling until product signs
/// off on the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnregisterStrategy {
    /// Issue the user agent's `unregister` primitive
    #[default]
    Distinct,
    /// Issue `register` with the unregister headers (legacy behavior)
    ViaRegister,
}
