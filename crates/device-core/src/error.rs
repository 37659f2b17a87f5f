//! Error types for the device layer
//!
//! Two error types live here:
//!
//! - [`DeviceError`] is what the public `Device` and `Call` operations return.
//! - [`StackError`] is what the external collaborators (user agent, signaling
//!   session, description handler) return from their command primitives. It
//!   converts into [`DeviceError::Stack`] with `?`.
//!
//! Misuse of a direction-specific operation (for example answering an
//! outgoing call) is not an error: it is logged and ignored. Construction
//! problems are fatal and surface as [`DeviceError::MissingParameter`] or
//! [`DeviceError::Configuration`].

use thiserror::Error;
use uuid::Uuid;

/// Result type for device and call operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type for collaborator primitives
pub type StackResult<T> = Result<T, StackError>;

/// Errors that can occur in the device layer
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A required construction parameter was absent
    #[error("Device: missing '{name}' parameter")]
    MissingParameter { name: &'static str },

    /// Configuration was present but unusable
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// `make_call` or `incoming_call` was invoked on a call that already owns a session
    #[error("Call {call_id} is already bound to a signaling session")]
    SessionAlreadyBound { call_id: Uuid },

    /// A session-binding operation does not match the direction the call was created with
    #[error("{operation} is not valid on {direction} call {call_id}")]
    WrongDirection {
        call_id: Uuid,
        operation: &'static str,
        direction: crate::call::CallDirection,
    },

    /// The call has no signaling session yet
    #[error("Call {call_id} has no signaling session")]
    NoSession { call_id: Uuid },

    /// A control operation was requested after the call reached `ended`
    #[error("Call {call_id} has ended, {operation} ignored")]
    CallEnded {
        call_id: Uuid,
        operation: &'static str,
    },

    /// A device-level call operation was requested with an empty call slot
    #[error("No active call")]
    NoActiveCall,

    /// The signaling stack rejected a command
    #[error("Signaling stack error: {0}")]
    Stack(#[from] StackError),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DeviceError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from a construction-time configuration problem
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DeviceError::MissingParameter { .. } | DeviceError::Configuration { .. }
        )
    }
}

/// Errors reported by the signaling stack, media engine or transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StackError {
    /// Transport (WebSocket) level failure
    #[error("transport: {0}")]
    Transport(String),

    /// The session refused or failed a command
    #[error("session: {0}")]
    Session(String),

    /// The media negotiation handler could not apply a session description
    #[error("session description: {0}")]
    Description(String),

    /// The collaborator does not implement the requested primitive
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl StackError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session(message.into())
    }

    /// Create a description error
    pub fn description(message: impl Into<String>) -> Self {
        Self::Description(message.into())
    }
}
