//! Seams toward the external signaling stack
//!
//! The device layer orchestrates; it does not speak SIP or WebRTC itself.
//! Everything below this module (transactions, dialogs, SDP offer/answer,
//! ICE, the WebSocket transport) is provided by an implementation of these
//! traits:
//!
//! ```text
//! ┌──────────────────────────┐
//! │      Device / Call       │  ◄── this crate
//! └──────┬───────────┬───────┘
//!        │           │
//! ┌──────▼─────┐ ┌───▼──────────────┐
//! │ UserAgent  │ │ SignalingSession │ ──► DescriptionHandler ──► PeerConnection
//! └────────────┘ └──────────────────┘
//! ```
//!
//! Notifications flow upward through unbounded channels handed out once by
//! [`UserAgent::take_events`] and [`SignalingSession::take_events`]. They are
//! consumed in emission order. Commands flow downward as `async` trait calls.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::UserAgentConfig;
use crate::error::StackResult;
use crate::media::{AudioSink, MediaTrack};
use crate::registration::{RegisterOptions, UnregisterOptions};

// ===== WIRE-LEVEL VALUE TYPES =====

/// Ordered SIP header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipHeaders(Vec<(String, String)>);

impl SipHeaders {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, keeping any existing values for the same name
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for SipHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// A SIP request as exposed by the signaling stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipRequest {
    /// Request method (INVITE, MESSAGE, INFO, ...)
    pub method: String,
    /// Request-URI
    pub uri: String,
    pub headers: SipHeaders,
    pub body: Option<String>,
}

impl SipRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: SipHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// A SIP response as exposed by the signaling stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipResponse {
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: SipHeaders,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason_phrase: impl Into<String>) -> Self {
        Self {
            status_code,
            reason_phrase: reason_phrase.into(),
            headers: SipHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    /// 18x, the class that may carry early media
    pub fn is_session_progress_class(&self) -> bool {
        (180..190).contains(&self.status_code)
    }

    /// Non-empty body present
    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Whether any `Require` header lists `option_tag`
    pub fn requires(&self, option_tag: &str) -> bool {
        self.headers
            .get_all("Require")
            .flat_map(|v| v.split(','))
            .any(|tag| tag.trim().eq_ignore_ascii_case(option_tag))
    }
}

/// Either side of a SIP exchange, used where the stack may hand over a request or a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

// ===== COMMAND OPTIONS =====

/// Media constraints requested from the media engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Audio on, video off
    pub const fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Options passed with `invite` and `accept`
#[derive(Debug, Clone)]
pub struct MediaOptions {
    pub constraints: MediaConstraints,
    /// Sink the remote audio should be rendered into
    pub render: Option<Arc<dyn AudioSink>>,
}

impl MediaOptions {
    pub fn audio_only(render: Arc<dyn AudioSink>) -> Self {
        Self {
            constraints: MediaConstraints::audio_only(),
            render: Some(render),
        }
    }
}

/// Options for terminating a session with a specific final response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminateOptions {
    pub status_code: Option<u16>,
    pub reason_phrase: Option<String>,
}

impl TerminateOptions {
    /// 488 Bad Media Description
    pub fn bad_media_description() -> Self {
        Self {
            status_code: Some(488),
            reason_phrase: Some(FailureCause::BadMediaDescription.to_string()),
        }
    }
}

/// Cause attached when this layer forces a session into the failed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    BadMediaDescription,
    Other(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::BadMediaDescription => write!(f, "Bad Media Description"),
            FailureCause::Other(cause) => write!(f, "{}", cause),
        }
    }
}

// ===== NOTIFICATIONS =====

/// Notifications emitted by a signaling session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Local media acquired, the request is about to go out
    Connecting,
    /// Provisional response received
    Progress(SipResponse),
    /// Far end accepted
    Accepted(Option<SipResponse>),
    /// DTMF received
    Dtmf {
        request: Option<SipRequest>,
        tone: String,
    },
    Muted,
    Unmuted,
    Cancel,
    Refer {
        target: Option<String>,
        request: Option<SipRequest>,
    },
    Replaced {
        new_session_id: Option<String>,
    },
    Rejected {
        response: Option<SipResponse>,
        cause: Option<String>,
    },
    Failed {
        response: Option<SipResponse>,
        cause: Option<String>,
    },
    Terminated {
        message: Option<SipMessage>,
        cause: Option<String>,
    },
    Bye {
        request: Option<SipRequest>,
    },
    /// A remote media track was added to the peer connection
    TrackAdded,
}

impl SessionEvent {
    /// Name of the notification as emitted by the stack
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connecting => "connecting",
            SessionEvent::Progress(_) => "progress",
            SessionEvent::Accepted(_) => "accepted",
            SessionEvent::Dtmf { .. } => "dtmf",
            SessionEvent::Muted => "muted",
            SessionEvent::Unmuted => "unmuted",
            SessionEvent::Cancel => "cancel",
            SessionEvent::Refer { .. } => "refer",
            SessionEvent::Replaced { .. } => "replaced",
            SessionEvent::Rejected { .. } => "rejected",
            SessionEvent::Failed { .. } => "failed",
            SessionEvent::Terminated { .. } => "terminated",
            SessionEvent::Bye { .. } => "bye",
            SessionEvent::TrackAdded => "trackAdded",
        }
    }
}

/// Notifications emitted by the user agent / transport layer
#[derive(Debug, Clone)]
pub enum UserAgentEvent {
    Connecting { attempts: u32 },
    Connected,
    Disconnected,
    Registered,
    Unregistered {
        cause: Option<String>,
        response: Option<SipResponse>,
    },
    RegistrationFailed {
        cause: Option<String>,
        response: Option<SipResponse>,
    },
    /// Inbound INVITE, already wrapped in a server-side session
    Invite(Arc<dyn SignalingSession>),
    /// Out-of-dialog MESSAGE
    Message(SipRequest),
}

// ===== COLLABORATOR TRAITS =====

/// One signaling session (one call leg) inside the signaling stack
#[async_trait]
pub trait SignalingSession: Send + Sync + fmt::Debug {
    /// Stack-assigned identifier, used for logging
    fn id(&self) -> String;

    /// Hand over the notification channel. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;

    async fn accept(&self, options: MediaOptions) -> StackResult<()>;
    async fn reject(&self) -> StackResult<()>;
    async fn terminate(&self, options: TerminateOptions) -> StackResult<()>;
    async fn mute(&self) -> StackResult<()>;
    async fn unmute(&self) -> StackResult<()>;
    async fn hold(&self) -> StackResult<()>;
    async fn unhold(&self) -> StackResult<()>;
    async fn dtmf(&self, digits: &str) -> StackResult<()>;
    async fn refer(&self, target: &str) -> StackResult<()>;

    /// Mark the session failed without sending anything
    async fn fail(&self, response: Option<SipResponse>, cause: FailureCause);

    /// Force the session status to early media
    fn enter_early_media(&self);

    /// An offer is outstanding
    fn has_offer(&self) -> bool;
    /// A dialog has been established
    fn has_dialog(&self) -> bool;
    /// A remote answer has been confirmed
    fn has_answer(&self) -> bool;

    fn description_handler(&self) -> Option<Arc<dyn DescriptionHandler>>;

    /// The session's own request (client sessions)
    fn request(&self) -> Option<SipRequest>;
    /// The request of the server transaction that created the session
    fn transaction_request(&self) -> Option<SipRequest>;
}

/// Media negotiation handler attached to a session
#[async_trait]
pub trait DescriptionHandler: Send + Sync {
    /// Whether a body of this content type can be processed
    fn has_description(&self, content_type: Option<&str>) -> bool;

    /// Apply a remote session description
    async fn set_description(&self, body: &str) -> StackResult<()>;

    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>>;
}

/// Inbound side of an RTP receiver
#[derive(Debug, Clone)]
pub struct RtpReceiver {
    pub track: Option<MediaTrack>,
}

/// The peer connection underneath a session
pub trait PeerConnection: Send + Sync {
    fn receivers(&self) -> Vec<RtpReceiver>;
}

/// The user agent: transport connection, registration and session factory
#[async_trait]
pub trait UserAgent: Send + Sync + fmt::Debug {
    /// Hand over the notification channel. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UserAgentEvent>>;

    async fn start(&self) -> StackResult<()>;
    async fn stop(&self) -> StackResult<()>;

    /// Stack introspection. `Device` does not consult it: its connection
    /// and registration state follow notifications only.
    fn is_connected(&self) -> bool;
    fn is_registered(&self) -> bool;

    async fn register(&self, options: &RegisterOptions) -> StackResult<()>;
    async fn unregister(&self, options: &UnregisterOptions) -> StackResult<()>;

    /// Create an outbound session toward `destination`
    async fn invite(
        &self,
        destination: &str,
        options: MediaOptions,
    ) -> StackResult<Arc<dyn SignalingSession>>;
}

/// Builds the user agent from the derived configuration
pub trait UserAgentFactory: Send + Sync {
    fn create(&self, config: UserAgentConfig) -> StackResult<Arc<dyn UserAgent>>;
}

impl<F> UserAgentFactory for F
where
    F: Fn(UserAgentConfig) -> StackResult<Arc<dyn UserAgent>> + Send + Sync,
{
    fn create(&self, config: UserAgentConfig) -> StackResult<Arc<dyn UserAgent>> {
        self(config)
    }
}
