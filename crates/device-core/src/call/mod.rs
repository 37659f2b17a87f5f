//! Call session state machine
//!
//! A [`Call`] wraps exactly one signaling session and folds the many
//! notifications that session emits into a small status view:
//!
//! ```text
//!            connecting           accepted
//!  Starting ───────────► Initiating ───────► Connected
//!     │  └──────────── accepted ────────────────▲  │
//!     │                     │                      │
//!     │   cancel / rejected / failed / terminated / bye
//!     └─────────────────────┴──────────┬───────────┘
//!                                      ▼
//!                                    Ended   (terminal, idempotent)
//! ```
//!
//! Every raw session notification is also re-surfaced verbatim as a
//! [`CallEvent`], followed by [`CallEvent::StatusChanged`] when the status
//! moved. Notifications are processed strictly in the order the session
//! emitted them.
//!
//! Besides the status, a call coordinates two pieces of media work:
//!
//! - **Early media.** A qualifying 18x response forces the session into early
//!   media and starts an [`early_media::EarlyMediaPoller`].
//! - **Remote audio.** When the media engine reports a remote track, the
//!   inbound tracks are bound to the call's own audio sink with
//!   [`attach_remote_media`].
//!
//! # Direction
//!
//! The direction is fixed at construction. Outgoing calls bind their session
//! through [`Call::make_call`], incoming calls through
//! [`Call::incoming_call`]. `answer` and `reject` are meaningful on incoming
//! calls only; on an outgoing call they log a warning and do nothing.
//!
//! # Requested vs. confirmed state
//!
//! [`Call::is_muted`] and [`Call::is_on_hold`] report the last *requested*
//! state and change as soon as [`Call::mute`] / [`Call::hold`] is called.
//! [`Call::mute_confirmed`] reports what the session last confirmed.

pub mod early_media;

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EarlyMediaPolicy;
use crate::error::{DeviceError, DeviceResult};
use crate::events::{CallEvent, EventBus, EventStream};
use crate::media::{attach_remote_media, AudioSink, AudioSinkFactory, MediaAttachment};
use crate::stack::{
    MediaOptions, SessionEvent, SignalingSession, SipRequest, SipResponse, TerminateOptions,
    UserAgent,
};

use self::early_media::{qualifies_for_early_media, EarlyMediaPoller};

/// Direction of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Incoming => write!(f, "incoming"),
            CallDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Simplified call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Created, no signaling progress yet
    Starting,
    /// Signaling in progress (provisional responses, ringing)
    Initiating,
    /// Far end accepted
    Connected,
    /// Terminal
    Ended,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Starting => write!(f, "starting"),
            CallStatus::Initiating => write!(f, "initiating"),
            CallStatus::Connected => write!(f, "connected"),
            CallStatus::Ended => write!(f, "ended"),
        }
    }
}

/// Termination trigger that first ended a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Cancelled,
    Rejected,
    Failed,
    Terminated,
    Bye,
}

/// How and when a call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnd {
    pub reason: EndReason,
    pub cause: Option<String>,
    pub ended_at: DateTime<Utc>,
}

/// Shared collaborators a `Device` hands to every call it creates
#[derive(Clone)]
pub struct CallContext {
    pub sink_factory: Arc<dyn AudioSinkFactory>,
    pub early_media: EarlyMediaPolicy,
}

impl CallContext {
    pub fn new(sink_factory: Arc<dyn AudioSinkFactory>, early_media: EarlyMediaPolicy) -> Self {
        Self {
            sink_factory,
            early_media,
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("early_media", &self.early_media)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct CallFlags {
    muted: bool,
    on_hold: bool,
    mute_confirmed: Option<bool>,
    end: Option<CallEnd>,
    media: Option<MediaAttachment>,
    connected_at: Option<DateTime<Utc>>,
}

/// One voice call bound to one signaling session
pub struct Call {
    id: Uuid,
    direction: CallDirection,
    user_agent: Option<Arc<dyn UserAgent>>,
    context: CallContext,
    status_tx: watch::Sender<CallStatus>,
    session: OnceLock<Arc<dyn SignalingSession>>,
    sink: OnceLock<Arc<dyn AudioSink>>,
    flags: RwLock<CallFlags>,
    events: EventBus<CallEvent>,
    created_at: DateTime<Utc>,
    self_ref: Weak<Call>,
}

impl Call {
    /// Create an outgoing call that will place its session through `user_agent`
    pub fn outgoing(user_agent: Arc<dyn UserAgent>, context: CallContext) -> Arc<Self> {
        Self::new(CallDirection::Outgoing, Some(user_agent), context)
    }

    /// Create an incoming call, to be bound with [`Call::incoming_call`]
    pub fn incoming(context: CallContext) -> Arc<Self> {
        Self::new(CallDirection::Incoming, None, context)
    }

    fn new(
        direction: CallDirection,
        user_agent: Option<Arc<dyn UserAgent>>,
        context: CallContext,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(CallStatus::Starting);
        Arc::new_cyclic(|self_ref| Call {
            id: Uuid::new_v4(),
            direction,
            user_agent,
            context,
            status_tx,
            session: OnceLock::new(),
            sink: OnceLock::new(),
            flags: RwLock::new(CallFlags::default()),
            events: EventBus::new(),
            created_at: Utc::now(),
            self_ref: self_ref.clone(),
        })
    }

    // ===== SESSION BINDING =====

    /// Place the call toward `destination`
    ///
    /// Asks the user agent for an outbound session with audio-only media and
    /// the call's audio sink as the render target, then binds it. Fails if the
    /// call is incoming or already has a session.
    pub async fn make_call(&self, destination: &str) -> DeviceResult<()> {
        self.require_direction(CallDirection::Outgoing, "make_call")?;
        if self.session.get().is_some() {
            return Err(DeviceError::SessionAlreadyBound { call_id: self.id });
        }
        let user_agent = self
            .user_agent
            .as_ref()
            .ok_or_else(|| DeviceError::internal("outgoing call created without a user agent"))?;

        info!("Placing call {} to {}", self.id, destination);
        let session = user_agent
            .invite(destination, MediaOptions::audio_only(self.audio_sink()))
            .await?;
        self.bind(session)
    }

    /// Bind the server-side session created for an inbound INVITE
    ///
    /// Does not send anything to the far end; the application decides with
    /// [`Call::answer`] or [`Call::reject`].
    pub fn incoming_call(&self, session: Arc<dyn SignalingSession>) -> DeviceResult<()> {
        self.require_direction(CallDirection::Incoming, "incoming_call")?;
        self.bind(session)
    }

    fn require_direction(&self, expected: CallDirection, operation: &'static str) -> DeviceResult<()> {
        if self.direction == expected {
            Ok(())
        } else {
            Err(DeviceError::WrongDirection {
                call_id: self.id,
                operation,
                direction: self.direction,
            })
        }
    }

    fn bind(&self, session: Arc<dyn SignalingSession>) -> DeviceResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| DeviceError::internal("binding a session requires a tokio runtime"))?;

        if self.session.set(session.clone()).is_err() {
            return Err(DeviceError::SessionAlreadyBound { call_id: self.id });
        }

        match session.take_events() {
            Some(rx) => {
                runtime.spawn(pump_session_events(self.self_ref.clone(), rx));
            }
            None => {
                warn!(
                    "Session {} notifications already taken, call {} will not track it",
                    session.id(),
                    self.id
                );
            }
        }

        debug!("Call {} bound to session {}", self.id, session.id());
        Ok(())
    }

    // ===== NOTIFICATION HANDLING =====

    /// Apply one session notification
    ///
    /// Called by the call's notification pump in emission order.
    pub fn handle_session_event(&self, event: SessionEvent) {
        debug!("Call {} received session event '{}'", self.id, event.name());
        let previous = self.status();

        let raw = match event {
            SessionEvent::Connecting => {
                self.transition(&[CallStatus::Starting], CallStatus::Initiating);
                Some(CallEvent::Connecting)
            }
            SessionEvent::Progress(response) => {
                self.on_progress(&response);
                Some(CallEvent::Progress { response })
            }
            SessionEvent::Accepted(response) => {
                if self.transition(&[CallStatus::Starting, CallStatus::Initiating], CallStatus::Connected) {
                    self.flags.write().connected_at = Some(Utc::now());
                }
                Some(CallEvent::Accepted { response })
            }
            SessionEvent::Dtmf { request, tone } => Some(CallEvent::Dtmf { request, tone }),
            SessionEvent::Muted => {
                self.flags.write().mute_confirmed = Some(true);
                Some(CallEvent::Muted)
            }
            SessionEvent::Unmuted => {
                self.flags.write().mute_confirmed = Some(false);
                Some(CallEvent::Unmuted)
            }
            SessionEvent::Cancel => {
                self.end(EndReason::Cancelled, None);
                Some(CallEvent::Cancel)
            }
            SessionEvent::Refer { target, request } => Some(CallEvent::Refer { target, request }),
            SessionEvent::Replaced { new_session_id } => Some(CallEvent::Replaced { new_session_id }),
            SessionEvent::Rejected { response, cause } => {
                self.end(EndReason::Rejected, cause.clone());
                Some(CallEvent::Rejected { response, cause })
            }
            SessionEvent::Failed { response, cause } => {
                self.end(EndReason::Failed, cause.clone());
                Some(CallEvent::Failed { response, cause })
            }
            SessionEvent::Terminated { message, cause } => {
                self.end(EndReason::Terminated, cause.clone());
                Some(CallEvent::Terminated { message, cause })
            }
            SessionEvent::Bye { request } => {
                self.end(EndReason::Bye, None);
                Some(CallEvent::Bye { request })
            }
            SessionEvent::TrackAdded => {
                self.on_track_added();
                None
            }
        };

        if let Some(raw) = raw {
            self.events.emit(raw);
        }

        let current = self.status();
        if current != previous {
            info!("Call {} status {} -> {}", self.id, previous, current);
            self.events.emit(CallEvent::StatusChanged { previous, current });
        }
    }

    /// Move to `to` if the current status is one of `allowed_from`
    fn transition(&self, allowed_from: &[CallStatus], to: CallStatus) -> bool {
        self.status_tx.send_if_modified(|status| {
            if allowed_from.contains(&*status) {
                *status = to;
                true
            } else {
                false
            }
        })
    }

    fn end(&self, reason: EndReason, cause: Option<String>) {
        let ended = self.status_tx.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = CallStatus::Ended;
                true
            }
        });

        if ended {
            self.flags.write().end = Some(CallEnd {
                reason,
                cause,
                ended_at: Utc::now(),
            });
        } else {
            debug!("Call {} already ended, ignoring {:?}", self.id, reason);
        }
    }

    fn on_progress(&self, response: &SipResponse) {
        let Some(session) = self.session.get() else {
            return;
        };
        if self.is_ended() || !qualifies_for_early_media(response, session.as_ref()) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("No tokio runtime for early media on call {}", self.id);
                return;
            }
        };

        debug!(
            "Call {} entering early media on {} {}",
            self.id, response.status_code, response.reason_phrase
        );
        session.enter_early_media();

        let poller = EarlyMediaPoller::new(
            session.clone(),
            response.clone(),
            self.context.early_media,
            self.status_tx.subscribe(),
        );
        let call_id = self.id;
        runtime.spawn(async move {
            let outcome = poller.run().await;
            debug!("Early media wait for call {} finished: {:?}", call_id, outcome);
        });
    }

    fn on_track_added(&self) {
        let Some(session) = self.session.get() else {
            return;
        };
        let Some(peer) = session.description_handler().and_then(|h| h.peer_connection()) else {
            warn!("Call {} got a remote track but has no peer connection", self.id);
            return;
        };

        let sink = self.audio_sink();
        let outcome = attach_remote_media(peer.as_ref(), sink.as_ref());
        self.flags.write().media = Some(outcome);
    }

    /// The call's audio sink, created on first use
    fn audio_sink(&self) -> Arc<dyn AudioSink> {
        self.sink
            .get_or_init(|| self.context.sink_factory.create())
            .clone()
    }

    // ===== CONTROL OPERATIONS =====

    fn bound_session(&self) -> DeviceResult<&Arc<dyn SignalingSession>> {
        self.session
            .get()
            .ok_or(DeviceError::NoSession { call_id: self.id })
    }

    fn ensure_live(&self, operation: &'static str) -> DeviceResult<()> {
        if self.is_ended() {
            warn!("{} requested on ended call {}", operation, self.id);
            return Err(DeviceError::CallEnded {
                call_id: self.id,
                operation,
            });
        }
        Ok(())
    }

    /// Accept an incoming call with audio-only media
    pub async fn answer(&self) -> DeviceResult<()> {
        if self.direction != CallDirection::Incoming {
            warn!("answer() called on outgoing call {}, ignoring", self.id);
            return Ok(());
        }
        self.ensure_live("answer")?;
        let session = self.bound_session()?;

        info!("Answering call {}", self.id);
        session
            .accept(MediaOptions::audio_only(self.audio_sink()))
            .await?;
        Ok(())
    }

    /// Decline an incoming call
    pub async fn reject(&self) -> DeviceResult<()> {
        if self.direction != CallDirection::Incoming {
            warn!("reject() called on outgoing call {}, ignoring", self.id);
            return Ok(());
        }
        self.ensure_live("reject")?;
        let session = self.bound_session()?;

        info!("Rejecting call {}", self.id);
        session.reject().await?;
        Ok(())
    }

    /// Ask the session to end, whatever the current status
    ///
    /// The call reaches `Ended` once the session reports the termination.
    pub async fn terminate(&self) -> DeviceResult<()> {
        let session = self.bound_session()?;
        info!("Terminating call {}", self.id);
        session.terminate(TerminateOptions::default()).await?;
        Ok(())
    }

    /// Request mute or unmute
    ///
    /// [`Call::is_muted`] reflects `muted` immediately.
    pub async fn mute(&self, muted: bool) -> DeviceResult<()> {
        self.ensure_live("mute")?;
        let session = self.bound_session()?;

        self.flags.write().muted = muted;
        if muted {
            session.mute().await?;
        } else {
            session.unmute().await?;
        }
        Ok(())
    }

    /// Request hold or resume
    pub async fn hold(&self, on_hold: bool) -> DeviceResult<()> {
        self.ensure_live("hold")?;
        let session = self.bound_session()?;

        self.flags.write().on_hold = on_hold;
        if on_hold {
            session.hold().await?;
        } else {
            session.unhold().await?;
        }
        Ok(())
    }

    /// Send DTMF digits; validation is left to the signaling stack
    pub async fn send_digits(&self, digits: &str) -> DeviceResult<()> {
        self.ensure_live("send_digits")?;
        self.bound_session()?.dtmf(digits).await?;
        Ok(())
    }

    /// Transfer the far end to `target`
    pub async fn refer(&self, target: &str) -> DeviceResult<()> {
        self.ensure_live("refer")?;
        info!("Referring call {} to {}", self.id, target);
        self.bound_session()?.refer(target).await?;
        Ok(())
    }

    // ===== QUERIES =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn status(&self) -> CallStatus {
        *self.status_tx.borrow()
    }

    pub fn is_initiating(&self) -> bool {
        self.status() == CallStatus::Initiating
    }

    pub fn is_connected(&self) -> bool {
        self.status() == CallStatus::Connected
    }

    pub fn is_ended(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == CallDirection::Incoming
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Last requested mute state
    pub fn is_muted(&self) -> bool {
        self.flags.read().muted
    }

    /// Last requested hold state
    pub fn is_on_hold(&self) -> bool {
        self.flags.read().on_hold
    }

    /// Last mute state confirmed by the session, `None` before any confirmation
    pub fn mute_confirmed(&self) -> Option<bool> {
        self.flags.read().mute_confirmed
    }

    pub fn end_reason(&self) -> Option<CallEnd> {
        self.flags.read().end.clone()
    }

    /// Outcome of the last remote media attachment
    pub fn media_attachment(&self) -> Option<MediaAttachment> {
        self.flags.read().media.clone()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.flags.read().connected_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.get().map(|s| s.id())
    }

    /// The signaling request behind this call
    ///
    /// Incoming calls expose the INVITE of the server transaction, outgoing
    /// calls the session's own request. `None` while no session is bound.
    pub fn request(&self) -> Option<SipRequest> {
        let session = self.session.get()?;
        match self.direction {
            CallDirection::Incoming => session.transaction_request(),
            CallDirection::Outgoing => session.request(),
        }
    }

    /// Subscribe to this call's notifications
    pub fn subscribe(&self) -> EventStream<CallEvent> {
        self.events.subscribe()
    }

    /// Watch the status without subscribing to every notification
    pub fn status_watch(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the call has ended
    pub async fn wait_for_end(&self) {
        let mut status = self.status_tx.subscribe();
        // The sender lives as long as `self`, so this cannot close early.
        let _ = status.wait_for(|s| s.is_terminal()).await;
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("status", &self.status())
            .field("session", &self.session_id())
            .finish_non_exhaustive()
    }
}

async fn pump_session_events(call: Weak<Call>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(call) = call.upgrade() else {
            debug!("Call dropped, stopping session notification pump");
            break;
        };
        call.handle_session_event(event);
    }
}
