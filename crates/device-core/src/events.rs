//! Application-facing notifications
//!
//! Each entity has a fixed, typed set of notifications instead of a
//! string-keyed emitter:
//!
//! - [`DeviceEvent`] - transport, registration, inbound invites, messages
//! - [`CallEvent`] - the verbatim session notifications plus
//!   [`CallEvent::StatusChanged`] whenever the simplified status moves
//!
//! Fan-out goes through an [`EventBus`] (a `tokio::sync::broadcast` sender).
//! Subscribers get an [`EventStream`], which is a `Stream` of events. A slow
//! subscriber that falls behind by more than the bus capacity loses the
//! oldest events and a warning is logged; it never blocks the emitter.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_device_core::events::{EventBus, DeviceEvent};
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::<DeviceEvent>::new();
//! let mut events = bus.subscribe();
//!
//! bus.emit(DeviceEvent::WsConnected);
//! assert!(matches!(events.next().await, Some(DeviceEvent::WsConnected)));
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

use crate::call::{Call, CallStatus};
use crate::stack::{SipMessage, SipRequest, SipResponse};

/// Default number of undelivered events kept per bus
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notifications surfaced by a `Call`
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Local media acquired, signaling in progress
    Connecting,
    /// Provisional response
    Progress { response: SipResponse },
    /// Far end answered
    Accepted { response: Option<SipResponse> },
    /// DTMF received from the far end
    Dtmf {
        request: Option<SipRequest>,
        tone: String,
    },
    /// Mute confirmed by the session
    Muted,
    /// Unmute confirmed by the session
    Unmuted,
    Cancel,
    /// Transfer requested by the far end
    Refer {
        target: Option<String>,
        request: Option<SipRequest>,
    },
    /// Session replaced by another one
    Replaced { new_session_id: Option<String> },
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
    Bye { request: Option<SipRequest> },
    /// The simplified call status moved
    StatusChanged {
        previous: CallStatus,
        current: CallStatus,
    },
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Connecting => "connecting",
            CallEvent::Progress { .. } => "progress",
            CallEvent::Accepted { .. } => "accepted",
            CallEvent::Dtmf { .. } => "dtmf",
            CallEvent::Muted => "muted",
            CallEvent::Unmuted => "unmuted",
            CallEvent::Cancel => "cancel",
            CallEvent::Refer { .. } => "refer",
            CallEvent::Replaced { .. } => "replaced",
            CallEvent::Rejected { .. } => "rejected",
            CallEvent::Failed { .. } => "failed",
            CallEvent::Terminated { .. } => "terminated",
            CallEvent::Bye { .. } => "bye",
            CallEvent::StatusChanged { .. } => "statusChanged",
        }
    }
}

/// Notifications surfaced by a `Device`
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    WsConnecting { attempts: u32 },
    WsConnected,
    WsDisconnected,
    Registered,
    Unregistered {
        cause: Option<String>,
        response: Option<SipResponse>,
    },
    RegistrationFailed {
        cause: Option<String>,
        response: Option<SipResponse>,
    },
    /// A new incoming call now occupies the active-call slot
    IncomingInvite { call: Arc<Call> },
    Message { message: SipRequest },
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::WsConnecting { .. } => "wsConnecting",
            DeviceEvent::WsConnected => "wsConnected",
            DeviceEvent::WsDisconnected => "wsDisconnected",
            DeviceEvent::Registered => "registered",
            DeviceEvent::Unregistered { .. } => "unregistered",
            DeviceEvent::RegistrationFailed { .. } => "registrationFailed",
            DeviceEvent::IncomingInvite { .. } => "incomingInvite",
            DeviceEvent::Message { .. } => "message",
        }
    }
}

/// Typed broadcast fan-out for one entity
#[derive(Debug)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver `event` to every current subscriber
    ///
    /// Having no subscribers is normal and not reported.
    pub fn emit(&self, event: T) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> EventStream<T> {
        EventStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of events from one [`EventBus`]
pub struct EventStream<T> {
    inner: BroadcastStream<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    fn new(rx: broadcast::Receiver<T>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }

    /// Next event, `None` once the emitting entity is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.next().await
    }
}

impl<T: Clone + Send + 'static> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    warn!("event subscriber lagged, {} events dropped", missed);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
