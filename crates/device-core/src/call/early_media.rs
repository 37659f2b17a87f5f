//! Early media answer wait
//!
//! Some gateways send the media description for early media (ringback,
//! announcements) in an unreliable 18x response. The signaling stack does not
//! treat that body as an answer on its own, so the call would stay silent
//! until the final response. To work around the race in the stack's
//! early-media negotiation, a qualifying provisional response forces the
//! session into early media and starts an [`EarlyMediaPoller`]:
//!
//! ```text
//!  18x + body, offer outstanding, no dialog, no "Require: 100rel",
//!  handler accepts the content type
//!                 │
//!                 ▼
//!      session.enter_early_media()
//!                 │
//!     ┌───────────▼────────────┐   answer confirmed  ┌──────────────────┐
//!     │ sleep(interval)        ├────────────────────►│ AnswerConfirmed  │
//!     │ check call / answer    │   call ended        ├──────────────────┤
//!     │ up to max_attempts     ├────────────────────►│ CallEnded        │
//!     └───────────┬────────────┘                     └──────────────────┘
//!                 │ budget exhausted
//!                 ▼
//!      set_description(18x body) ── ok ──► DescriptionApplied
//!                 │ err
//!                 ▼
//!      fail(BadMediaDescription) + terminate(488) ──► SessionFailed
//! ```
//!
//! The poller runs detached. Nothing outside can cancel it; it stops by
//! itself when the answer shows up, when the call has ended, or after the
//! single fallback attempt.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::call::CallStatus;
use crate::config::EarlyMediaPolicy;
use crate::error::StackError;
use crate::stack::{FailureCause, SignalingSession, SipResponse, TerminateOptions};

/// Option tag demanding reliable provisional responses
const RELIABLE_PROVISIONAL: &str = "100rel";

/// Whether `response` should start the early-media workaround on `session`
pub fn qualifies_for_early_media(response: &SipResponse, session: &dyn SignalingSession) -> bool {
    if !response.is_session_progress_class() || !response.has_body() {
        return false;
    }
    if !session.has_offer() || session.has_dialog() || session.has_answer() {
        return false;
    }
    if response.requires(RELIABLE_PROVISIONAL) {
        return false;
    }
    match session.description_handler() {
        Some(handler) => handler.has_description(response.content_type()),
        None => false,
    }
}

/// How an early-media wait finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EarlyMediaOutcome {
    /// The stack confirmed an answer on its own
    AnswerConfirmed { attempts: u32 },
    /// The call ended while waiting
    CallEnded { attempts: u32 },
    /// Budget exhausted, the provisional body was applied directly
    DescriptionApplied,
    /// The provisional body was rejected; the session was failed and terminated
    SessionFailed { error: StackError },
}

/// One wait for a confirmed answer after a qualifying provisional response
pub struct EarlyMediaPoller {
    session: Arc<dyn SignalingSession>,
    response: SipResponse,
    policy: EarlyMediaPolicy,
    status: watch::Receiver<CallStatus>,
}

impl EarlyMediaPoller {
    pub fn new(
        session: Arc<dyn SignalingSession>,
        response: SipResponse,
        policy: EarlyMediaPolicy,
        status: watch::Receiver<CallStatus>,
    ) -> Self {
        Self {
            session,
            response,
            policy,
            status,
        }
    }

    /// Run the wait to completion
    pub async fn run(self) -> EarlyMediaOutcome {
        let interval = self.policy.interval();

        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(interval).await;

            if self.status.borrow().is_terminal() {
                debug!(
                    "Call ended during early media wait on session {} (attempt {})",
                    self.session.id(),
                    attempt
                );
                return EarlyMediaOutcome::CallEnded { attempts: attempt };
            }
            if self.session.has_answer() {
                debug!(
                    "Answer confirmed for session {} after {} attempts",
                    self.session.id(),
                    attempt
                );
                return EarlyMediaOutcome::AnswerConfirmed { attempts: attempt };
            }
        }

        self.apply_provisional_description().await
    }

    async fn apply_provisional_description(self) -> EarlyMediaOutcome {
        let body = self.response.body.clone().unwrap_or_default();
        let applied = match self.session.description_handler() {
            Some(handler) => handler.set_description(&body).await,
            None => Err(StackError::description("session has no description handler")),
        };

        match applied {
            Ok(()) => {
                debug!(
                    "Applied {} body as remote description on session {}",
                    self.response.status_code,
                    self.session.id()
                );
                EarlyMediaOutcome::DescriptionApplied
            }
            Err(error) => {
                warn!(
                    "Early media description rejected on session {}: {}",
                    self.session.id(),
                    error
                );
                self.session
                    .fail(Some(self.response.clone()), FailureCause::BadMediaDescription)
                    .await;
                if let Err(e) = self
                    .session
                    .terminate(TerminateOptions::bad_media_description())
                    .await
                {
                    warn!("Terminating session {} after bad media description failed: {}", self.session.id(), e);
                }
                EarlyMediaOutcome::SessionFailed { error }
            }
        }
    }
}
