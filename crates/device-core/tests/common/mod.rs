//! Hand-written collaborators shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use rvoip_device_core::config::UserAgentConfig;
use rvoip_device_core::media::{
    AttachMechanism, Attachment, AudioSink, AudioSinkFactory, MediaTrack,
};
use rvoip_device_core::stack::{
    DescriptionHandler, FailureCause, MediaOptions, PeerConnection, RtpReceiver, SessionEvent,
    SignalingSession, SipRequest, SipResponse, TerminateOptions, UserAgent, UserAgentEvent,
};
use rvoip_device_core::{
    CallContext, ConnectivityProbe, DeviceConfig, EarlyMediaPolicy, RegisterOptions, StackError,
    StackResult, UnregisterOptions,
};

pub const SDP: &str = "v=0\r\no=- 0 0 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 4000 RTP/AVP 0\r\n";

/// Route crate logs to the test output when `RUST_LOG` asks for them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every millisecond for up to one second
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

/// Give detached tasks time to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

pub fn fast_policy() -> EarlyMediaPolicy {
    EarlyMediaPolicy {
        max_attempts: 3,
        interval_ms: 1,
    }
}

pub fn test_config() -> DeviceConfig {
    DeviceConfig::new("sip.example.com", 7443)
        .with_credentials("alice", "secret")
        .with_path("/ws")
        .with_early_media_policy(fast_policy())
}

pub fn session_progress_with_sdp() -> SipResponse {
    SipResponse::new(183, "Session Progress")
        .with_header("Content-Type", "application/sdp")
        .with_body(SDP)
}

// ===== PEER CONNECTION / DESCRIPTION HANDLER =====

#[derive(Debug)]
pub struct MockPeer {
    pub receivers: Vec<RtpReceiver>,
}

impl MockPeer {
    pub fn with_audio_tracks(ids: &[&str]) -> Self {
        Self {
            receivers: ids
                .iter()
                .map(|id| RtpReceiver {
                    track: Some(MediaTrack::audio(*id)),
                })
                .collect(),
        }
    }
}

impl PeerConnection for MockPeer {
    fn receivers(&self) -> Vec<RtpReceiver> {
        self.receivers.clone()
    }
}

#[derive(Debug)]
pub struct MockDescriptionHandler {
    pub accepted_content_type: String,
    pub set_result: Mutex<StackResult<()>>,
    pub applied: Mutex<Vec<String>>,
    pub peer: Option<Arc<MockPeer>>,
}

impl MockDescriptionHandler {
    pub fn new() -> Self {
        Self {
            accepted_content_type: "application/sdp".to_string(),
            set_result: Mutex::new(Ok(())),
            applied: Mutex::new(Vec::new()),
            peer: Some(Arc::new(MockPeer::with_audio_tracks(&["remote-audio"]))),
        }
    }

    pub fn rejecting_descriptions() -> Self {
        let handler = Self::new();
        *handler.set_result.lock() = Err(StackError::description("malformed m-line"));
        handler
    }
}

#[async_trait]
impl DescriptionHandler for MockDescriptionHandler {
    fn has_description(&self, content_type: Option<&str>) -> bool {
        content_type == Some(self.accepted_content_type.as_str())
    }

    async fn set_description(&self, body: &str) -> StackResult<()> {
        self.applied.lock().push(body.to_string());
        self.set_result.lock().clone()
    }

    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.peer.clone().map(|p| p as Arc<dyn PeerConnection>)
    }
}

// ===== SIGNALING SESSION =====

/// Session whose notifications are injected with [`MockSession::emit`] and
/// whose commands are recorded as strings
#[derive(Debug)]
pub struct MockSession {
    id: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    commands: Mutex<Vec<String>>,
    pub has_offer: AtomicBool,
    pub has_dialog: AtomicBool,
    pub has_answer: AtomicBool,
    pub handler: Option<Arc<MockDescriptionHandler>>,
    pub request: Option<SipRequest>,
    pub transaction_request: Option<SipRequest>,
}

impl MockSession {
    pub fn new(id: &str) -> Self {
        Self::with_handler(id, Arc::new(MockDescriptionHandler::new()))
    }

    pub fn with_handler(id: &str, handler: Arc<MockDescriptionHandler>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.to_string(),
            tx,
            rx: Mutex::new(Some(rx)),
            commands: Mutex::new(Vec::new()),
            has_offer: AtomicBool::new(true),
            has_dialog: AtomicBool::new(false),
            has_answer: AtomicBool::new(false),
            handler: Some(handler),
            request: Some(SipRequest::new("INVITE", "sip:12065551111@sip.example.com")),
            transaction_request: Some(
                SipRequest::new("INVITE", "sip:alice@sip.example.com")
                    .with_header("From", "<sip:bob@sip.example.com>;tag=1928301774"),
            ),
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn handler(&self) -> Arc<MockDescriptionHandler> {
        self.handler.clone().expect("session has a handler")
    }

    fn record(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }
}

#[async_trait]
impl SignalingSession for MockSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.rx.lock().take()
    }

    async fn accept(&self, options: MediaOptions) -> StackResult<()> {
        assert!(options.constraints.audio && !options.constraints.video);
        assert!(options.render.is_some());
        self.record("accept");
        Ok(())
    }

    async fn reject(&self) -> StackResult<()> {
        self.record("reject");
        Ok(())
    }

    async fn terminate(&self, options: TerminateOptions) -> StackResult<()> {
        match options.status_code {
            Some(code) => self.record(format!("terminate:{}", code)),
            None => self.record("terminate"),
        }
        Ok(())
    }

    async fn mute(&self) -> StackResult<()> {
        self.record("mute");
        Ok(())
    }

    async fn unmute(&self) -> StackResult<()> {
        self.record("unmute");
        Ok(())
    }

    async fn hold(&self) -> StackResult<()> {
        self.record("hold");
        Ok(())
    }

    async fn unhold(&self) -> StackResult<()> {
        self.record("unhold");
        Ok(())
    }

    async fn dtmf(&self, digits: &str) -> StackResult<()> {
        self.record(format!("dtmf:{}", digits));
        Ok(())
    }

    async fn refer(&self, target: &str) -> StackResult<()> {
        self.record(format!("refer:{}", target));
        Ok(())
    }

    async fn fail(&self, _response: Option<SipResponse>, cause: FailureCause) {
        self.record(format!("fail:{}", cause));
    }

    fn enter_early_media(&self) {
        self.record("enter_early_media");
    }

    fn has_offer(&self) -> bool {
        self.has_offer.load(Ordering::SeqCst)
    }

    fn has_dialog(&self) -> bool {
        self.has_dialog.load(Ordering::SeqCst)
    }

    fn has_answer(&self) -> bool {
        self.has_answer.load(Ordering::SeqCst)
    }

    fn description_handler(&self) -> Option<Arc<dyn DescriptionHandler>> {
        self.handler
            .clone()
            .map(|h| h as Arc<dyn DescriptionHandler>)
    }

    fn request(&self) -> Option<SipRequest> {
        self.request.clone()
    }

    fn transaction_request(&self) -> Option<SipRequest> {
        self.transaction_request.clone()
    }
}

// ===== USER AGENT =====

#[derive(Debug)]
pub struct MockUserAgent {
    tx: mpsc::UnboundedSender<UserAgentEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<UserAgentEvent>>>,
    commands: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    pub fail_invites: AtomicBool,
    pub config: Mutex<Option<UserAgentConfig>>,
}

impl MockUserAgent {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            commands: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            fail_invites: AtomicBool::new(false),
            config: Mutex::new(None),
        })
    }

    pub fn emit(&self, event: UserAgentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Session handed out by the most recent `invite`
    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }

    fn record(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }
}

#[async_trait]
impl UserAgent for MockUserAgent {
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UserAgentEvent>> {
        self.rx.lock().take()
    }

    async fn start(&self) -> StackResult<()> {
        self.record("start");
        Ok(())
    }

    async fn stop(&self) -> StackResult<()> {
        self.record("stop");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_registered(&self) -> bool {
        true
    }

    async fn register(&self, options: &RegisterOptions) -> StackResult<()> {
        self.record(format!("register:{}", options.extra_headers.join("|")));
        Ok(())
    }

    async fn unregister(&self, options: &UnregisterOptions) -> StackResult<()> {
        self.record(format!("unregister:all={}", options.all));
        Ok(())
    }

    async fn invite(
        &self,
        destination: &str,
        options: MediaOptions,
    ) -> StackResult<Arc<dyn SignalingSession>> {
        if self.fail_invites.load(Ordering::SeqCst) {
            return Err(StackError::transport("websocket closed"));
        }
        assert!(options.render.is_some());
        self.record(format!("invite:{}", destination));

        let session = Arc::new(MockSession::new(&format!("out-{}", destination)));
        self.sessions.lock().push(session.clone());
        Ok(session as Arc<dyn SignalingSession>)
    }
}

// ===== AUDIO SINK =====

#[derive(Debug, Default)]
pub struct MockSink {
    pub supported: Vec<AttachMechanism>,
    pub attached: Mutex<Vec<Attachment>>,
    pub plays: Mutex<usize>,
}

impl MockSink {
    pub fn supporting(mechanisms: &[AttachMechanism]) -> Self {
        Self {
            supported: mechanisms.to_vec(),
            ..Default::default()
        }
    }
}

impl AudioSink for MockSink {
    fn supports(&self, mechanism: AttachMechanism) -> bool {
        self.supported.contains(&mechanism)
    }

    fn attach(&self, attachment: Attachment) -> StackResult<()> {
        self.attached.lock().push(attachment);
        Ok(())
    }

    fn play(&self) -> StackResult<()> {
        *self.plays.lock() += 1;
        Ok(())
    }
}

/// Hands out one shared [`MockSink`] and counts how often it was asked to
#[derive(Debug, Default)]
pub struct CountingSinkFactory {
    pub sink: Arc<MockSink>,
    pub created: AtomicUsize,
}

impl CountingSinkFactory {
    pub fn new(sink: MockSink) -> Arc<Self> {
        Arc::new(Self {
            sink: Arc::new(sink),
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AudioSinkFactory for CountingSinkFactory {
    fn create(&self) -> Arc<dyn AudioSink> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.sink.clone()
    }
}

/// Call context with a counting sink factory and the fast early-media policy
pub fn call_context(sinks: &Arc<CountingSinkFactory>) -> CallContext {
    CallContext::new(sinks.clone(), fast_policy())
}

// ===== PRE-FLIGHT =====

#[derive(Default)]
pub struct MockProbe {
    pub probed: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

#[async_trait]
impl ConnectivityProbe for MockProbe {
    async fn probe(&self, url: &Url) -> StackResult<()> {
        self.probed.lock().push(url.to_string());
        if self.fail {
            Err(StackError::transport("connection refused"))
        } else {
            Ok(())
        }
    }
}
