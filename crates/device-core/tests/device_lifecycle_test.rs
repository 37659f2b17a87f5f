//! Device lifecycle tests
//!
//! Transport and registration state, the active-call slot and inbound
//! invites, driven through a mock user agent.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use rvoip_device_core::stack::{SessionEvent, SignalingSession, SipRequest, SipResponse};
use rvoip_device_core::{
    CallStatus, ConnectionState, Device, DeviceConfig, DeviceError, DeviceEvent, EventStream,
    RegisterOptions, RegistrationState, StackResult, UnregisterOptions, UnregisterStrategy,
    UserAgent, UserAgentConfig, UserAgentEvent,
};

use common::*;

struct Harness {
    device: Arc<Device>,
    ua: Arc<MockUserAgent>,
    probed: Arc<Mutex<Vec<String>>>,
}

async fn harness_with(config: DeviceConfig, failing_probe: bool) -> Harness {
    init_tracing();
    let ua = MockUserAgent::new();
    let factory_ua = ua.clone();
    let probe = MockProbe {
        fail: failing_probe,
        ..Default::default()
    };
    let probed = probe.probed.clone();

    let device = Device::builder(config)
        .user_agent_factory(move |config: UserAgentConfig| -> StackResult<Arc<dyn UserAgent>> {
            *factory_ua.config.lock() = Some(config);
            Ok(factory_ua.clone() as Arc<dyn UserAgent>)
        })
        .probe(probe)
        .build()
        .await
        .unwrap();

    Harness { device, ua, probed }
}

async fn harness() -> Harness {
    harness_with(test_config(), false).await
}

async fn next_event(events: &mut EventStream<DeviceEvent>) -> DeviceEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event within a second")
        .expect("device still alive")
}

fn invite(ua: &MockUserAgent, session: &Arc<MockSession>) {
    ua.emit(UserAgentEvent::Invite(session.clone() as Arc<dyn SignalingSession>));
}

#[tokio::test]
async fn test_build_requires_host_port_and_user_agent() {
    let err = Device::builder(DeviceConfig::new("", 7443))
        .without_probe()
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::MissingParameter { name: "host" }));

    let err = Device::builder(DeviceConfig::new("sip.example.com", 0))
        .without_probe()
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::MissingParameter { name: "port" }));

    let err = Device::builder(test_config())
        .without_probe()
        .build()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeviceError::MissingParameter {
            name: "user_agent_factory"
        }
    ));
    assert!(err.is_configuration());
}

#[test]
fn test_build_outside_runtime_is_an_error() {
    let ua = MockUserAgent::new();
    let factory_ua = ua.clone();

    let err = futures::executor::block_on(
        Device::builder(test_config())
            .user_agent_factory(move |_config: UserAgentConfig| -> StackResult<Arc<dyn UserAgent>> {
                Ok(factory_ua.clone() as Arc<dyn UserAgent>)
            })
            .without_probe()
            .build(),
    )
    .unwrap_err();
    assert!(matches!(err, DeviceError::Internal { .. }));

    let err = futures::executor::block_on(
        Device::builder(test_config())
            .user_agent_factory(move |_config: UserAgentConfig| -> StackResult<Arc<dyn UserAgent>> {
                Ok(ua.clone() as Arc<dyn UserAgent>)
            })
            .probe(MockProbe::default())
            .build(),
    )
    .unwrap_err();
    assert!(matches!(err, DeviceError::Internal { .. }));
}

#[tokio::test]
async fn test_user_agent_config_is_derived() {
    let h = harness_with(test_config().with_stun_server("stun:stun.example.com:3478"), false).await;

    let config = h.ua.config.lock().clone().unwrap();
    assert_eq!(config.uri, "sip:alice@sip.example.com");
    assert_eq!(config.ws_servers, vec!["wss://sip.example.com:7443/ws"]);
    assert_eq!(config.authorization_user, "alice");
    assert_eq!(config.display_name, "alice");
    assert_eq!(config.stun_servers, vec!["stun:stun.example.com:3478"]);
    assert!(config.media_constraints.audio);
    assert!(!config.media_constraints.video);
    assert!(config.log.builtin_enabled);
    assert_eq!(h.device.config().aor(), "sip:alice@sip.example.com");
}

#[tokio::test]
async fn test_preflight_probe_is_fire_and_forget() {
    let h = harness_with(test_config(), true).await;
    assert!(eventually(|| !h.probed.lock().is_empty()).await);
    assert_eq!(h.probed.lock().as_slice(), ["https://sip.example.com:7443/"]);

    // A failed probe does not stop the transport from starting
    h.device.start_ws().await.unwrap();
    assert_eq!(h.ua.commands(), vec!["start"]);
}

#[tokio::test]
async fn test_connection_state_follows_notifications_only() {
    let h = harness().await;
    let mut events = h.device.subscribe();

    h.device.start_ws().await.unwrap();
    // The stack's own view is not consulted
    assert!(h.ua.is_connected() && h.ua.is_registered());
    assert!(!h.device.is_ws_connected());
    assert!(!h.device.is_registered());
    assert_eq!(h.device.connection_state(), ConnectionState::Disconnected);

    h.ua.emit(UserAgentEvent::Connecting { attempts: 1 });
    match next_event(&mut events).await {
        DeviceEvent::WsConnecting { attempts } => assert_eq!(attempts, 1),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(h.device.connection_state(), ConnectionState::Connecting);

    h.ua.emit(UserAgentEvent::Connected);
    assert!(matches!(next_event(&mut events).await, DeviceEvent::WsConnected));
    assert!(h.device.is_ws_connected());

    h.device.stop_ws().await.unwrap();
    assert!(h.device.is_ws_connected());

    h.ua.emit(UserAgentEvent::Disconnected);
    assert!(matches!(next_event(&mut events).await, DeviceEvent::WsDisconnected));
    assert!(!h.device.is_ws_connected());

    // start/stop may be repeated without rebuilding the device
    h.device.start_ws().await.unwrap();
    assert_eq!(h.ua.commands(), vec!["start", "stop", "start"]);
}

#[tokio::test]
async fn test_registration_lifecycle() {
    let h = harness().await;
    let mut events = h.device.subscribe();

    h.device
        .register(RegisterOptions::default().with_header("X-Tenant: acme"))
        .await
        .unwrap();
    assert_eq!(h.device.registration_state(), RegistrationState::Registering);
    assert!(!h.device.is_registered());
    assert_eq!(h.ua.commands(), vec!["register:X-Tenant: acme"]);

    h.ua.emit(UserAgentEvent::Registered);
    assert!(matches!(next_event(&mut events).await, DeviceEvent::Registered));
    assert!(h.device.is_registered());

    // A refresh performed by the stack fails later on
    h.ua.emit(UserAgentEvent::RegistrationFailed {
        cause: Some("Authentication Error".to_string()),
        response: Some(SipResponse::new(403, "Forbidden")),
    });
    match next_event(&mut events).await {
        DeviceEvent::RegistrationFailed { cause, response } => {
            assert_eq!(cause.as_deref(), Some("Authentication Error"));
            assert_eq!(response.unwrap().status_code, 403);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.device.registration_state().is_failed());
    assert!(!h.device.is_registered());
}

#[tokio::test]
async fn test_refresh_keeps_active_binding_registered() {
    let h = harness().await;
    let mut events = h.device.subscribe();

    h.device.register(RegisterOptions::default()).await.unwrap();
    h.ua.emit(UserAgentEvent::Registered);
    assert!(matches!(next_event(&mut events).await, DeviceEvent::Registered));
    assert!(h.device.is_registered());

    // The stack may never answer a refresh with another notification
    h.device
        .register(RegisterOptions::default().with_header("X-A: b"))
        .await
        .unwrap();
    assert!(h.device.is_registered());
    assert_eq!(h.device.registration_state(), RegistrationState::Registered);
    assert_eq!(h.ua.commands(), vec!["register:", "register:X-A: b"]);

    h.ua.emit(UserAgentEvent::RegistrationFailed {
        cause: Some("Request Timeout".to_string()),
        response: None,
    });
    assert!(matches!(
        next_event(&mut events).await,
        DeviceEvent::RegistrationFailed { .. }
    ));
    assert!(!h.device.is_registered());

    // Retrying from a failed binding goes through Registering again
    h.device.register(RegisterOptions::default()).await.unwrap();
    assert_eq!(h.device.registration_state(), RegistrationState::Registering);
}

#[tokio::test]
async fn test_unregister_uses_distinct_primitive() {
    let h = harness().await;
    let mut events = h.device.subscribe();

    h.device
        .unregister(UnregisterOptions::default().all_bindings())
        .await
        .unwrap();
    assert_eq!(h.ua.commands(), vec!["unregister:all=true"]);

    h.ua.emit(UserAgentEvent::Unregistered {
        cause: None,
        response: None,
    });
    assert!(matches!(next_event(&mut events).await, DeviceEvent::Unregistered { .. }));
    assert_eq!(h.device.registration_state(), RegistrationState::Unregistered);
}

#[tokio::test]
async fn test_unregister_via_register_keeps_legacy_coupling() {
    let config = test_config().with_unregister_strategy(UnregisterStrategy::ViaRegister);
    let h = harness_with(config, false).await;

    h.device
        .unregister(UnregisterOptions::default().with_header("X-Reason: logout"))
        .await
        .unwrap();
    assert_eq!(h.ua.commands(), vec!["register:X-Reason: logout"]);
}

#[tokio::test]
async fn test_initiate_call_after_connect() {
    let h = harness().await;
    h.device.start_ws().await.unwrap();
    h.ua.emit(UserAgentEvent::Connected);
    assert!(eventually(|| h.device.is_ws_connected()).await);

    let call = h.device.initiate_call("12065551111").await.unwrap();

    assert!(call.is_outgoing());
    assert_eq!(call.status(), CallStatus::Starting);
    assert_eq!(call.status().to_string(), "starting");
    assert!(Arc::ptr_eq(&call, &h.device.active_call().unwrap()));
    assert_eq!(h.ua.commands(), vec!["start", "invite:12065551111"]);
}

#[tokio::test]
async fn test_failed_initiate_leaves_slot_untouched() {
    let h = harness().await;
    h.ua.fail_invites.store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(h.device.initiate_call("12065551111").await.is_err());
    assert!(h.device.active_call().is_none());
}

#[tokio::test]
async fn test_incoming_invite_installs_call() {
    let h = harness().await;
    let mut events = h.device.subscribe();
    let session = Arc::new(MockSession::new("in-1"));

    invite(&h.ua, &session);

    let call = match next_event(&mut events).await {
        DeviceEvent::IncomingInvite { call } => call,
        other => panic!("unexpected event {:?}", other),
    };
    assert!(call.is_incoming());
    assert_eq!(call.session_id().as_deref(), Some("in-1"));
    assert!(Arc::ptr_eq(&call, &h.device.active_call().unwrap()));
    // Nothing is sent to the far end until the application decides
    assert!(session.commands().is_empty());

    call.reject().await.unwrap();
    assert_eq!(session.commands(), vec!["reject"]);

    session.emit(SessionEvent::Rejected {
        response: None,
        cause: Some("Rejected".to_string()),
    });
    assert!(eventually(|| call.is_ended()).await);
}

#[tokio::test]
async fn test_new_call_replaces_slot() {
    let h = harness().await;
    let first = Arc::new(MockSession::new("in-1"));
    invite(&h.ua, &first);
    assert!(eventually(|| h.device.active_call().is_some()).await);
    let incoming = h.device.active_call().unwrap();

    let outgoing = h.device.initiate_call("12065551111").await.unwrap();

    let active = h.device.active_call().unwrap();
    assert!(Arc::ptr_eq(&active, &outgoing));
    assert!(!Arc::ptr_eq(&active, &incoming));
    // The replaced call is not terminated on our behalf
    assert!(first.commands().is_empty());
}

#[tokio::test]
async fn test_device_level_call_operations() {
    let h = harness().await;

    assert!(matches!(
        h.device.answer_active_call().await,
        Err(DeviceError::NoActiveCall)
    ));
    assert!(matches!(
        h.device.refer_number("12065552222").await,
        Err(DeviceError::NoActiveCall)
    ));

    let session = Arc::new(MockSession::new("in-1"));
    invite(&h.ua, &session);
    assert!(eventually(|| h.device.active_call().is_some()).await);

    h.device.answer_active_call().await.unwrap();
    h.device.refer_number("12065552222").await.unwrap();
    assert_eq!(session.commands(), vec!["accept", "refer:12065552222"]);
}

#[tokio::test]
async fn test_message_is_surfaced() {
    let h = harness().await;
    let mut events = h.device.subscribe();

    h.ua.emit(UserAgentEvent::Message(
        SipRequest::new("MESSAGE", "sip:alice@sip.example.com").with_body("hello"),
    ));

    match next_event(&mut events).await {
        DeviceEvent::Message { message } => assert_eq!(message.body.as_deref(), Some("hello")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_terminates_live_call_then_stops() {
    let h = harness().await;
    let call = h.device.initiate_call("12065551111").await.unwrap();
    let session = h.ua.last_session().unwrap();

    h.device.shutdown().await.unwrap();

    assert_eq!(session.commands(), vec!["terminate"]);
    assert_eq!(h.ua.commands(), vec!["invite:12065551111", "stop"]);

    session.emit(SessionEvent::Terminated {
        message: None,
        cause: None,
    });
    assert!(eventually(|| call.is_ended()).await);
}

#[tokio::test]
async fn test_shutdown_skips_ended_call() {
    let h = harness().await;
    let call = h.device.initiate_call("12065551111").await.unwrap();
    let session = h.ua.last_session().unwrap();
    session.emit(SessionEvent::Bye { request: None });
    assert!(eventually(|| call.is_ended()).await);

    h.device.shutdown().await.unwrap();
    assert!(session.commands().is_empty());
}
