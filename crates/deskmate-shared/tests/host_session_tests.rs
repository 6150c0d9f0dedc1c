//! Host channel handshake tests.
//!
//! Tests verify:
//! - Origin allow-list and pinning
//! - Frame assignment idempotence
//! - Authentication success, rejection and retry
//! - Record binding from responses and events, in any interleaving
//! - Unconditional event acknowledgement

use deskmate_shared::host::identity::{IdentityStore, FIELD_MEMBER_ID};
use deskmate_shared::host::{
    ActiveRecord, Dispatch, DropReason, HostSession, OriginAllowList, Outbound, ParsePath,
    RecordingPort, SessionError, SessionSignal, SessionState, Target,
};
use serde_json::{json, Value};

const HOST: &str = "https://na.myconnectwise.net";
const OTHER_HOST: &str = "https://eu.myconnectwise.net";
const EVIL: &str = "https://attacker.example";

fn new_session() -> HostSession<RecordingPort> {
    let mut session = HostSession::new(RecordingPort::framed(), OriginAllowList::default());
    session.start();
    session
}

fn frame(id: &str) -> Value {
    json!({ "MessageFrameID": id })
}

fn auth_ok() -> Value {
    json!({
        "response": "GetMemberAuthentication",
        "data": {
            "memberid": "jdoe",
            "hash": "4b1d",
            "memberEmail": "jdoe@example.com",
            "companyid": "acme"
        }
    })
}

fn ready_session() -> HostSession<RecordingPort> {
    let mut session = new_session();
    session.handle_message(HOST, &frame("frame-9")).unwrap();
    session
}

/// Snapshot of everything a spoofed message must not touch
fn observable(
    session: &HostSession<RecordingPort>,
) -> (SessionState, Option<String>, Option<String>, Option<String>, Option<ActiveRecord>) {
    (
        session.state(),
        session.frame_id().map(str::to_string),
        session.trusted_origin().map(str::to_string),
        session.member().map(|m| m.member_id.clone()),
        session.active_record().cloned(),
    )
}

#[test]
fn test_frame_moves_to_ready_and_pins_origin() {
    let mut session = new_session();
    let dispatch = session.handle_message(HOST, &frame("frame-9")).unwrap();

    assert_eq!(
        dispatch.signals(),
        [SessionSignal::Ready {
            frame_id: "frame-9".into()
        }]
    );
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.trusted_origin(), Some(HOST));
}

#[test]
fn test_duplicate_frame_is_noop() {
    let mut once = ready_session();
    let mut twice = ready_session();
    let dispatch = twice.handle_message(HOST, &frame("frame-9")).unwrap();

    assert_eq!(dispatch, Dispatch::Dropped(DropReason::DuplicateFrame));
    assert_eq!(observable(&once), observable(&twice));
    assert_eq!(once.port().sent(), twice.port().sent());

    // A different token does not replace the first one either
    once.handle_message(HOST, &frame("frame-10")).unwrap();
    assert_eq!(once.frame_id(), Some("frame-9"));
}

#[test]
fn test_untrusted_origin_changes_nothing() {
    let mut session = new_session();
    let before = observable(&session);

    for message in [frame("evil"), auth_ok(), json!({ "event": "onLoad", "_id": 1, "data": { "id": 4 } })] {
        let dispatch = session.handle_message(EVIL, &message).unwrap();
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::UntrustedOrigin));
    }
    assert_eq!(observable(&session), before);
    assert_eq!(session.port().sent(), vec![(Outbound::Ready, Target::Wildcard)]);

    // Spoofing after the handshake is just as inert
    let mut session = ready_session();
    session.request_active_record().unwrap();
    let before = observable(&session);
    session
        .handle_message(EVIL, &json!({ "response": "getScreenObject", "data": { "id": 1 } }))
        .unwrap();
    assert_eq!(observable(&session), before);
}

#[test]
fn test_second_allowed_origin_cannot_take_over() {
    let mut session = ready_session();
    let dispatch = session.handle_message(OTHER_HOST, &frame("x")).unwrap();
    assert_eq!(dispatch, Dispatch::Dropped(DropReason::OriginMismatch));
    assert_eq!(session.trusted_origin(), Some(HOST));
}

#[test]
fn test_malformed_traffic_ignored_without_pinning() {
    let mut session = new_session();
    let dispatch = session
        .handle_message(HOST, &json!({ "source": "react-devtools" }))
        .unwrap();
    assert_eq!(dispatch, Dispatch::Dropped(DropReason::Malformed));
    assert_eq!(session.trusted_origin(), None);
}

#[test]
fn test_replies_never_use_wildcard_after_pinning() {
    let mut session = ready_session();
    session.request_authentication().unwrap();
    session.request_active_record().unwrap();
    session
        .handle_message(HOST, &json!({ "event": "onLoad", "_id": "e1", "data": {} }))
        .unwrap();

    let sent = session.port().sent();
    assert_eq!(sent[0], (Outbound::Ready, Target::Wildcard));
    assert_eq!(sent.len(), 4);
    for (_, target) in &sent[1..] {
        assert_eq!(*target, Target::Origin(HOST.to_string()));
    }
}

#[test]
fn test_authentication_flow() {
    let mut session = ready_session();
    session.request_authentication().unwrap();

    let dispatch = session.handle_message(HOST, &auth_ok()).unwrap();
    let identity = session.member().cloned().unwrap();

    assert_eq!(dispatch.signals(), [SessionSignal::Authenticated(identity.clone())]);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(
        session.identity_store().get(FIELD_MEMBER_ID).as_deref(),
        Some("jdoe")
    );
    assert_eq!(session.identity_store().read_identity(), Some(identity));
}

#[test]
fn test_bad_auth_payload_is_recoverable() {
    let mut session = ready_session();
    session.request_authentication().unwrap();

    let err = session
        .handle_message(
            HOST,
            &json!({ "response": "getmemberauthentication", "data": { "memberid": "jdoe" } }),
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidAuthPayload(_)));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.member().is_none());

    // Retry succeeds
    session.request_authentication().unwrap();
    session.handle_message(HOST, &auth_ok()).unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[test]
fn test_identity_set_at_most_once() {
    let mut session = ready_session();
    session.request_authentication().unwrap();
    session.handle_message(HOST, &auth_ok()).unwrap();

    session.request_authentication().unwrap();
    let mut other = auth_ok();
    other["data"]["memberid"] = json!("mallory");
    let dispatch = session.handle_message(HOST, &other).unwrap();

    assert_eq!(dispatch, Dispatch::Dropped(DropReason::AlreadyAuthenticated));
    assert_eq!(session.member().unwrap().member_id, "jdoe");
}

#[test]
fn test_record_binding_strict_and_lenient() {
    let mut session = ready_session();
    session.request_active_record().unwrap();
    let dispatch = session
        .handle_message(
            HOST,
            &json!({ "response": "getScreenObject", "data": { "id": 812, "screen": "ticket", "mode": "tab" } }),
        )
        .unwrap();
    assert!(matches!(
        dispatch.signals(),
        [SessionSignal::RecordChanged { path: ParsePath::Strict, .. }]
    ));

    session.request_active_record().unwrap();
    let dispatch = session
        .handle_message(
            HOST,
            &json!({ "response": "GETSCREENOBJECT", "data": { "recid": "913" } }),
        )
        .unwrap();
    assert!(matches!(
        dispatch.signals(),
        [SessionSignal::RecordChanged { path: ParsePath::Lenient, .. }]
    ));
    let record = session.active_record().unwrap();
    assert_eq!(record.id, 913);
    assert_eq!(record.kind, "ticket");
    // Binding responses never change the handshake state
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_events_acked_even_before_frame() {
    let mut session = new_session();
    let dispatch = session
        .handle_message(HOST, &json!({ "event": "mystery", "_id": 41, "data": "???" }))
        .unwrap();

    assert_eq!(
        dispatch.signals(),
        [SessionSignal::EventAcknowledged {
            name: "mystery".into()
        }]
    );
    let (ack, target) = session.port().sent().pop().unwrap();
    assert_eq!(
        ack.to_value(),
        json!({ "event": "mystery", "_id": 41, "success": true })
    );
    assert_eq!(target, Target::Origin(HOST.to_string()));
    assert_eq!(session.state(), SessionState::AwaitingFrame);
}

#[test]
fn test_event_with_embedded_record_updates_binding() {
    let mut session = ready_session();
    let dispatch = session
        .handle_message(
            HOST,
            &json!({ "event": "onLoad", "_id": "e7", "data": { "screenObject": { "id": "1201" } } }),
        )
        .unwrap();

    assert_eq!(dispatch.signals().len(), 2);
    assert_eq!(session.active_record().unwrap().id, 1201);
}

#[test]
fn test_any_interleaving_reaches_same_state() {
    let record = json!({ "event": "onLoad", "_id": 1, "data": { "id": 55, "screen": "ticket", "mode": "pod" } });

    // Record event and auth before the frame; auth can only be requested after
    let mut a = new_session();
    a.handle_message(HOST, &record).unwrap();
    a.handle_message(HOST, &frame("f")).unwrap();
    a.request_authentication().unwrap();
    a.handle_message(HOST, &auth_ok()).unwrap();

    let mut b = new_session();
    b.handle_message(HOST, &frame("f")).unwrap();
    b.request_authentication().unwrap();
    b.handle_message(HOST, &auth_ok()).unwrap();
    b.handle_message(HOST, &record).unwrap();

    assert_eq!(observable(&a), observable(&b));
    assert_eq!(a.state(), SessionState::Authenticated);
    assert_eq!(a.active_record().unwrap().id, 55);
}
