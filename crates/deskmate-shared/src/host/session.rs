//! Host channel session
//!
//! One session per embedded instance. Every inbound message goes through
//! the same validator (listener attached, origin allowed, origin matches
//! the pinned one, envelope well formed) before the typed dispatch runs.
//! Rejected traffic is dropped without touching state.

use super::envelope::{Envelope, Outbound, Target};
use super::identity::{IdentityStore, MemberIdentity, MemoryIdentityStore};
use super::origin::{normalize_origin, OriginAllowList};
use super::port::HostPort;
use super::record::{embedded_record, parse_active_record, ActiveRecord, Parsed};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const AUTH_REQUEST: &str = "getMemberAuthentication";
pub const RECORD_REQUEST: &str = "getScreenObject";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFrame,
    Ready,
    Authenticated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFrame => write!(f, "awaiting-frame"),
            Self::Ready => write!(f, "ready"),
            Self::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// How an active-record update was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePath {
    Strict,
    Lenient,
}

/// Something the caller should react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Ready { frame_id: String },
    Authenticated(MemberIdentity),
    RecordChanged { record: ActiveRecord, path: ParsePath },
    EventAcknowledged { name: String },
}

/// Why a message was ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Detached,
    UntrustedOrigin,
    OriginMismatch,
    Malformed,
    DuplicateFrame,
    Unsolicited(String),
    UnsupportedRequest(String),
    AlreadyAuthenticated,
    RecordRejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Dropped(DropReason),
    Handled(Vec<SessionSignal>),
}

impl Dispatch {
    pub fn signals(&self) -> &[SessionSignal] {
        match self {
            Dispatch::Handled(signals) => signals,
            Dispatch::Dropped(_) => &[],
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Dispatch::Dropped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("host has not assigned a frame yet")]
    NotReady,

    #[error("authentication payload rejected: {0}")]
    InvalidAuthPayload(String),
}

impl SessionError {
    /// Auth failures can be retried by re-requesting authentication
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::InvalidAuthPayload(_))
    }
}

pub struct HostSession<P: HostPort> {
    port: P,
    allow_list: OriginAllowList,
    store: Box<dyn IdentityStore>,
    state: SessionState,
    attached: bool,
    announced: bool,
    frame_id: Option<String>,
    trusted_origin: Option<String>,
    member: Option<MemberIdentity>,
    active_record: Option<ActiveRecord>,
    pending: BTreeSet<String>,
}

impl<P: HostPort> HostSession<P> {
    pub fn new(port: P, allow_list: OriginAllowList) -> Self {
        Self::with_store(port, allow_list, Box::new(MemoryIdentityStore::new()))
    }

    pub fn with_store(port: P, allow_list: OriginAllowList, store: Box<dyn IdentityStore>) -> Self {
        Self {
            port,
            allow_list,
            store,
            state: SessionState::AwaitingFrame,
            attached: false,
            announced: false,
            frame_id: None,
            trusted_origin: None,
            member: None,
            active_record: None,
            pending: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frame_id(&self) -> Option<&str> {
        self.frame_id.as_deref()
    }

    pub fn trusted_origin(&self) -> Option<&str> {
        self.trusted_origin.as_deref()
    }

    pub fn member(&self) -> Option<&MemberIdentity> {
        self.member.as_ref()
    }

    pub fn active_record(&self) -> Option<&ActiveRecord> {
        self.active_record.as_ref()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn identity_store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Start listening. Returns false if already listening.
    pub fn attach(&mut self) -> bool {
        if self.attached {
            return false;
        }
        self.attached = true;
        true
    }

    /// Stop listening; later messages are dropped
    pub fn detach(&mut self) {
        self.attached = false;
        self.pending.clear();
    }

    /// Announce readiness to the parent window. Only happens once, only
    /// inside a foreign frame, and only before a frame is assigned.
    pub fn start(&mut self) -> bool {
        self.attach();
        if self.announced
            || self.state != SessionState::AwaitingFrame
            || !self.port.in_foreign_frame()
        {
            return false;
        }
        self.announced = true;
        self.port.post(&Outbound::Ready, &Target::Wildcard);
        info!("Announced ready to host window");
        true
    }

    fn target(&self) -> Target {
        match &self.trusted_origin {
            Some(origin) => Target::Origin(origin.clone()),
            None => Target::Wildcard,
        }
    }

    fn send_request(&mut self, name: &str) -> Result<(), SessionError> {
        if self.state == SessionState::AwaitingFrame || self.trusted_origin.is_none() {
            return Err(SessionError::NotReady);
        }
        self.pending.insert(name.to_ascii_lowercase());
        let message = Outbound::Request {
            name: name.to_string(),
            frame_id: self.frame_id.clone(),
        };
        self.port.post(&message, &self.target());
        Ok(())
    }

    /// Ask the host who the member is. Safe to call repeatedly.
    pub fn request_authentication(&mut self) -> Result<(), SessionError> {
        self.send_request(AUTH_REQUEST)
    }

    /// Ask the host which record is open. Safe to call repeatedly.
    pub fn request_active_record(&mut self) -> Result<(), SessionError> {
        self.send_request(RECORD_REQUEST)
    }

    fn validate(&mut self, origin: &str, data: &Value) -> Result<Envelope, DropReason> {
        if !self.attached {
            return Err(DropReason::Detached);
        }
        if !self.allow_list.allows(origin) {
            return Err(DropReason::UntrustedOrigin);
        }
        let origin = normalize_origin(origin);
        if let Some(trusted) = &self.trusted_origin {
            if *trusted != origin {
                return Err(DropReason::OriginMismatch);
            }
        }
        let envelope = Envelope::parse(data).map_err(|_| DropReason::Malformed)?;
        if self.trusted_origin.is_none() {
            info!("Pinned host origin {}", origin);
            self.trusted_origin = Some(origin);
        }
        Ok(envelope)
    }

    /// Feed one inbound message through validation and dispatch
    pub fn handle_message(&mut self, origin: &str, data: &Value) -> Result<Dispatch, SessionError> {
        let envelope = match self.validate(origin, data) {
            Ok(envelope) => envelope,
            Err(reason) => {
                debug!("Dropped host message from {}: {:?}", origin, reason);
                return Ok(Dispatch::Dropped(reason));
            }
        };
        debug!("Host {} message accepted", envelope.kind());

        match envelope {
            Envelope::Frame { frame_id } => Ok(self.on_frame(frame_id)),
            Envelope::Request { name } => {
                Ok(Dispatch::Dropped(DropReason::UnsupportedRequest(name)))
            }
            Envelope::Response { name, data } => self.on_response(&name, &data),
            Envelope::Event { name, data, id } => Ok(self.on_event(name, &data, id)),
        }
    }

    fn on_frame(&mut self, frame_id: String) -> Dispatch {
        if self.frame_id.is_some() {
            return Dispatch::Dropped(DropReason::DuplicateFrame);
        }
        info!("Host assigned frame {}", frame_id);
        self.frame_id = Some(frame_id.clone());
        if self.state == SessionState::AwaitingFrame {
            self.state = SessionState::Ready;
        }
        Dispatch::Handled(vec![SessionSignal::Ready { frame_id }])
    }

    fn on_response(&mut self, name: &str, data: &Value) -> Result<Dispatch, SessionError> {
        let key = name.to_ascii_lowercase();
        if !self.pending.remove(&key) {
            return Ok(Dispatch::Dropped(DropReason::Unsolicited(key)));
        }

        if key == AUTH_REQUEST.to_ascii_lowercase() {
            return self.on_authentication(data);
        }
        if key == RECORD_REQUEST.to_ascii_lowercase() {
            return Ok(match self.apply_record(data) {
                Some(signal) => Dispatch::Handled(vec![signal]),
                None => Dispatch::Dropped(DropReason::RecordRejected),
            });
        }
        Ok(Dispatch::Dropped(DropReason::Unsolicited(key)))
    }

    fn on_authentication(&mut self, data: &Value) -> Result<Dispatch, SessionError> {
        if self.member.is_some() {
            return Ok(Dispatch::Dropped(DropReason::AlreadyAuthenticated));
        }
        let identity = MemberIdentity::from_payload(data).map_err(|e| {
            warn!("Host authentication payload rejected: {}", e);
            SessionError::InvalidAuthPayload(e.to_string())
        })?;

        self.store.write_identity(&identity);
        self.member = Some(identity.clone());
        self.state = SessionState::Authenticated;
        info!("Member {} authenticated", identity.member_id);
        Ok(Dispatch::Handled(vec![SessionSignal::Authenticated(identity)]))
    }

    fn apply_record(&mut self, data: &Value) -> Option<SessionSignal> {
        let (record, path) = match parse_active_record(data) {
            Parsed::Strict(record) => (record, ParsePath::Strict),
            Parsed::Lenient(record) => (record, ParsePath::Lenient),
            Parsed::Rejected => {
                debug!("Record binding payload unusable");
                return None;
            }
        };
        self.active_record = Some(record.clone());
        Some(SessionSignal::RecordChanged { record, path })
    }

    fn on_event(&mut self, name: String, data: &Value, id: Value) -> Dispatch {
        // Ack goes out before anything else looks at the payload
        let ack = Outbound::EventAck {
            name: name.clone(),
            id,
            frame_id: self.frame_id.clone(),
        };
        self.port.post(&ack, &self.target());

        let mut signals = vec![SessionSignal::EventAcknowledged { name }];
        if let Some(binding) = embedded_record(data) {
            if let Some(signal) = self.apply_record(binding) {
                signals.push(signal);
            }
        }
        Dispatch::Handled(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::port::RecordingPort;
    use serde_json::json;

    const HOST: &str = "https://na.myconnectwise.net";

    fn session() -> HostSession<RecordingPort> {
        let mut session = HostSession::new(RecordingPort::framed(), OriginAllowList::default());
        session.start();
        session
    }

    #[test]
    fn test_start_broadcasts_ready_once() {
        let mut session = session();
        assert!(!session.start());
        assert_eq!(
            session.port().sent(),
            vec![(Outbound::Ready, Target::Wildcard)]
        );
    }

    #[test]
    fn test_top_level_window_stays_silent() {
        let mut session = HostSession::new(RecordingPort::top_level(), OriginAllowList::default());
        assert!(!session.start());
        assert!(session.port().sent().is_empty());
    }

    #[test]
    fn test_requests_need_frame() {
        let mut session = session();
        assert_eq!(session.request_authentication(), Err(SessionError::NotReady));
        assert_eq!(session.port().sent().len(), 1);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut session = session();
        assert!(!session.attach());
        session.detach();
        let dispatch = session
            .handle_message(HOST, &json!({ "MessageFrameID": "f" }))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::Detached));
        assert!(session.attach());
    }

    #[test]
    fn test_unsolicited_response_dropped() {
        let mut session = session();
        session
            .handle_message(HOST, &json!({ "MessageFrameID": "f" }))
            .unwrap();
        let dispatch = session
            .handle_message(HOST, &json!({ "response": "getScreenObject", "data": { "id": 1 } }))
            .unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Dropped(DropReason::Unsolicited("getscreenobject".into()))
        );
        assert!(session.active_record().is_none());
    }
}
