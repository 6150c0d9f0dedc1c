//! Host channel: the handshake and message protocol with the parent
//! window that embeds Deskmate.
//!
//! Transport-agnostic. The embedding shell feeds inbound messages to
//! [`HostSession::handle_message`] and supplies a [`HostPort`] for replies.

pub mod envelope;
pub mod identity;
pub mod origin;
pub mod port;
pub mod record;
pub mod session;

pub use envelope::{Envelope, EnvelopeError, Outbound, Target};
pub use identity::{IdentityStore, MemberIdentity, MemoryIdentityStore};
pub use origin::OriginAllowList;
pub use port::{HostPort, RecordingPort};
pub use record::{parse_active_record, ActiveRecord, Parsed};
pub use session::{
    DropReason, Dispatch, HostSession, ParsePath, SessionError, SessionSignal, SessionState,
};
