//! Shared types and logic for Deskmate components.
//!
//! Records, lexicons, the host channel session and the turn throttle live
//! here so they carry no runtime or HTTP dependencies.

pub mod host;
pub mod lexicon;
pub mod records;
pub mod throttle;

pub use lexicon::Lexicon;
pub use records::{ConfigurationRecord, CustomField, NoteRecord, RecordRef, TicketRecord};
pub use throttle::{ThrottleResult, TurnThrottle, RATE_LIMIT_MESSAGE};
