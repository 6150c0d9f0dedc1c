//! deskmated - ticket assistant daemon
//!
//! Answers technician questions about the ticket open in the PSA, grounded
//! in the ticket's own records and in evidence gathered from similar tickets.

pub mod completion;
pub mod config;
pub mod evidence;
pub mod gateway;
pub mod prompts;
pub mod routes;
pub mod server;
pub mod turn;

pub use config::DeskmateConfig;
pub use server::AppState;
pub use turn::{Prepared, ReplyKind, TurnEngine, TurnError, TurnMode, TurnReply, TurnRequest};
