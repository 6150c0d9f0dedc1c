//! Outbound side of the host channel.

use super::envelope::{Outbound, Target};
use std::sync::{Arc, Mutex};

/// Delivers messages to the parent window
pub trait HostPort {
    /// True when this app is running inside a frame owned by someone else
    fn in_foreign_frame(&self) -> bool;

    fn post(&self, message: &Outbound, target: &Target);
}

/// Port that records every post, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct RecordingPort {
    framed: bool,
    sent: Arc<Mutex<Vec<(Outbound, Target)>>>,
}

impl RecordingPort {
    pub fn framed() -> Self {
        Self {
            framed: true,
            sent: Arc::default(),
        }
    }

    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Outbound, Target)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HostPort for RecordingPort {
    fn in_foreign_frame(&self) -> bool {
        self.framed
    }

    fn post(&self, message: &Outbound, target: &Target) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.clone(), target.clone()));
    }
}
