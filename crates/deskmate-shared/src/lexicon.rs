//! Word lists that drive the evidence heuristics.
//!
//! Kept as data so deployments can tune them from config without touching
//! the keyword, ranking or mining code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Service-desk filler that never helps narrow a search
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "user", "users", "issue", "issues", "help", "urgent", "please", "problem",
    "problems", "need", "needs", "keeps", "with", "from", "that", "this",
    "have", "having", "when", "will", "cannot", "cant", "doesnt", "dont",
    "working", "work", "works", "error", "errors", "request", "ticket",
    "asap", "again", "after", "still", "some", "they", "their", "there",
    "what", "about", "into", "unable", "getting", "being",
];

/// Status names that mean the ticket reached a settled outcome
pub const DEFAULT_CLOSED_STATES: &[&str] = &["closed", "resolved", "completed"];

/// Words that turn a closed-sounding status back into an open one
/// ("Not Completed", "Unresolved", "Incomplete - Completed")
pub const DEFAULT_OPEN_MARKERS: &[&str] = &[
    "not", "no", "non", "never", "un", "unresolved", "unclosed", "uncompleted",
    "incomplete", "reopened", "reopen",
];

/// Verbs that usually describe the fix itself
pub const DEFAULT_ACTION_VERBS: &[&str] = &[
    "installed", "reinstalled", "replaced", "reset", "reconfigured", "configured",
    "rebooted", "restarted", "updated", "upgraded", "patched", "removed",
    "repaired", "fixed", "resolved", "cleared", "enabled", "disabled",
    "restored", "migrated", "renewed", "recreated", "remapped", "flushed",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lexicon {
    #[serde(default = "default_stop_words")]
    pub stop_words: BTreeSet<String>,
    #[serde(default = "default_closed_states")]
    pub closed_states: Vec<String>,
    #[serde(default = "default_open_markers")]
    pub open_markers: Vec<String>,
    #[serde(default = "default_action_verbs")]
    pub action_verbs: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

fn default_stop_words() -> BTreeSet<String> {
    owned(DEFAULT_STOP_WORDS).into_iter().collect()
}

fn default_closed_states() -> Vec<String> {
    owned(DEFAULT_CLOSED_STATES)
}

fn default_open_markers() -> Vec<String> {
    owned(DEFAULT_OPEN_MARKERS)
}

fn default_action_verbs() -> Vec<String> {
    owned(DEFAULT_ACTION_VERBS)
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            stop_words: default_stop_words(),
            closed_states: default_closed_states(),
            open_markers: default_open_markers(),
            action_verbs: default_action_verbs(),
        }
    }
}

impl Lexicon {
    /// Whether a lowercase token is a stop word
    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// Whether a status name reads as closed, resolved or completed.
    ///
    /// Hosts decorate status names (">Closed", "Completed - Billed"), so the
    /// name is split into lowercase words and a closed state must appear as
    /// whole words. Any open marker word ("not", "unresolved") vetoes it.
    pub fn is_closed_status(&self, status: Option<&str>) -> bool {
        let Some(status) = status else {
            return false;
        };
        let words = status_words(status);
        if words
            .iter()
            .any(|w| self.open_markers.iter().any(|m| m == w))
        {
            return false;
        }
        self.closed_states.iter().any(|state| {
            let state = status_words(state);
            !state.is_empty() && words.windows(state.len()).any(|run| run == state.as_slice())
        })
    }

    /// Lowercase every entry. Config files are hand-edited.
    pub fn normalized(mut self) -> Self {
        self.stop_words = self.stop_words.iter().map(|w| w.trim().to_lowercase()).collect();
        self.closed_states = self
            .closed_states
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self.open_markers = self
            .open_markers
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self.action_verbs = self
            .action_verbs
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self
    }
}

/// Lowercase alphanumeric runs of a status name
fn status_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
