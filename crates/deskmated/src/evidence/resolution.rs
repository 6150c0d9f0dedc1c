//! Resolution mining.
//!
//! Finds the notes in a closed ticket's history that most likely describe
//! the fix. Selection runs in priority order (flagged resolutions,
//! corrective-action verbs, opening context, closing context), drops
//! duplicates, caps the set, then restores chronological order.

use deskmate_shared::records::sort_chronologically;
use deskmate_shared::{Lexicon, NoteRecord, TicketRecord};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

use crate::config::MiningConfig;

/// Appended to note text that was cut short
pub const TRUNCATION_MARKER: &str = "… [truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteRole {
    Resolution,
    CorrectiveAction,
    ProblemContext,
    OutcomeContext,
}

impl NoteRole {
    pub fn label(&self) -> &'static str {
        match self {
            NoteRole::Resolution => "RESOLUTION",
            NoteRole::CorrectiveAction => "ACTION TAKEN",
            NoteRole::ProblemContext => "PROBLEM",
            NoteRole::OutcomeContext => "OUTCOME",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceNote {
    pub note: NoteRecord,
    pub role: NoteRole,
}

/// Selected notes, chronological
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedEvidence {
    pub notes: Vec<EvidenceNote>,
}

impl RankedEvidence {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }
}

pub struct ResolutionMiner {
    action_pattern: Option<Regex>,
    limits: MiningConfig,
}

impl ResolutionMiner {
    pub fn new(lexicon: &Lexicon, limits: MiningConfig) -> Self {
        let words: Vec<String> = lexicon
            .action_verbs
            .iter()
            .filter(|v| !v.is_empty())
            .map(|v| regex::escape(v))
            .collect();

        let action_pattern = if words.is_empty() {
            None
        } else {
            match Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Action verb pattern rejected, verb matching disabled: {}", e);
                    None
                }
            }
        };

        Self {
            action_pattern,
            limits,
        }
    }

    pub fn mentions_action(&self, text: &str) -> bool {
        self.action_pattern
            .as_ref()
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    }

    /// Mine notes regardless of ticket status
    pub fn mine(&self, notes: &[NoteRecord]) -> RankedEvidence {
        let mut ordered = notes.to_vec();
        sort_chronologically(&mut ordered);

        let mut picked: Vec<(usize, NoteRole)> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut take = |index: usize, role: NoteRole, picked: &mut Vec<(usize, NoteRole)>| {
            if seen.insert(ordered[index].id) {
                picked.push((index, role));
            }
        };

        for (i, note) in ordered.iter().enumerate() {
            if note.resolution {
                take(i, NoteRole::Resolution, &mut picked);
            }
        }
        for (i, note) in ordered.iter().enumerate() {
            if self.mentions_action(note.body()) {
                take(i, NoteRole::CorrectiveAction, &mut picked);
            }
        }
        for i in 0..ordered.len().min(self.limits.leading_notes) {
            take(i, NoteRole::ProblemContext, &mut picked);
        }
        let tail_start = ordered.len().saturating_sub(self.limits.trailing_notes);
        for i in tail_start..ordered.len() {
            take(i, NoteRole::OutcomeContext, &mut picked);
        }

        picked.truncate(self.limits.evidence_cap);
        picked.sort_by_key(|(index, _)| *index);

        RankedEvidence {
            notes: picked
                .into_iter()
                .map(|(index, role)| {
                    let mut note = ordered[index].clone();
                    note.text = Some(truncate_chars(note.body(), self.limits.note_chars));
                    EvidenceNote { note, role }
                })
                .collect(),
        }
    }

    /// Mine a candidate ticket; open tickets have no settled fix and yield nothing
    pub fn mine_candidate(
        &self,
        ticket: &TicketRecord,
        notes: &[NoteRecord],
        lexicon: &Lexicon,
    ) -> RankedEvidence {
        if !lexicon.is_closed_status(ticket.status_name()) {
            return RankedEvidence::default();
        }
        self.mine(notes)
    }
}

/// Cut `text` to at most `max` characters, marking the cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{}", text[..cut].trim_end(), TRUNCATION_MARKER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use deskmate_shared::RecordRef;

    fn note(id: i64, minute: u32, text: &str) -> NoteRecord {
        NoteRecord {
            id,
            text: Some(text.to_string()),
            created_at: Some(Utc.with_ymd_and_hms(2026, 6, 1, 9, minute, 0).unwrap()),
            ..Default::default()
        }
    }

    fn miner() -> ResolutionMiner {
        ResolutionMiner::new(&Lexicon::default(), MiningConfig::default())
    }

    #[test]
    fn test_whole_word_action_matching() {
        let miner = miner();
        assert!(miner.mentions_action("We REBOOTED the switch"));
        assert!(miner.mentions_action("reset."));
        assert!(!miner.mentions_action("preset values were fine"));
        assert!(!miner.mentions_action("uninstalledx"));
    }

    #[test]
    fn test_short_history_kept_whole_and_ordered() {
        let notes = vec![note(3, 30, "thanks"), note(1, 10, "printer down"), note(2, 20, "looking")];
        let evidence = miner().mine(&notes);
        let ids: Vec<i64> = evidence.notes.iter().map(|e| e.note.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(evidence.notes[0].role, NoteRole::ProblemContext);
        assert_eq!(evidence.notes[2].role, NoteRole::OutcomeContext);
    }

    #[test]
    fn test_flagged_resolution_outranks_position() {
        let mut fix = note(1, 0, "Replaced fuser unit");
        fix.resolution = true;
        let evidence = miner().mine(&[fix, note(2, 5, "user reports jam")]);
        assert_eq!(evidence.notes[0].role, NoteRole::Resolution);
    }

    #[test]
    fn test_truncation_marks_cut() {
        assert_eq!(truncate_chars("abcdef", 10), "abcdef");
        assert_eq!(truncate_chars("abcdef", 3), format!("abc{}", TRUNCATION_MARKER));
        assert_eq!(truncate_chars("ééééé", 2), format!("éé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_open_candidate_not_mined() {
        let ticket = TicketRecord {
            id: 5,
            status: Some(RecordRef::named(1, "In Progress")),
            ..Default::default()
        };
        let evidence =
            miner().mine_candidate(&ticket, &[note(1, 0, "rebooted")], &Lexicon::default());
        assert!(evidence.is_empty());
    }

    #[test]
    fn test_unresolved_candidate_not_mined() {
        let ticket = TicketRecord {
            id: 6,
            status: Some(RecordRef::named(4, "Unresolved")),
            ..Default::default()
        };
        let evidence =
            miner().mine_candidate(&ticket, &[note(1, 0, "rebooted")], &Lexicon::default());
        assert!(evidence.is_empty());
    }
}
