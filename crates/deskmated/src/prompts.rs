//! Prompt building for ticket questions.
//!
//! The provider sees: role + grounding rules + context document as the
//! system message, then a bounded slice of prior chat, then the question.

use crate::completion::{ChatMessage, Role};
use crate::evidence::NOT_STATED;

const ROLE_PREAMBLE: &str = "You are Deskmate, an assistant for service desk technicians. \
You answer questions about the ticket that is open in the PSA, using the ticket context below.";

/// Grounding rules (constant, always included)
fn grounding_rules() -> String {
    format!(
        r#"
=== GROUNDING RULES (MANDATORY) ===
1. Answer ONLY from the ticket context. NEVER invent names, dates, steps or outcomes.
2. A value shown as "{not_stated}" is unknown. Say it is unknown; do not guess it.
3. When you rely on another ticket, cite it by number (e.g. #1234).
4. Resolution notes describe what was done on THAT ticket. Present them as options, not facts about this one.
5. If the context does not answer the question, say what is missing.
"#,
        not_stated = NOT_STATED
    )
}

/// Full system message for a turn
pub fn system_prompt(context: &str) -> String {
    format!(
        "{}\n{}\n=== TICKET CONTEXT ===\n{}\n=== END CONTEXT ===\n\nBe concise and practical.",
        ROLE_PREAMBLE,
        grounding_rules(),
        context.trim_end()
    )
}

/// Assemble the provider message list. System messages in `history` are
/// dropped so callers cannot override the grounding rules.
pub fn build_messages(
    context: &str,
    history: &[ChatMessage],
    question: &str,
    history_limit: usize,
) -> Vec<ChatMessage> {
    let prior: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
        .collect();
    let skip = prior.len().saturating_sub(history_limit);

    let mut messages = Vec::with_capacity(prior.len() - skip + 2);
    messages.push(ChatMessage::system(system_prompt(context)));
    messages.extend(prior.into_iter().skip(skip).cloned());
    messages.push(ChatMessage::user(question.trim()));
    messages
}
