//! Context synthesizer.
//!
//! Renders the grounding document the provider answers from. Section order
//! is fixed. Every value comes from a gateway record verbatim or is shown as
//! [`NOT_STATED`]; nothing is inferred here.

use chrono::{DateTime, Utc};
use deskmate_shared::{ConfigurationRecord, NoteRecord, RecordRef, TicketRecord};
use std::fmt::Write;

use super::resolution::{truncate_chars, RankedEvidence};
use crate::gateway::TicketBundle;

/// Marker for any value the records do not carry
pub const NOT_STATED: &str = "Not stated";

/// A similar ticket together with the notes mined from it
#[derive(Debug, Clone, PartialEq)]
pub struct MinedCandidate {
    pub ticket: TicketRecord,
    pub evidence: RankedEvidence,
}

/// How similar tickets are rendered
#[derive(Debug, Clone, Copy)]
pub enum SimilarBlock<'a> {
    Plain(&'a [TicketRecord]),
    Mined(&'a [MinedCandidate]),
}

fn or_unknown(value: Option<&str>) -> &str {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_STATED)
}

fn ref_name(value: &Option<RecordRef>) -> &str {
    or_unknown(value.as_ref().and_then(RecordRef::display_name))
}

fn date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| NOT_STATED.to_string())
}

fn heading(out: &mut String, title: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "=== {} ===", title);
}

#[derive(Debug, Clone)]
pub struct ContextSynthesizer {
    max_chars: usize,
}

impl ContextSynthesizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn synthesize(&self, bundle: &TicketBundle, similar: Option<SimilarBlock<'_>>) -> String {
        let mut out = String::new();
        render_header(&mut out, &bundle.ticket);
        render_custom_fields(&mut out, &bundle.ticket);
        render_description(&mut out, bundle);
        render_notes(&mut out, &bundle.notes);
        render_configurations(&mut out, &bundle.configurations);
        match similar {
            Some(SimilarBlock::Plain(tickets)) => render_similar_plain(&mut out, tickets),
            Some(SimilarBlock::Mined(candidates)) => render_similar_mined(&mut out, candidates),
            None => {}
        }
        truncate_chars(&out, self.max_chars)
    }
}

fn render_header(out: &mut String, ticket: &TicketRecord) {
    heading(out, &format!("TICKET #{}", ticket.id));
    let _ = writeln!(out, "Summary: {}", or_unknown(ticket.summary.as_deref()));
    let _ = writeln!(out, "Status: {}", ref_name(&ticket.status));
    let _ = writeln!(out, "Priority: {}", ref_name(&ticket.priority));
    let _ = writeln!(out, "Company: {}", ref_name(&ticket.company));
    let _ = writeln!(out, "Contact: {}", ref_name(&ticket.contact));
    let _ = writeln!(out, "Board: {}", ref_name(&ticket.board));
    let _ = writeln!(
        out,
        "Type: {} / {} / {}",
        ref_name(&ticket.ticket_type),
        ref_name(&ticket.sub_type),
        ref_name(&ticket.item)
    );
    let _ = writeln!(out, "Severity: {}", or_unknown(ticket.severity.as_deref()));
    let _ = writeln!(out, "Impact: {}", or_unknown(ticket.impact.as_deref()));
    let _ = writeln!(out, "Assigned: {}", or_unknown(ticket.resources.as_deref()));
    let _ = writeln!(out, "Opened: {}", date(ticket.date_entered));
    let _ = writeln!(out, "Closed: {}", date(ticket.closed_date));
}

fn render_custom_fields(out: &mut String, ticket: &TicketRecord) {
    let fields: Vec<(String, String)> = ticket
        .custom_fields
        .iter()
        .filter_map(|f| {
            let value = f.rendered_value()?;
            let caption = or_unknown(f.caption.as_deref()).to_string();
            Some((caption, value))
        })
        .collect();
    if fields.is_empty() {
        return;
    }
    heading(out, "CUSTOM FIELDS");
    for (caption, value) in fields {
        let _ = writeln!(out, "{}: {}", caption, value);
    }
}

fn render_description(out: &mut String, bundle: &TicketBundle) {
    let from_ticket = bundle
        .ticket
        .initial_description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let description = from_ticket.or_else(|| {
        bundle
            .notes
            .iter()
            .find(|n| n.description && !n.body().trim().is_empty())
            .map(|n| n.body().trim())
    });
    if let Some(description) = description {
        heading(out, "INITIAL DESCRIPTION");
        let _ = writeln!(out, "{}", description);
    }
}

fn render_note(out: &mut String, note: &NoteRecord, label: &str) {
    let _ = writeln!(
        out,
        "[{}] [{}] by {}:",
        date(note.created_at),
        label,
        or_unknown(note.created_by.as_deref())
    );
    let _ = writeln!(out, "{}", or_unknown(Some(note.body())));
}

fn render_notes(out: &mut String, notes: &[NoteRecord]) {
    heading(out, "NOTES (oldest first)");
    if notes.is_empty() {
        let _ = writeln!(out, "No notes recorded.");
        return;
    }
    for note in notes {
        render_note(out, note, note.flag_label());
    }
}

fn render_configurations(out: &mut String, configs: &[ConfigurationRecord]) {
    heading(out, "CONFIGURATIONS");
    if configs.is_empty() {
        let _ = writeln!(out, "No configurations attached.");
        return;
    }
    for config in configs {
        let _ = writeln!(
            out,
            "- {} (#{}, {}, {})",
            or_unknown(config.name.as_deref()),
            config.id,
            ref_name(&config.config_type),
            ref_name(&config.status)
        );
        let _ = writeln!(
            out,
            "  Manufacturer: {} | Model: {} | Serial: {}",
            ref_name(&config.manufacturer),
            or_unknown(config.model_number.as_deref()),
            or_unknown(config.serial_number.as_deref())
        );
        let _ = writeln!(
            out,
            "  OS: {} {} | IP: {} | Last login: {}",
            or_unknown(config.os_type.as_deref()),
            config.os_info.as_deref().map(str::trim).unwrap_or(""),
            or_unknown(config.ip_address.as_deref()),
            or_unknown(config.last_login_name.as_deref())
        );
        let _ = writeln!(out, "  Warranty expires: {}", date(config.warranty_expiration_date));
        if let Some(notes) = config.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let _ = writeln!(out, "  Notes: {}", notes);
        }
    }
}

fn similar_line(ticket: &TicketRecord) -> String {
    format!(
        "#{} | {} | {} | {} | opened {}",
        ticket.id,
        or_unknown(ticket.summary.as_deref()),
        ref_name(&ticket.status),
        ref_name(&ticket.company),
        date(ticket.date_entered)
    )
}

fn render_similar_plain(out: &mut String, tickets: &[TicketRecord]) {
    heading(out, "SIMILAR TICKETS");
    for ticket in tickets {
        let _ = writeln!(out, "- {}", similar_line(ticket));
    }
}

fn render_similar_mined(out: &mut String, candidates: &[MinedCandidate]) {
    heading(out, "SIMILAR TICKETS WITH RESOLUTION NOTES");
    for candidate in candidates {
        let _ = writeln!(out, "--- {} ---", similar_line(&candidate.ticket));
        if candidate.evidence.is_empty() {
            let _ = writeln!(out, "No resolution notes available.");
            continue;
        }
        for item in &candidate.evidence.notes {
            render_note(out, &item.note, item.role.label());
        }
    }
}
