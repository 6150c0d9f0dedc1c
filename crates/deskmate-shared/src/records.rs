//! Read-only projections of ticketing-host records.
//!
//! The host defines the wire shapes; everything except identity is
//! optional here because the host omits fields freely depending on
//! board configuration and API version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{id, name}` reference the host embeds for related entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RecordRef {
    pub fn named(id: i64, name: &str) -> Self {
        Self {
            id: Some(id),
            name: Some(name.to_string()),
        }
    }

    /// Name with surrounding whitespace removed, if non-blank
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Custom field attached to a ticket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl CustomField {
    /// Rendered value, or None when the field carries nothing worth showing
    pub fn rendered_value(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Array(items) if items.is_empty() => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub id: i64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<RecordRef>,
    #[serde(default)]
    pub priority: Option<RecordRef>,
    #[serde(default)]
    pub company: Option<RecordRef>,
    #[serde(default)]
    pub contact: Option<RecordRef>,
    #[serde(default)]
    pub board: Option<RecordRef>,
    #[serde(default, rename = "type")]
    pub ticket_type: Option<RecordRef>,
    #[serde(default)]
    pub sub_type: Option<RecordRef>,
    #[serde(default)]
    pub item: Option<RecordRef>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub resources: Option<String>,
    #[serde(default)]
    pub date_entered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub initial_description: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

impl TicketRecord {
    pub fn status_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(RecordRef::display_name)
    }

    pub fn company_id(&self) -> Option<i64> {
        self.company.as_ref().and_then(|c| c.id)
    }

    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "detailDescriptionFlag")]
    pub description: bool,
    #[serde(default, rename = "internalAnalysisFlag")]
    pub internal_analysis: bool,
    #[serde(default, rename = "resolutionFlag")]
    pub resolution: bool,
    #[serde(default, rename = "externalFlag", alias = "customerUpdatedFlag")]
    pub customer_visible: bool,
    #[serde(default, rename = "dateCreated")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NoteRecord {
    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Short label for the most specific flag set on the note
    pub fn flag_label(&self) -> &'static str {
        if self.resolution {
            "Resolution"
        } else if self.internal_analysis {
            "Internal"
        } else if self.description {
            "Description"
        } else if self.customer_visible {
            "Discussion"
        } else {
            "Note"
        }
    }
}

/// Sort notes ascending by creation time; notes without a timestamp sort
/// first. Ties keep their input order.
pub fn sort_chronologically(notes: &mut [NoteRecord]) {
    notes.sort_by_key(|n| n.created_at);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRecord {
    pub id: i64,
    #[serde(default, alias = "deviceIdentifier")]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub config_type: Option<RecordRef>,
    #[serde(default)]
    pub status: Option<RecordRef>,
    #[serde(default)]
    pub manufacturer: Option<RecordRef>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub os_info: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub last_login_name: Option<String>,
    #[serde(default)]
    pub warranty_expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ticket_decodes_sparse_payload() {
        let ticket: TicketRecord = serde_json::from_value(serde_json::json!({
            "id": 4411,
            "summary": "Printer offline",
            "status": {"id": 3, "name": "Closed"},
            "type": {"name": "Hardware"},
            "dateEntered": "2026-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(ticket.status_name(), Some("Closed"));
        assert_eq!(ticket.ticket_type.as_ref().unwrap().name.as_deref(), Some("Hardware"));
        assert!(ticket.company_id().is_none());
        assert!(ticket.custom_fields.is_empty());
    }

    #[test]
    fn test_note_flags_decode() {
        let note: NoteRecord = serde_json::from_value(serde_json::json!({
            "id": 9,
            "text": "Replaced toner",
            "resolutionFlag": true,
            "customerUpdatedFlag": true,
            "dateCreated": "2026-03-02T08:30:00Z"
        }))
        .unwrap();

        assert!(note.resolution);
        assert!(note.customer_visible);
        assert!(!note.internal_analysis);
        assert_eq!(note.flag_label(), "Resolution");
    }

    #[test]
    fn test_sort_puts_undated_first_and_is_stable() {
        let at = |h| Some(Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).unwrap());
        let mut notes = vec![
            NoteRecord { id: 1, created_at: at(9), ..Default::default() },
            NoteRecord { id: 2, created_at: None, ..Default::default() },
            NoteRecord { id: 3, created_at: at(8), ..Default::default() },
            NoteRecord { id: 4, created_at: at(9), ..Default::default() },
        ];
        sort_chronologically(&mut notes);
        let ids: Vec<i64> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_custom_field_blank_values_hidden() {
        let blank = CustomField {
            caption: Some("Site".into()),
            value: Some(serde_json::json!("  ")),
            ..Default::default()
        };
        let set = CustomField {
            caption: Some("Floor".into()),
            value: Some(serde_json::json!(3)),
            ..Default::default()
        };
        assert!(blank.rendered_value().is_none());
        assert_eq!(set.rendered_value().as_deref(), Some("3"));
    }
}
