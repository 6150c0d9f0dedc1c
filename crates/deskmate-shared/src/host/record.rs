//! Active record binding reported by the host.
//!
//! Hosts are inconsistent about this payload, so parsing is two-stage:
//! a strict read of the documented shape, then a lenient read that salvages
//! whatever id it can and fills the rest with defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_RECORD_KIND: &str = "ticket";
pub const DEFAULT_HOSTING_MODE: &str = "pod";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub id: i64,
    pub kind: String,
    pub hosting_mode: String,
}

/// Which parse path produced a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Strict(T),
    Lenient(T),
    Rejected,
}

impl<T> Parsed<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Parsed::Strict(v) | Parsed::Lenient(v) => Some(v),
            Parsed::Rejected => None,
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Parsed::Strict(_))
    }

    pub fn is_lenient(&self) -> bool {
        matches!(self, Parsed::Lenient(_))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictBinding {
    id: i64,
    screen: String,
    mode: String,
}

const ID_KEYS: &[&str] = &["id", "recordId", "recid", "ID"];
const KIND_KEYS: &[&str] = &["screen", "kind", "type"];
const MODE_KEYS: &[&str] = &["mode", "hostingMode"];

/// Keys under which events nest a record binding
const EMBED_KEYS: &[&str] = &["screenObject", "record"];

fn id_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_from(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_of<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn lenient(data: &Value) -> Option<ActiveRecord> {
    let (id, kind, mode) = match data {
        Value::Array(items) => (
            items.first().and_then(id_from)?,
            items.get(1).and_then(text_from),
            items.get(2).and_then(text_from),
        ),
        Value::Object(map) => (
            first_of(map, ID_KEYS).and_then(id_from)?,
            first_of(map, KIND_KEYS).and_then(text_from),
            first_of(map, MODE_KEYS).and_then(text_from),
        ),
        Value::Number(_) | Value::String(_) => (id_from(data)?, None, None),
        _ => return None,
    };

    Some(ActiveRecord {
        id,
        kind: kind.unwrap_or_else(|| DEFAULT_RECORD_KIND.to_string()),
        hosting_mode: mode.unwrap_or_else(|| DEFAULT_HOSTING_MODE.to_string()),
    })
}

/// Parse a record-binding response payload
pub fn parse_active_record(data: &Value) -> Parsed<ActiveRecord> {
    if let Ok(strict) = serde_json::from_value::<StrictBinding>(data.clone()) {
        if !strict.screen.trim().is_empty() && !strict.mode.trim().is_empty() {
            return Parsed::Strict(ActiveRecord {
                id: strict.id,
                kind: strict.screen.trim().to_string(),
                hosting_mode: strict.mode.trim().to_string(),
            });
        }
    }
    match lenient(data) {
        Some(record) => Parsed::Lenient(record),
        None => Parsed::Rejected,
    }
}

/// Find a record binding inside an event payload, if it carries one
pub fn embedded_record(data: &Value) -> Option<&Value> {
    let map = data.as_object()?;
    if let Some(inner) = first_of(map, EMBED_KEYS) {
        return Some(inner);
    }
    if first_of(map, ID_KEYS).is_some() {
        return Some(data);
    }
    None
}
