//! Member identity handed over by the host, and where it is kept.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub const FIELD_MEMBER_ID: &str = "member_id";
pub const FIELD_MEMBER_HASH: &str = "member_hash";
pub const FIELD_MEMBER_EMAIL: &str = "member_email";
pub const FIELD_COMPANY_ID: &str = "company_id";

/// Every key the identity store is allowed to hold
pub const IDENTITY_FIELDS: [&str; 4] = [
    FIELD_MEMBER_ID,
    FIELD_MEMBER_HASH,
    FIELD_MEMBER_EMAIL,
    FIELD_COMPANY_ID,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberIdentity {
    pub member_id: String,
    pub hash: String,
    pub email: Option<String>,
    pub company_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthPayloadError {
    #[error("authentication payload is not an object")]
    NotObject,

    #[error("authentication payload is missing {0}")]
    Missing(&'static str),
}

/// Raw shape the host sends. Field spelling varies between host versions.
#[derive(Debug, Deserialize)]
struct AuthPayload {
    #[serde(default, alias = "memberid", alias = "memberId")]
    member_id: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default, alias = "memberEmail", alias = "email")]
    member_email: Option<String>,
    #[serde(default, alias = "companyid", alias = "companyId")]
    company_id: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, AuthPayloadError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AuthPayloadError::Missing(field))
}

impl MemberIdentity {
    /// Strictly validate an authentication payload
    pub fn from_payload(data: &Value) -> Result<Self, AuthPayloadError> {
        if !data.is_object() {
            return Err(AuthPayloadError::NotObject);
        }
        let payload: AuthPayload =
            serde_json::from_value(data.clone()).map_err(|_| AuthPayloadError::NotObject)?;

        Ok(Self {
            member_id: required(payload.member_id, "memberid")?,
            hash: required(payload.hash, "hash")?,
            email: payload
                .member_email
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            company_id: required(payload.company_id, "companyid")?,
        })
    }
}

/// Key/value store for the authenticated identity (cookie jar in a browser)
pub trait IdentityStore: Send {
    fn get(&self, field: &str) -> Option<String>;
    fn set(&mut self, field: &str, value: &str);
    fn clear(&mut self);

    fn write_identity(&mut self, identity: &MemberIdentity) {
        self.set(FIELD_MEMBER_ID, &identity.member_id);
        self.set(FIELD_MEMBER_HASH, &identity.hash);
        if let Some(email) = &identity.email {
            self.set(FIELD_MEMBER_EMAIL, email);
        }
        self.set(FIELD_COMPANY_ID, &identity.company_id);
    }

    fn read_identity(&self) -> Option<MemberIdentity> {
        Some(MemberIdentity {
            member_id: self.get(FIELD_MEMBER_ID)?,
            hash: self.get(FIELD_MEMBER_HASH)?,
            email: self.get(FIELD_MEMBER_EMAIL),
            company_id: self.get(FIELD_COMPANY_ID)?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    values: HashMap<String, String>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, field: &str) -> Option<String> {
        self.values.get(field).cloned()
    }

    fn set(&mut self, field: &str, value: &str) {
        if IDENTITY_FIELDS.contains(&field) {
            self.values.insert(field.to_string(), value.to_string());
        } else {
            tracing::warn!("Refusing to store unknown identity field {}", field);
        }
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}
