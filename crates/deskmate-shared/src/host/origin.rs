//! Allow-list of host origins we accept messages from.

use serde::{Deserialize, Serialize};

/// Cloud domains the ticketing host serves its UI from
pub const DEFAULT_HOST_ORIGINS: &[&str] = &[
    "https://na.myconnectwise.net",
    "https://eu.myconnectwise.net",
    "https://au.myconnectwise.net",
    "https://aus.myconnectwise.net",
    "https://za.myconnectwise.net",
    "https://staging.connectwisedev.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct OriginAllowList {
    origins: Vec<String>,
}

impl From<Vec<String>> for OriginAllowList {
    fn from(origins: Vec<String>) -> Self {
        Self::new(origins)
    }
}

impl From<OriginAllowList> for Vec<String> {
    fn from(list: OriginAllowList) -> Self {
        list.origins
    }
}

/// Lowercase and drop trailing slashes so "https://Host/" == "https://host"
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| normalize_origin(o.as_ref()))
                .filter(|o| !o.is_empty() && o != "*" && o != "null")
                .collect(),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        let origin = normalize_origin(origin);
        self.origins.iter().any(|allowed| *allowed == origin)
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }
}

impl Default for OriginAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_ORIGINS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_origin_match_only() {
        let list = OriginAllowList::default();
        assert!(list.allows("https://na.myconnectwise.net"));
        assert!(list.allows("HTTPS://NA.myconnectwise.net/"));
        assert!(!list.allows("https://na.myconnectwise.net.evil.com"));
        assert!(!list.allows("http://na.myconnectwise.net"));
        assert!(!list.allows("null"));
    }

    #[test]
    fn test_wildcard_entries_are_ignored() {
        let list = OriginAllowList::new(["*", "https://psa.example.com"]);
        assert_eq!(list.origins(), ["https://psa.example.com".to_string()]);
        assert!(!list.allows("*"));
    }
}
