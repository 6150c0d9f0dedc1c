//! Keyword extraction from ticket summaries.

use deskmate_shared::Lexicon;

/// Tokens this short or shorter never make it into a search
pub const MIN_TOKEN_LEN: usize = 4;

/// Up to `limit` search keywords from a summary, in original order.
///
/// Lowercases, strips everything that is not alphanumeric or whitespace,
/// then drops short tokens and stop words. An empty result means "do not
/// search", never "search everything".
pub fn extract_keywords(summary: &str, lexicon: &Lexicon, limit: usize) -> Vec<String> {
    let cleaned: String = summary
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for token in cleaned.split_whitespace() {
        if keywords.len() == limit {
            break;
        }
        if token.chars().count() < MIN_TOKEN_LEN || lexicon.is_stop_word(token) {
            continue;
        }
        if keywords.iter().any(|k| k == token) {
            continue;
        }
        keywords.push(token.to_string());
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(summary: &str) -> Vec<String> {
        extract_keywords(summary, &Lexicon::default(), 5)
    }

    #[test]
    fn test_vpn_summary() {
        assert_eq!(
            extract("VPN keeps disconnecting every afternoon"),
            vec!["disconnecting", "every", "afternoon"]
        );
    }

    #[test]
    fn test_punctuation_is_stripped_not_split() {
        assert_eq!(extract("Outlook: can't send e-mail!!"), vec!["outlook", "send", "email"]);
    }

    #[test]
    fn test_limit_and_order() {
        let words = extract_keywords(
            "printer scanner monitor keyboard laptop docking",
            &Lexicon::default(),
            4,
        );
        assert_eq!(words, vec!["printer", "scanner", "monitor", "keyboard"]);
    }

    #[test]
    fn test_repeated_tokens_counted_once() {
        assert_eq!(extract("printer printer PRINTER jam"), vec!["printer"]);
    }

    #[test]
    fn test_only_filler_yields_nothing() {
        assert!(extract("URGENT: user issue, please help!!").is_empty());
        assert!(extract("").is_empty());
        assert!(extract("pc is off").is_empty());
    }
}
