//! PII detection and redaction.
//!
//! A finding only counts when the reply *introduces* the data — anything
//! the user already wrote in their own message is theirs to see again.

use std::sync::LazyLock;

use regex::Regex;

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        (
            "bearer_token",
            Regex::new(r"(?i)bearer\s+[A-Za-z0-9_\-\.=]{16,}").expect("pii regex"),
        ),
        (
            "api_key",
            Regex::new(r"\bsk-[A-Za-z0-9]{16,}\b").expect("pii regex"),
        ),
        (
            "secret_assignment",
            Regex::new(r#"(?i)\b(api[_-]?key|secret|token|password)\s*[:=]\s*['"]?[A-Za-z0-9_\-]{8,}"#)
                .expect("pii regex"),
        ),
        (
            "national_id",
            Regex::new(r"\b\d{2}\.\d{3}\.\d{3}\b|\b\d{8}-?[A-Za-z]\b").expect("pii regex"),
        ),
        (
            "phone",
            Regex::new(r"\+\d{1,3}[\s-]?\d{2,4}[\s-]?\d{3,4}[\s-]?\d{3,4}").expect("pii regex"),
        ),
        (
            "email",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("pii regex"),
        ),
    ]
});

/// Names of patterns the reply introduces that the input does not contain.
pub fn find_introduced(input: &str, reply: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    for (name, re) in PATTERNS.iter() {
        for m in re.find_iter(reply) {
            if !input.contains(m.as_str()) {
                found.push(*name);
                break;
            }
        }
    }
    found
}

/// Redact introduced matches in place; user-provided strings survive.
pub fn redact_introduced(input: &str, reply: &str) -> String {
    let mut out = reply.to_string();
    for (_, re) in PATTERNS.iter() {
        let matches: Vec<String> = re
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .filter(|m| !input.contains(m.as_str()))
            .collect();
        for m in matches {
            out = out.replace(&m, "[REDACTED]");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaked_token_is_found_and_redacted() {
        let input = "what's my key?";
        let reply = "Your key is sk-abcdef1234567890abcdef";
        assert_eq!(find_introduced(input, reply), vec!["api_key"]);
        let redacted = redact_introduced(input, reply);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("sk-abcdef"));
    }

    #[test]
    fn user_provided_email_is_not_a_finding() {
        let input = "write to ana@example.com about the invoice";
        let reply = "Done — I drafted a message for ana@example.com.";
        assert!(find_introduced(input, reply).is_empty());
        assert_eq!(redact_introduced(input, reply), reply);
    }

    #[test]
    fn introduced_email_is_a_finding() {
        let input = "who is the contact?";
        let reply = "The contact is jorge@empresa.com";
        assert_eq!(find_introduced(input, reply), vec!["email"]);
    }

    #[test]
    fn introduced_phone_is_redacted() {
        let out = redact_introduced("call the office", "Sure: +54 911 5555 0101");
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn clean_reply_passes() {
        assert!(find_introduced("hola", "¡Hola! ¿En qué te ayudo?").is_empty());
    }
}
