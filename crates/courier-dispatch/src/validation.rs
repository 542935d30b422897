//! Intake validation rules.

use std::sync::LazyLock;

use regex::Regex;

/// E.164-shaped phone numbers: leading `+`, first digit non-zero, 2-15
/// digits total, no separators.
static PHONE_NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("PHONE_NUMBER_REGEX is a valid pattern")
});

/// Validate a phone number, returning the trimmed form when it is valid.
#[must_use]
pub fn validate_phone_number(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    PHONE_NUMBER_REGEX.is_match(trimmed).then_some(trimmed)
}

/// Whether message content fits within the configured byte limit.
#[must_use]
pub fn content_within_limit(content: &str, max_length: usize) -> bool {
    content.len() <= max_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_numbers() {
        assert_eq!(validate_phone_number("+12025550100"), Some("+12025550100"));
        assert_eq!(validate_phone_number("  +12025550100  "), Some("+12025550100"));
        // Two digits is the minimum.
        assert_eq!(validate_phone_number("+12"), Some("+12"));
        // Fifteen digits is the maximum.
        assert_eq!(
            validate_phone_number("+123456789012345"),
            Some("+123456789012345")
        );
    }

    #[test]
    fn rejects_malformed_numbers() {
        // One digit is too short.
        assert_eq!(validate_phone_number("+1"), None);
        // Sixteen digits is too long.
        assert_eq!(validate_phone_number("+1234567890123456"), None);
        // Leading zero after the plus.
        assert_eq!(validate_phone_number("+0123456789"), None);
        // Missing plus, separators, letters.
        assert_eq!(validate_phone_number("12025550100"), None);
        assert_eq!(validate_phone_number("+1 202 555 0100"), None);
        assert_eq!(validate_phone_number("+1-202-555-0100"), None);
        assert_eq!(validate_phone_number("+1202555010a"), None);
        assert_eq!(validate_phone_number(""), None);
    }

    #[test]
    fn content_limit_is_inclusive() {
        assert!(content_within_limit(&"a".repeat(160), 160));
        assert!(!content_within_limit(&"a".repeat(161), 160));
        assert!(content_within_limit("", 160));
    }

    #[test]
    fn content_limit_counts_bytes_not_chars() {
        // Four-byte emoji: 40 of them exceed a 150-byte limit.
        let content = "🦀".repeat(40);
        assert!(!content_within_limit(&content, 150));
        assert!(content_within_limit(&content, 160));
    }
}
