//! Data masking for sensitive values recorded in the ledger.
//!
//! Masking runs before hashing, so the ledger never holds the raw secret and
//! the chain still verifies.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Field names masked by default (matched case-insensitively as substrings)
pub const DEFAULT_MASKED_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "authorization",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "social_security",
    "private_key",
    "iban",
];

/// Stand-in for masked non-string values
pub const REDACTED: &str = "[REDACTED]";

static SSN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"));

static CREDIT_CARD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").expect("valid regex")
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});

/// Masking configuration
#[derive(Debug, Clone)]
pub struct MaskingConfig {
    /// Fields whose values are always masked
    pub masked_fields: Vec<String>,

    /// Replace SSN-shaped substrings in free text
    pub mask_ssn: bool,

    /// Replace card-number-shaped substrings in free text
    pub mask_credit_cards: bool,

    /// Replace email addresses in free text. Off by default: client records
    /// legitimately carry email addresses that auditors need to see.
    pub mask_emails: bool,

    pub mask_char: char,

    /// Characters left visible at the end of a masked field value
    pub show_last_chars: usize,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            masked_fields: DEFAULT_MASKED_FIELDS.iter().map(|s| s.to_string()).collect(),
            mask_ssn: true,
            mask_credit_cards: true,
            mask_emails: false,
            mask_char: '*',
            show_last_chars: 4,
        }
    }
}

impl MaskingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No masking at all
    pub fn disabled() -> Self {
        Self {
            masked_fields: Vec::new(),
            mask_ssn: false,
            mask_credit_cards: false,
            mask_emails: false,
            mask_char: '*',
            show_last_chars: 0,
        }
    }

    pub fn add_field(mut self, field: impl Into<String>) -> Self {
        self.masked_fields.push(field.into().to_lowercase());
        self
    }

    pub fn mask_emails(mut self, mask: bool) -> Self {
        self.mask_emails = mask;
        self
    }

    pub fn show_last_chars(mut self, n: usize) -> Self {
        self.show_last_chars = n;
        self
    }

    fn is_masked_field(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.masked_fields.iter().any(|field| key.contains(field.as_str()))
    }
}

/// Replace sensitive patterns in free text
pub fn mask_string(input: &str, config: &MaskingConfig) -> String {
    let mut result = input.to_string();

    if config.mask_ssn {
        result = SSN_REGEX.replace_all(&result, "[SSN]").into_owned();
    }
    if config.mask_credit_cards {
        result = CREDIT_CARD_REGEX.replace_all(&result, "[CARD]").into_owned();
    }
    if config.mask_emails {
        result = EMAIL_REGEX.replace_all(&result, "[EMAIL]").into_owned();
    }

    result
}

/// Mask a value, leaving the last `show_last` characters visible
///
/// ```
/// use citadel_audit::masking::mask_value;
///
/// assert_eq!(mask_value("secret123", '*', 3), "******123");
/// assert_eq!(mask_value("pässwört", '*', 2), "******rt");
/// ```
pub fn mask_value(value: &str, mask_char: char, show_last: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= show_last {
        return mask_char.to_string().repeat(chars.len());
    }

    let masked_len = chars.len() - show_last;
    let mut out: String = std::iter::repeat_n(mask_char, masked_len).collect();
    out.extend(&chars[masked_len..]);
    out
}

/// Mask sensitive fields and patterns in a JSON tree
pub fn mask_json(value: &Value, config: &MaskingConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let masked = if config.is_masked_field(key) {
                        match val {
                            Value::String(s) if s == REDACTED => val.clone(),
                            Value::String(s) => {
                                Value::String(mask_value(s, config.mask_char, config.show_last_chars))
                            }
                            Value::Null => Value::Null,
                            _ => Value::String(REDACTED.to_string()),
                        }
                    } else {
                        mask_json(val, config)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_json(v, config)).collect()),
        Value::String(s) => Value::String(mask_string(s, config)),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("secret123", '*', 3), "******123");
        assert_eq!(mask_value("abc", '*', 3), "***");
        assert_eq!(mask_value("", '*', 3), "");
    }

    #[test]
    fn test_mask_json_fields() {
        let config = MaskingConfig::default();
        let data = json!({
            "name": "Acme",
            "apiToken": "tok_abcdef1234",
            "bank": {"IBAN": "DE89370400440532013000", "pin": 1234},
        });

        let masked = mask_json(&data, &config);
        assert_eq!(masked["name"], "Acme");
        assert_eq!(masked["apiToken"], "**********1234");
        assert_eq!(masked["bank"]["IBAN"], "******************3000");
        // `pin` is not in the default list
        assert_eq!(masked["bank"]["pin"], 1234);
    }

    #[test]
    fn test_non_string_secret_redacted() {
        let config = MaskingConfig::default();
        let masked = mask_json(&json!({"password": {"hash": "x"}, "token": null}), &config);
        assert_eq!(masked["password"], "[REDACTED]");
        assert_eq!(masked["token"], Value::Null);
    }

    #[test]
    fn test_free_text_patterns() {
        let config = MaskingConfig::default();
        let masked = mask_json(
            &json!({"notes": "SSN 123-45-6789, card 4111 1111 1111 1111, mail a@b.io"}),
            &config,
        );
        let notes = masked["notes"].as_str().unwrap();
        assert!(notes.contains("[SSN]"));
        assert!(notes.contains("[CARD]"));
        assert!(notes.contains("a@b.io"));

        let strict = MaskingConfig::default().mask_emails(true);
        assert!(mask_string("mail a@b.io", &strict).contains("[EMAIL]"));
    }

    #[test]
    fn test_custom_field_and_disabled() {
        let config = MaskingConfig::default().add_field("DateOfBirth");
        let masked = mask_json(&json!({"dateOfBirth": "1990-01-01"}), &config);
        assert_ne!(masked["dateOfBirth"], "1990-01-01");

        let data = json!({"password": "hunter2"});
        assert_eq!(mask_json(&data, &MaskingConfig::disabled()), data);
    }

    #[test]
    fn test_masking_twice_is_stable() {
        let config = MaskingConfig::default();
        let data = json!({"password": "hunter2", "pin_token": 1234, "notes": "SSN 123-45-6789"});
        let once = mask_json(&data, &config);
        assert_eq!(mask_json(&once, &config), once);
    }
}
