/// Local validation of export items
///
/// Runs before any network call: an item rejected here never consumes
/// rate-limit quota.
use crate::errors::AppError;
use crate::models::ExportItem;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

/// Placeholder fragments that show up in scraped or hand-typed lead lists.
const FAKE_PATTERNS: [&str; 4] = ["999999", "111111", "000000", "123456789"];

/// Longest email accepted by the campaign service.
const MAX_EMAIL_LEN: usize = 254;

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        // RFC 5322 simplified: local@domain.tld
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

/// Validate email address
///
/// Checks for:
/// - Minimum and maximum length
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - Basic `local@domain.tld` structure
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() < 5 || email.len() > MAX_EMAIL_LEN {
        return false;
    }

    if let Some(pattern) = FAKE_PATTERNS.iter().find(|p| email.contains(*p)) {
        tracing::warn!("Rejecting email with fake pattern '{}': {}", pattern, email);
        return false;
    }

    email_regex().is_match(email)
}

/// Validate and normalize a phone number to E.164.
///
/// Numbers without a leading `+` are parsed in `default_region`.
///
/// Returns: (is_valid, normalized_phone_or_error_msg)
pub fn normalize_phone(raw: &str, default_region: &str) -> (bool, String) {
    if raw.trim().is_empty() || raw.len() < 7 {
        return (false, "Phone too short".to_string());
    }

    let region = default_region.trim().to_ascii_uppercase().parse::<CountryId>().ok();

    match phonenumber::parse(region, raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Valid phone: {} → {}", raw, formatted);
            (true, formatted)
        }
        Ok(_) => (false, "Invalid phone number".to_string()),
        Err(e) => (false, format!("Parse error: {:?}", e)),
    }
}

/// Checks one export item before submission.
///
/// # Errors
///
/// A `validation` error coded `MISSING_EMAIL`, `INVALID_EMAIL` or
/// `INVALID_PHONE`.
pub fn validate_item(item: &ExportItem, default_region: &str) -> Result<(), AppError> {
    if item.email.trim().is_empty() {
        return Err(AppError::validation("Email is required").with_code("MISSING_EMAIL"));
    }

    if !is_valid_email(&item.email) {
        return Err(
            AppError::validation(format!("Invalid email address: {}", item.email.trim()))
                .with_code("INVALID_EMAIL"),
        );
    }

    if let Some(phone) = item.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        let (valid, detail) = normalize_phone(phone, default_region);
        if !valid {
            return Err(
                AppError::validation(format!("Invalid phone number {}: {}", phone, detail))
                    .with_code("INVALID_PHONE"),
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co.uk"));
        assert!(is_valid_email("  padded@example.com "));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("missing@domain"));
        assert!(!is_valid_email("user @example.com"));
        assert!(!is_valid_email("lead999999@example.com"));
    }

    #[test]
    fn test_phone_normalization() {
        let (valid, normalized) = normalize_phone("+16502530000", "US");
        assert!(valid);
        assert_eq!(normalized, "+16502530000");

        let (valid, normalized) = normalize_phone("(650) 253-0000", "US");
        assert!(valid);
        assert_eq!(normalized, "+16502530000");

        let (valid, _) = normalize_phone("123", "US");
        assert!(!valid);
    }

    #[test]
    fn test_validate_item_codes() {
        let missing = validate_item(&ExportItem::new("  "), "US").unwrap_err();
        assert_eq!(missing.code.as_deref(), Some("MISSING_EMAIL"));
        assert!(!missing.retryable);

        let invalid = validate_item(&ExportItem::new("nope"), "US").unwrap_err();
        assert_eq!(invalid.code.as_deref(), Some("INVALID_EMAIL"));

        let mut item = ExportItem::new("ana@acme.io");
        item.phone = Some("12".to_string());
        let phone = validate_item(&item, "US").unwrap_err();
        assert_eq!(phone.code.as_deref(), Some("INVALID_PHONE"));

        item.phone = None;
        assert!(validate_item(&item, "US").is_ok());
    }
}
