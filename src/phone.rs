//! Phone-number normalization for channel addressing.

/// Collapse free-form phone text into the canonical digit-only channel
/// address. A bare 10-digit local number gets the default country code
/// prefixed; any other digit count passes through unchanged. Never fails:
/// malformed input yields a (likely unsendable) digit string and the
/// failure surfaces later as a send error.
pub fn normalize(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("{country_code}{digits}")
    } else {
        digits
    }
}

/// Trailing 10 digits of a raw phone entry, used for manual-entry lookups.
pub fn suffix10(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}
