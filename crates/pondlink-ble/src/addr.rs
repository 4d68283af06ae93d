//! Device-address utilities.
//!
//! Scan results, stored board records, and user input disagree on MAC
//! formatting (with/without colons, mixed case). These helpers make the
//! comparisons colon- and case-insensitive.

use once_cell::sync::Lazy;
use regex::Regex;

static WITH_COLONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));
static WITHOUT_COLONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{12}$").expect("valid regex"));

/// Strip colons and uppercase: `"f4:65:0b:4a:8a:c6"` → `"F4650B4A8AC6"`.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.replace(':', "").to_uppercase()
}

/// Insert colons every two hex digits: `"F4650B4A8AC6"` → `"F4:65:0B:4A:8A:C6"`.
///
/// Input that is not 12 hex digits after normalization is returned normalized
/// but unformatted.
#[must_use]
pub fn format_address(address: &str) -> String {
    let normalized = normalize_address(address);
    if !WITHOUT_COLONS.is_match(&normalized) {
        return normalized;
    }
    normalized
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

/// Whether the string looks like a MAC address, in either format.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    WITH_COLONS.is_match(address) || WITHOUT_COLONS.is_match(address)
}

/// Compare two addresses regardless of formatting.
#[must_use]
pub fn addresses_equal(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    normalize_address(a) == normalize_address(b)
}
