use unicode_normalization::UnicodeNormalization;

/// Matching key for free-text names: compatibility-folded (full-width and
/// styled forms collapse to their plain letters), trimmed and lowercased.
pub fn normalize_name(value: &str) -> String {
    value.nfkc().collect::<String>().trim().to_lowercase()
}
