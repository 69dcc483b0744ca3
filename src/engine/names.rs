/// Normalize an author name into the key used for blacklist, target-list and
/// duplicate-window matching.
///
/// Lowercases, drops zero-width/BOM characters and collapses every run of
/// whitespace (including NBSP) into a single space. Both the classifier and the
/// list loader go through here, so membership is plain string equality.
pub fn normalize_name(raw: &str) -> String {
    raw.replace(['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(normalize_name("  Acme   Co "), "acme co");
        assert_eq!(normalize_name("ACME\tCO"), "acme co");
        assert_eq!(normalize_name("Acme\u{a0}Co"), "acme co");
    }

    #[test]
    fn test_strips_invisible_characters() {
        assert_eq!(normalize_name("\u{feff}Jane\u{200b} Doe"), "jane doe");
    }

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(normalize_name("   "), "");
    }
}
