use teloxide::types::ChatId;

/// How permissive numeric source matching is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMatching {
    /// Exact ids and `@handles` only.
    Strict,
    /// Also accept an id that is a substring of the entry, or the reverse.
    ///
    /// Kept for rules saved by older versions, which matched this way. It can
    /// accept unrelated chats whose ids overlap (`-100` matches `-1001234`).
    LegacySubstring,
}

impl SourceMatching {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            SourceMatching::LegacySubstring
        } else {
            SourceMatching::Strict
        }
    }
}

/// Whether the inbound chat satisfies a comma-separated source spec.
pub fn source_matches(
    spec: &str,
    chat_id: ChatId,
    chat_handle: Option<&str>,
    matching: SourceMatching,
) -> bool {
    let id = chat_id.0.to_string();

    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == id {
                return true;
            }
            if let Some(wanted) = entry.strip_prefix('@') {
                return chat_handle
                    .map(|h| h.trim_start_matches('@').eq_ignore_ascii_case(wanted))
                    .unwrap_or(false);
            }
            matching == SourceMatching::LegacySubstring
                && (entry.contains(id.as_str()) || id.contains(entry))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: SourceMatching = SourceMatching::Strict;
    const LEGACY: SourceMatching = SourceMatching::LegacySubstring;

    #[test]
    fn exact_id_matches() {
        assert!(source_matches("-100111", ChatId(-100111), None, STRICT));
        assert!(!source_matches("-100111", ChatId(-100222), None, STRICT));
    }

    #[test]
    fn handles_match_case_insensitively() {
        assert!(source_matches("@Chan", ChatId(-1), Some("chan"), STRICT));
        assert!(source_matches("@chan", ChatId(-1), Some("@CHAN"), STRICT));
        assert!(!source_matches("@chan", ChatId(-1), Some("channel"), STRICT));
        assert!(!source_matches("@chan", ChatId(-1), None, LEGACY));
    }

    #[test]
    fn comma_separated_entries_are_trimmed() {
        let spec = " -100111 , @news ,, -100333";
        assert!(source_matches(spec, ChatId(-100333), None, STRICT));
        assert!(source_matches(spec, ChatId(-5), Some("news"), STRICT));
        assert!(!source_matches(spec, ChatId(-100444), None, STRICT));
    }

    #[test]
    fn legacy_mode_accepts_substring_overlap() {
        assert!(source_matches("-1001234", ChatId(-100), None, LEGACY));
        assert!(source_matches("123", ChatId(-1001234), None, LEGACY));
        assert!(!source_matches("-1001234", ChatId(-100), None, STRICT));
    }

    #[test]
    fn empty_spec_matches_nothing() {
        assert!(!source_matches("", ChatId(-100111), None, LEGACY));
        assert!(!source_matches(" , ", ChatId(-100111), Some("x"), LEGACY));
    }
}
