//! Cumulative-to-incremental delta conversion.
//!
//! The upstream repeats the whole response so far in every
//! `choices[0].delta.content`. Clients expect only the new text. The
//! normalizer remembers the last cumulative value and emits the suffix.

/// Suffix of `current` that is new relative to `previous`.
///
/// Scans the longest common prefix on character boundaries. When `current`
/// extends `previous` the result is exactly `current[previous.len()..]`.
/// When it does not (the upstream shrank or rewrote its content) the whole
/// of `current` is returned: emitting the full text is the safe fallback,
/// not a merge.
pub fn incremental_suffix<'a>(previous: &str, current: &'a str) -> &'a str {
    let common = previous
        .char_indices()
        .zip(current.chars())
        .take_while(|((_, p), c)| p == c)
        .last()
        .map(|((idx, ch), _)| idx + ch.len_utf8())
        .unwrap_or(0);

    if common == previous.len() {
        &current[common..]
    } else {
        current
    }
}

/// Per-session normalizer state.
#[derive(Debug, Default, Clone)]
pub struct DeltaNormalizer {
    previous: String,
}

impl DeltaNormalizer {
    /// Create a normalizer with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next cumulative value and get the increment to emit.
    ///
    /// Returns `None` when nothing new arrived. The stored history is the
    /// full cumulative value either way.
    pub fn advance(&mut self, current: &str) -> Option<String> {
        let suffix = incremental_suffix(&self.previous, current);
        let increment = (!suffix.is_empty()).then(|| suffix.to_string());
        self.previous.clear();
        self.previous.push_str(current);
        increment
    }

    /// Last cumulative value seen.
    pub fn previous(&self) -> &str {
        &self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_extension() {
        assert_eq!(incremental_suffix("", "Hi"), "Hi");
        assert_eq!(incremental_suffix("Hi", "Hi there"), " there");
        assert_eq!(incremental_suffix("Hi there", "Hi there!"), "!");
        assert_eq!(incremental_suffix("same", "same"), "");
    }

    #[test]
    fn test_divergence_falls_back_to_full_content() {
        assert_eq!(incremental_suffix("Hello", "Help"), "Help");
        assert_eq!(incremental_suffix("Hi there", "Hi"), "Hi");
        assert_eq!(incremental_suffix("abc", "xyz"), "xyz");
    }

    #[test]
    fn test_multibyte_boundaries() {
        assert_eq!(incremental_suffix("héllo", "héllo wörld"), " wörld");
        // shares the byte prefix 0xC3 of 'é' and 'è' but not the character
        assert_eq!(incremental_suffix("é", "è"), "è");
        assert_eq!(incremental_suffix("日本", "日本語"), "語");
    }

    #[test]
    fn test_normalizer_sequence() {
        let mut normalizer = DeltaNormalizer::new();
        assert_eq!(normalizer.advance("Hi").as_deref(), Some("Hi"));
        assert_eq!(normalizer.advance("Hi there").as_deref(), Some(" there"));
        assert_eq!(normalizer.advance("Hi there").as_deref(), None);
        assert_eq!(normalizer.advance("Hi there!").as_deref(), Some("!"));
        assert_eq!(normalizer.previous(), "Hi there!");
    }

    #[test]
    fn test_history_tracks_full_value_after_rewrite() {
        let mut normalizer = DeltaNormalizer::new();
        normalizer.advance("draft one");
        assert_eq!(normalizer.advance("final").as_deref(), Some("final"));
        assert_eq!(normalizer.previous(), "final");
        assert_eq!(normalizer.advance("final answer").as_deref(), Some(" answer"));
    }

    proptest! {
        #[test]
        fn prop_extension_yields_exact_suffix(p in "\\PC*", tail in "\\PC*") {
            let c = format!("{p}{tail}");
            prop_assert_eq!(incremental_suffix(&p, &c), &c[p.len()..]);
        }

        #[test]
        fn prop_non_extension_yields_full_content(p in "\\PC*", c in "\\PC*") {
            prop_assume!(!c.starts_with(p.as_str()));
            prop_assert_eq!(incremental_suffix(&p, &c), c.as_str());
        }
    }
}
