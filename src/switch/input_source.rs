//! Which input sources form the English/Korean pair

/// Language of a supported input source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Korean,
}

impl Language {
    /// The other side of the pair
    pub fn opposite(self) -> Self {
        match self {
            Language::English => Language::Korean,
            Language::Korean => Language::English,
        }
    }

    /// Short symbol shown in the menu bar and the mini HUD
    pub fn symbol(self) -> &'static str {
        match self {
            Language::English => "A",
            Language::Korean => "가",
        }
    }
}

/// Input source ids treated as English
pub const ENGLISH_SOURCE_IDS: &[&str] = &["com.apple.keylayout.ABC", "com.apple.keylayout.US"];

/// Input source ids treated as Korean
pub const KOREAN_SOURCE_IDS: &[&str] = &[
    "com.apple.inputmethod.Korean.2SetKorean",
    "com.apple.inputmethod.Korean.3SetKorean",
];

/// Symbol for input sources outside the pair
pub const UNKNOWN_SYMBOL: &str = "?";

/// Classify an input source id
pub fn classify(source_id: &str) -> Option<Language> {
    if ENGLISH_SOURCE_IDS.contains(&source_id) {
        Some(Language::English)
    } else if KOREAN_SOURCE_IDS.contains(&source_id) {
        Some(Language::Korean)
    } else {
        None
    }
}

/// Language to select when toggling away from `current_id`
///
/// Returns `None` when the current source is outside the pair; the toggle
/// then bails out instead of guessing a direction.
pub fn toggle_target(current_id: &str) -> Option<Language> {
    classify(current_id).map(Language::opposite)
}

/// Symbol for the source currently selected, if known
pub fn symbol_for(current_id: Option<&str>) -> &'static str {
    current_id
        .and_then(classify)
        .map(Language::symbol)
        .unwrap_or(UNKNOWN_SYMBOL)
}

/// The enabled English and Korean sources, first of each language wins
#[derive(Debug)]
pub struct SourcePair<T> {
    english: Option<T>,
    korean: Option<T>,
}

impl<T> Default for SourcePair<T> {
    fn default() -> Self {
        Self {
            english: None,
            korean: None,
        }
    }
}

impl<T> SourcePair<T> {
    /// Build the pair from `(id, source)` entries of the enabled sources
    pub fn collect<I>(enabled_sources: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut pair = Self::default();
        for (id, source) in enabled_sources {
            match classify(&id) {
                Some(Language::English) if pair.english.is_none() => pair.english = Some(source),
                Some(Language::Korean) if pair.korean.is_none() => pair.korean = Some(source),
                _ => {}
            }
        }
        pair
    }

    /// Both languages are available
    pub fn is_complete(&self) -> bool {
        self.english.is_some() && self.korean.is_some()
    }

    pub fn get(&self, language: Language) -> Option<&T> {
        match language {
            Language::English => self.english.as_ref(),
            Language::Korean => self.korean.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_sources() {
        assert_eq!(classify("com.apple.keylayout.ABC"), Some(Language::English));
        assert_eq!(classify("com.apple.keylayout.US"), Some(Language::English));
        assert_eq!(
            classify("com.apple.inputmethod.Korean.3SetKorean"),
            Some(Language::Korean)
        );
        assert_eq!(classify("com.apple.keylayout.German"), None);
    }

    #[test]
    fn test_toggle_target() {
        assert_eq!(
            toggle_target("com.apple.inputmethod.Korean.2SetKorean"),
            Some(Language::English)
        );
        assert_eq!(toggle_target("com.apple.keylayout.ABC"), Some(Language::Korean));
    }

    #[test]
    fn test_toggle_bails_out_for_unknown_source() {
        assert_eq!(toggle_target("com.apple.inputmethod.Kotoeri.Japanese"), None);
        assert_eq!(toggle_target(""), None);
    }

    #[test]
    fn test_symbols() {
        assert_eq!(symbol_for(Some("com.apple.keylayout.US")), "A");
        assert_eq!(symbol_for(Some("com.apple.inputmethod.Korean.2SetKorean")), "가");
        assert_eq!(symbol_for(Some("com.apple.keylayout.French")), "?");
        assert_eq!(symbol_for(None), "?");
    }

    fn sources(ids: &[&str]) -> Vec<(String, usize)> {
        ids.iter().enumerate().map(|(i, id)| (id.to_string(), i)).collect()
    }

    #[test]
    fn test_pair_takes_first_of_each_language() {
        let pair = SourcePair::collect(sources(&[
            "com.apple.keylayout.German",
            "com.apple.keylayout.US",
            "com.apple.inputmethod.Korean.3SetKorean",
            "com.apple.keylayout.ABC",
        ]));
        assert!(pair.is_complete());
        assert_eq!(pair.get(Language::English), Some(&1));
        assert_eq!(pair.get(Language::Korean), Some(&2));
    }

    #[test]
    fn test_pair_disappears_when_korean_is_disabled() {
        let before = SourcePair::collect(sources(&[
            "com.apple.keylayout.ABC",
            "com.apple.inputmethod.Korean.2SetKorean",
        ]));
        assert!(before.is_complete());

        let after = SourcePair::collect(sources(&["com.apple.keylayout.ABC"]));
        assert!(!after.is_complete());
        assert_eq!(after.get(Language::Korean), None);
    }
}
