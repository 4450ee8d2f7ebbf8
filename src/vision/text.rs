//! Recognized text checks and cleanup

/// Hangul syllables block
fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Non-empty after trimming and contains a Latin letter or Hangul syllable
pub fn is_meaningful_text(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .any(|c| c.is_ascii_alphabetic() || is_hangul_syllable(c))
}

/// Keep only Hangul syllables, ASCII letters and digits
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|&c| c.is_ascii_alphanumeric() || is_hangul_syllable(c))
        .collect()
}

/// Join non-empty texts whose confidence is at least `min_confidence`,
/// one per line
pub fn join_confident<'a, I>(outcomes: I, min_confidence: f32) -> String
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    outcomes
        .into_iter()
        .filter(|(text, confidence)| *confidence >= min_confidence && !text.trim().is_empty())
        .map(|(text, _)| text.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meaningful_text() {
        assert!(is_meaningful_text("OK"));
        assert!(is_meaningful_text("  확인 "));
        assert!(is_meaningful_text("x1"));
        assert!(!is_meaningful_text("   "));
        assert!(!is_meaningful_text("1234"));
        assert!(!is_meaningful_text("-- | --"));
        // Hangul jamo are not syllables
        assert!(!is_meaningful_text("ㅋㅋ"));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(" 확인 (OK) 12! "), "확인OK12");
        assert_eq!(clean_text("é…"), "");
    }

    #[test]
    fn test_join_confident() {
        let outcomes = [("First", 91.0), ("noise", 40.0), ("  ", 99.0), ("둘째", 70.0)];
        assert_eq!(join_confident(outcomes, 70.0), "First\n둘째");
    }
}
