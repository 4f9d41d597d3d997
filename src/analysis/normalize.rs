//! Plate text normalization
//!
//! Canonicalizes raw OCR output into the plate alphabet: the twelve Cyrillic
//! letters that have Latin look-alikes plus the digits 0-9.
//!
//! # The 0 / О ambiguity
//!
//! Digit zero and Cyrillic letter О are swapped character by character, in
//! both directions. The remap is lossy: after normalization a plate with a
//! true "0" and one with a true "О" in the same position cannot be told apart
//! from the text alone, and normalizing twice swaps them back. Nothing here
//! guesses which reading was intended; [`NormalizedPlate::ambiguity_key`]
//! exposes the collapsed form for comparisons that must treat the pair as
//! one symbol.

use serde::Serialize;
use std::fmt;

/// Cyrillic letters permitted on plates
pub const PLATE_LETTERS: [char; 12] = [
    'А', 'В', 'Е', 'К', 'М', 'Н', 'О', 'Р', 'С', 'Т', 'У', 'Х',
];

/// Whether `c` belongs to the canonical plate alphabet
pub fn is_canonical(c: char) -> bool {
    c.is_ascii_digit() || PLATE_LETTERS.contains(&c)
}

/// Map an uppercase Latin letter to its Cyrillic plate look-alike
pub fn fold_latin(c: char) -> char {
    match c {
        'A' => 'А',
        'B' => 'В',
        'E' => 'Е',
        'K' => 'К',
        'M' => 'М',
        'H' => 'Н',
        'O' => 'О',
        'P' => 'Р',
        'C' => 'С',
        'T' => 'Т',
        'Y' => 'У',
        'X' => 'Х',
        other => other,
    }
}

/// Fixed confusable-glyph remap. Returns `None` for characters it does not cover.
fn remap_confusable(c: char) -> Option<char> {
    match c {
        '0' => Some('О'),
        'О' => Some('0'),
        'З' => Some('3'),
        'Ч' => Some('4'),
        _ => None,
    }
}

/// Plate text restricted to the canonical alphabet
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The text with 0 and О collapsed into a single symbol
    pub fn ambiguity_key(&self) -> String {
        collapse_zero_letter_o(&self.0)
    }
}

impl fmt::Display for NormalizedPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replace every Cyrillic О with digit 0
pub fn collapse_zero_letter_o(text: &str) -> String {
    text.chars().map(|c| if c == 'О' { '0' } else { c }).collect()
}

/// Normalize raw recognized text.
///
/// Uppercases, folds Latin look-alikes to Cyrillic, drops everything outside
/// the canonical alphabet (keeping З and Ч, which the remap turns into
/// digits), then applies the confusable remap.
pub fn normalize_plate(raw: &str) -> NormalizedPlate {
    let text = raw
        .chars()
        .flat_map(char::to_uppercase)
        .map(fold_latin)
        .filter(|&c| is_canonical(c) || remap_confusable(c).is_some())
        .map(|c| remap_confusable(c).unwrap_or(c))
        .collect();
    NormalizedPlate(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_noise_and_uppercases() {
        assert_eq!(normalize_plate(" а123ав 77 RUS ").as_str(), "А123АВ77");
        assert_eq!(normalize_plate("!!!").as_str(), "");
        assert!(normalize_plate("").is_empty());
    }

    #[test]
    fn test_latin_lookalikes_fold_to_cyrillic() {
        assert_eq!(normalize_plate("A123AB77").as_str(), "А123АВ77");
        assert_eq!(normalize_plate("x777kc199").as_str(), "Х777КС199");
    }

    #[test]
    fn test_latin_without_lookalike_is_dropped() {
        assert_eq!(normalize_plate("Q1Z2").as_str(), "12");
    }

    #[test]
    fn test_confusable_remap() {
        assert_eq!(normalize_plate("З").as_str(), "3");
        assert_eq!(normalize_plate("ч").as_str(), "4");
        assert_eq!(normalize_plate("0").as_str(), "О");
        assert_eq!(normalize_plate("О").as_str(), "0");
        // Latin O is a Cyrillic О look-alike, so it ends up as digit zero
        assert_eq!(normalize_plate("O").as_str(), "0");
    }

    #[test]
    fn test_output_is_always_canonical() {
        for raw in ["М0РЗ-Ч", "привет 123", "АВЕКМНОРСТУХ0123456789", "ÄÖÜ№"] {
            let normalized = normalize_plate(raw);
            assert!(
                normalized.as_str().chars().all(is_canonical),
                "{raw:?} -> {normalized}"
            );
        }
    }

    #[test]
    fn test_renormalizing_only_touches_zero_letter_o() {
        for raw in ["О000ОО77", "В001ОР190", "a1b2c3", "З0Ч", "Е555ЕЕ55"] {
            let once = normalize_plate(raw);
            let twice = normalize_plate(once.as_str());
            assert_eq!(once.as_str().chars().count(), twice.as_str().chars().count());
            for (a, b) in once.as_str().chars().zip(twice.as_str().chars()) {
                assert!(a == b || (matches!(a, '0' | 'О') && matches!(b, '0' | 'О')));
            }
            assert_eq!(once.ambiguity_key(), twice.ambiguity_key());
        }
    }

    #[test]
    fn test_fixed_point_without_ambiguous_glyphs() {
        for plate in ["А123АВ77", "ХУ9876", "ВМ1", "12345", "КЕНТ"] {
            assert_eq!(normalize_plate(plate).as_str(), plate);
        }
    }

    #[test]
    fn test_ambiguity_key_collapses_pair() {
        let a = normalize_plate("О123ОО77");
        let b = normalize_plate("0123OO77");
        assert_ne!(a, b);
        assert_eq!(a.ambiguity_key(), b.ambiguity_key());
    }
}
