//! String similarity, phone normalisation and phonetic name codes.
//!
//! All comparisons are ASCII-level: no diacritic folding or transliteration is applied.

use crate::constants::{CONTAINS_SIMILARITY, LOCAL_PHONE_DIGITS, PHONE_COUNTRY_CODE};

/// Similarity of two strings as an integer in `[0, 100]`.
///
/// - Blank input on either side scores 0.
/// - Equal strings (case-insensitive, trimmed) score 100.
/// - If one contains the other the score is a flat 80, whatever the length difference.
/// - Otherwise the score is `round(100 - levenshtein / max_len * 100)`, floored at 0.
pub fn string_similarity(a: &str, b: &str) -> u8 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 100;
    }
    if a.contains(b.as_str()) || b.contains(a.as_str()) {
        return CONTAINS_SIMILARITY;
    }

    let distance = strsim::levenshtein(&a, &b) as f64;
    let max_len = a.chars().count().max(b.chars().count()) as f64;
    let similarity = (100.0 - (distance / max_len) * 100.0).max(0.0);

    similarity.round() as u8
}

/// Canonicalises a phone number for comparison.
///
/// Strips every non-digit, then a leading `91` country code and a leading trunk `0`, in that
/// order. Prefixes are only stripped while the number is longer than a local number, and the
/// pass repeats until nothing changes, so normalising twice yields the same value.
/// Blank input normalises to an empty string.
pub fn normalise_phone(raw: &str) -> String {
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    loop {
        let before = digits.len();
        if digits.len() > LOCAL_PHONE_DIGITS && digits.starts_with(PHONE_COUNTRY_CODE) {
            digits.drain(..PHONE_COUNTRY_CODE.len());
        }
        if digits.len() > LOCAL_PHONE_DIGITS && digits.starts_with('0') {
            digits.remove(0);
        }
        if digits.len() == before {
            return digits;
        }
    }
}

/// Soundex code of a name (first letter + three digits), or `None` if it has no ASCII letters.
///
/// Used only to build blocking keys; scoring never looks at it.
pub fn name_code(name: &str) -> Option<String> {
    let letters: Vec<char> = name
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let (&first, rest) = letters.split_first()?;

    let digit = |c: char| match c {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        _ => None,
    };

    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());

    let mut previous = digit(first);
    for &c in rest {
        if code.len() == 4 {
            break;
        }
        let current = digit(c);
        if let Some(d) = current {
            if current != previous {
                code.push(d);
            }
        }
        // h and w do not separate letters with the same code
        if !matches!(c, 'h' | 'w') {
            previous = current;
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}
