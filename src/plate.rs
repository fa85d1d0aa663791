use crate::types::RawDetection;
use once_cell::sync::Lazy;
use regex::Regex;

/// Glyphs the OCR engine commonly reads in place of a letter.
const CONFUSABLES: [(char, char); 5] = [('0', 'O'), ('1', 'I'), ('4', 'A'), ('8', 'B'), ('5', 'S')];

static LEADING_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,2}$").unwrap());
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3,4}$").unwrap());
static TRAILING_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,3}$").unwrap());

fn confusable(ch: char) -> Option<char> {
    CONFUSABLES
        .iter()
        .find(|(from, _)| *from == ch)
        .map(|(_, to)| *to)
}

/// Replaces confusable glyphs in `token`.
///
/// With `letters_only` set, a character is only rewritten when it is
/// alphabetic in the input. Every entry in the table maps *from* a digit,
/// so in that mode the token comes back unchanged; letter segments have
/// already passed the `[A-Z]` grammar by the time they get here.
pub fn normalize(token: &str, letters_only: bool) -> String {
    token
        .chars()
        .map(|ch| {
            if letters_only && !ch.is_alphabetic() {
                return ch;
            }
            confusable(ch).unwrap_or(ch)
        })
        .collect()
}

/// Sorts detections left to right and cleans up their text.
pub fn order_tokens(detections: &[RawDetection]) -> Vec<String> {
    let mut ordered: Vec<&RawDetection> = detections.iter().collect();
    // Stable, so detections sharing an x coordinate keep engine order.
    // NaN positions sort after every real one.
    ordered.sort_by(|a, b| a.left.total_cmp(&b.left));
    ordered
        .into_iter()
        .map(|d| d.text.trim().to_uppercase())
        .collect()
}

/// Finds the first `letters digits letters` triple among `tokens`.
///
/// Indices are enumerated `i`-major, then `j`, then `k`, and the first
/// triple of pairwise distinct indices matching the grammar wins, even if
/// a later one would read better. This is cubic in the token count, which
/// is fine for the handful of regions a plate photo produces.
pub fn assemble(tokens: &[String]) -> Option<String> {
    let n = tokens.len();
    for i in 0..n {
        if !LEADING_LETTERS.is_match(&tokens[i]) {
            continue;
        }
        for j in 0..n {
            if j == i || !DIGITS.is_match(&tokens[j]) {
                continue;
            }
            for k in 0..n {
                if k == i || k == j || !TRAILING_LETTERS.is_match(&tokens[k]) {
                    continue;
                }
                return Some(format!(
                    "{} {} {}",
                    normalize(&tokens[i], true),
                    tokens[j],
                    normalize(&tokens[k], true)
                ));
            }
        }
    }
    None
}
