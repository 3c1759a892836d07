//! Fuzzy label matching for the launcher fallback.
//!
//! The launcher window shows server nodes and connection rows whose labels
//! rarely match the configured target byte-for-byte (diacritics, casing,
//! decorations added by administrators). Matching is a pure scoring
//! function over normalized labels so it can be exercised without a live
//! window.

use std::collections::HashSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Folds a label for comparison: NFKD, combining marks stripped, anything
/// non-alphanumeric collapsed to single spaces, lowercased.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkd().filter(|ch| !is_combining_mark(*ch)).collect();
    let mut cleaned = String::with_capacity(folded.len());
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scores `text` against an already-normalized `target`.
///
/// Exact match beats substring containment beats token overlap; a score of
/// zero or less means "no usable similarity". Scores are only comparable
/// within one candidate set.
pub fn match_score(text: &str, target: &str) -> i32 {
    if text.is_empty() {
        return -1;
    }
    let normalized = normalize(text);
    if normalized.is_empty() {
        return -1;
    }
    if normalized == target {
        return 100;
    }
    if !target.is_empty() && normalized.contains(target) {
        return 90;
    }
    if normalized.len() >= 6 && target.contains(&normalized) {
        return 70;
    }

    let mut score = 0;
    let target_tokens: Vec<&str> = target.split_whitespace().collect();
    let text_tokens: HashSet<&str> = normalized.split_whitespace().collect();
    for token in &target_tokens {
        if token.chars().count() <= 1 {
            continue;
        }
        if text_tokens.contains(token) {
            score += 8;
        } else if normalized.contains(token) {
            score += 5;
        }
    }
    if let Some(first) = target_tokens.first() {
        if normalized.starts_with(first) {
            score += 10;
        }
    }
    score
}

/// Index and score of the best-scoring label, when any label scores
/// strictly positive against the normalized `target`.
pub fn best_index<S: AsRef<str>>(labels: &[S], target: &str) -> Option<(usize, i32)> {
    let mut best: Option<(usize, i32)> = None;
    for (idx, label) in labels.iter().enumerate() {
        let score = match_score(label.as_ref(), target);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.filter(|(_, score)| *score > 0)
}
