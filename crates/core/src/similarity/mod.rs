//! Edit-distance similarity between an AI draft and the text the user actually sent.

use crate::types::{EditComparison, ModificationType};
use serde::{Deserialize, Serialize};

/// Thresholds for bucketing a similarity score, plus the comparison length cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityPolicy {
    pub sent_as_is: f64,
    pub minor_edits: f64,
    pub moderate_edits: f64,
    /// Inputs are truncated to this many characters before scoring.
    pub max_compare_chars: usize,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            sent_as_is: 0.95,
            minor_edits: 0.80,
            moderate_edits: 0.50,
            max_compare_chars: 4000,
        }
    }
}

impl SimilarityPolicy {
    pub fn modification_type(&self, score: f64) -> ModificationType {
        if score >= self.sent_as_is {
            ModificationType::SentAsIs
        } else if score >= self.minor_edits {
            ModificationType::MinorEdits
        } else if score >= self.moderate_edits {
            ModificationType::ModerateEdits
        } else {
            ModificationType::MajorRewrite
        }
    }

    pub fn compare(&self, draft: &str, final_text: &str) -> EditComparison {
        let a = bounded_chars(draft, self.max_compare_chars);
        let b = bounded_chars(final_text, self.max_compare_chars);
        let distance = levenshtein(&a, &b);
        let similarity = ratio(distance, a.len().max(b.len()));
        EditComparison {
            similarity,
            edit_distance: distance as u32,
            modification: self.modification_type(similarity),
        }
    }

    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        self.compare(a, b).similarity
    }
}

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    levenshtein(&a, &b)
}

/// `1 - distance / max_len`; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio(levenshtein(&a, &b), a.len().max(b.len()))
}

fn ratio(distance: usize, longest: usize) -> f64 {
    if longest == 0 {
        return 1.0;
    }
    1.0 - distance as f64 / longest as f64
}

fn bounded_chars(text: &str, cap: usize) -> Vec<char> {
    text.trim().chars().take(cap).collect()
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    // Two rows over the shorter side.
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}
