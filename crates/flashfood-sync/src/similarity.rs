//! Title similarity, match tiers and deterministic master ids.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use strsim::levenshtein;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityTier {
    High,
    Mid,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub high: f64,
    pub mid: f64,
    pub price_tolerance: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            high: 0.75,
            mid: 0.5,
            price_tolerance: 1.0,
        }
    }
}

/// Stateless matcher; thresholds are fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct TitleMatcher {
    thresholds: MatchThresholds,
}

fn keeps_for_id(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

impl TitleMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    /// Keeps ASCII letters, ASCII digits and CJK unified ideographs; drops everything else.
    pub fn normalize_for_id(title: &str) -> String {
        title.chars().filter(|c| keeps_for_id(*c)).collect()
    }

    /// `1 - levenshtein / max_len`, counted in Unicode scalar values.
    /// An empty side (including both) scores 0.0.
    pub fn similarity(a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        let max_len = a.chars().count().max(b.chars().count());
        1.0 - levenshtein(a, b) as f64 / max_len as f64
    }

    pub fn classify(&self, a: &str, b: &str) -> SimilarityTier {
        if a.is_empty() || b.is_empty() {
            return SimilarityTier::Low;
        }
        let score = Self::similarity(a, b);
        if score >= self.thresholds.high {
            SimilarityTier::High
        } else if score >= self.thresholds.mid {
            SimilarityTier::Mid
        } else {
            SimilarityTier::Low
        }
    }

    pub fn is_high(&self, a: &str, b: &str) -> bool {
        self.classify(a, b) == SimilarityTier::High
    }

    pub fn is_mid(&self, a: &str, b: &str) -> bool {
        self.classify(a, b) == SimilarityTier::Mid
    }

    /// Fails closed for NaN and infinities.
    pub fn price_match(&self, p1: f64, p2: f64) -> bool {
        if !p1.is_finite() || !p2.is_finite() {
            return false;
        }
        (p1 - p2).abs() <= self.thresholds.price_tolerance
    }

    /// Highest vote count wins; ties go to the longer title, then to the
    /// lexicographically first. Empty titles and zero counts never win.
    pub fn elect_title(votes: &BTreeMap<String, u32>) -> String {
        let mut winner: Option<(&str, u32, usize)> = None;
        for (title, &count) in votes {
            if title.is_empty() || count == 0 {
                continue;
            }
            let len = title.chars().count();
            let better = match winner {
                None => true,
                Some((_, best_count, best_len)) => {
                    count > best_count || (count == best_count && len > best_len)
                }
            };
            if better {
                winner = Some((title, count, len));
            }
        }
        winner.map(|(title, _, _)| title.to_string()).unwrap_or_default()
    }

    /// `{prefix}_{hex(md5(normalize_for_id(title)))}`.
    pub fn generate_id(prefix: &str, title: &str) -> String {
        let digest = Md5::digest(Self::normalize_for_id(title).as_bytes());
        format!("{prefix}_{}", hex::encode(digest))
    }
}
