//! Trigram similarity (spec §4.8): a normalised, case-insensitive,
//! whitespace-folded trigram representation, scored the way `pg_trgm`'s
//! `similarity()` does — intersection over union of each string's trigram
//! multiset, as a set (pg_trgm dedupes trigrams per string).
//!
//! Used directly by the SQLite test backend (no `pg_trgm` extension
//! available there); the Postgres backend instead pushes this computation
//! down into SQL via the real extension (`infrastructure::postgres`).

use std::collections::HashSet;

/// Fold whitespace runs to single spaces and lowercase, matching the
/// normalisation spec §4.8 requires of the underlying index.
fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// pg_trgm pads each string with two leading/trailing spaces before
/// trigramming so prefix/suffix characters participate fully.
fn trigrams(s: &str) -> HashSet<[char; 3]> {
    let padded: Vec<char> = format!("  {s}  ").chars().collect();
    let mut set = HashSet::new();
    if padded.len() < 3 {
        return set;
    }
    for w in padded.windows(3) {
        set.insert([w[0], w[1], w[2]]);
    }
    set
}

/// Similarity in `[0, 1]`: `|A ∩ B| / |A ∪ B|`.
pub fn similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(&normalize(a));
    let tb = trigrams(&normalize(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert!((similarity("validateUser", "validateUser") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn case_and_whitespace_are_folded() {
        let a = similarity("Validate   User", "validate user");
        assert!((a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn partial_overlap_is_between_zero_and_one() {
        let s = similarity("validateUser", "validateEmail");
        assert!(s > 0.0 && s < 1.0);
    }
}
