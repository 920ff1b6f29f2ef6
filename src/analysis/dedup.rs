//! Issue deduplication.
//!
//! Specialists overlap: the error-handling and security agents both notice a
//! bare `except`, two agents report the same long function. Two issues are
//! duplicates when they share `rule` and `path`, their line spans overlap (or
//! neither has one), and their normalized messages are similar. The first
//! occurrence wins.

use crate::models::Issue;
use std::collections::HashSet;

/// Minimum share of the smaller message's tokens found in the other.
const OVERLAP_THRESHOLD: f64 = 0.8;
/// Minimum Jaccard similarity, so a short message cannot swallow a long one.
const JACCARD_THRESHOLD: f64 = 0.5;

/// Case-fold, collapse whitespace, drop trailing punctuation.
pub fn normalize_message(message: &str) -> String {
    let collapsed = message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

fn tokens(normalized: &str) -> HashSet<&str> {
    normalized
        .split(' ')
        .map(|t| t.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Similarity of two already-normalized messages.
pub fn messages_similar(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let (ta, tb) = (tokens(a), tokens(b));
    let smaller = ta.len().min(tb.len());
    if smaller == 0 {
        return false;
    }

    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / smaller as f64 >= OVERLAP_THRESHOLD && shared / union >= JACCARD_THRESHOLD
}

fn spans_overlap(a: &Issue, b: &Issue) -> bool {
    match (a.span(), b.span()) {
        (Some((a_start, a_end)), Some((b_start, b_end))) => a_start <= b_end && b_start <= a_end,
        (None, None) => true,
        _ => false,
    }
}

/// True if `a` and `b` report the same finding.
pub fn is_duplicate(a: &Issue, b: &Issue) -> bool {
    a.rule == b.rule
        && a.path == b.path
        && spans_overlap(a, b)
        && messages_similar(&normalize_message(&a.message), &normalize_message(&b.message))
}

/// Remove duplicates, keeping the first occurrence of each finding in input
/// order. Enrichment carried only by a dropped duplicate moves to the kept
/// issue.
pub fn dedup(issues: Vec<Issue>) -> Vec<Issue> {
    let mut kept: Vec<(Issue, String)> = Vec::with_capacity(issues.len());

    for issue in issues {
        let normalized = normalize_message(&issue.message);
        let existing = kept.iter_mut().find(|(k, k_norm)| {
            k.rule == issue.rule
                && k.path == issue.path
                && spans_overlap(k, &issue)
                && messages_similar(k_norm, &normalized)
        });

        match existing {
            Some((first, _)) => {
                if !first.is_enriched() && issue.is_enriched() {
                    first.recommendation = issue.recommendation;
                    first.code_suggestion = issue.code_suggestion;
                }
            }
            None => kept.push((issue, normalized)),
        }
    }

    kept.into_iter().map(|(issue, _)| issue).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn issue(rule: &str, path: &str, line: Option<u32>, message: &str) -> Issue {
        let issue = Issue::new(rule, path, Severity::Warning, message);
        match line {
            Some(l) => issue.at_lines(l, None),
            None => issue,
        }
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("  Bare   EXCEPT.\n"), "bare except");
        assert_eq!(normalize_message("Too long!!"), "too long");
    }

    #[test]
    fn test_bare_except_variants_collapse() {
        let a = issue("bare_except", "a.py", Some(10), "Bare except");
        let b = issue("bare_except", "a.py", Some(10), "bare except detected");
        let c = issue("broad_except", "a.py", Some(10), "Bare except");

        assert!(is_duplicate(&a, &b));
        assert!(!is_duplicate(&a, &c));

        let out = dedup(vec![a.clone(), b, c.clone()]);
        assert_eq!(out, vec![a, c]);
    }

    #[test]
    fn test_unrelated_messages_kept() {
        let a = issue("long_function", "a.py", Some(1), "Function parse is 120 lines");
        let b = issue("long_function", "a.py", Some(1), "Deeply nested loop in parse");
        assert_eq!(dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_short_message_does_not_swallow_long_one() {
        let a = issue("r", "a.py", None, "unused");
        let b = issue("r", "a.py", None, "unused import os shadows the module-level name");
        assert!(!is_duplicate(&a, &b));
    }

    #[test]
    fn test_line_overlap_required() {
        let a = issue("r", "a.py", None, "same").at_lines(10, Some(20));
        let b = issue("r", "a.py", None, "same").at_lines(15, Some(25));
        let c = issue("r", "a.py", None, "same").at_lines(30, None);
        let d = issue("r", "a.py", None, "same");
        let e = issue("r", "a.py", None, "same");

        assert!(is_duplicate(&a, &b));
        assert!(!is_duplicate(&a, &c));
        assert!(!is_duplicate(&a, &d));
        assert!(is_duplicate(&d, &e));
    }

    #[test]
    fn test_different_path_kept() {
        let a = issue("r", "a.py", Some(1), "same");
        let b = issue("r", "b.py", Some(1), "same");
        assert_eq!(dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_first_seen_order_is_stable() {
        let input = vec![
            issue("x", "a.py", Some(1), "one"),
            issue("y", "a.py", Some(2), "two"),
            issue("x", "a.py", Some(1), "ONE."),
            issue("z", "b.py", None, "three"),
            issue("y", "a.py", Some(2), "two"),
        ];
        let rules: Vec<_> = dedup(input).into_iter().map(|i| i.rule).collect();
        assert_eq!(rules, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let input = vec![
            issue("bare_except", "a.py", Some(10), "Bare except"),
            issue("bare_except", "a.py", Some(10), "bare except detected"),
            issue("bare_except", "a.py", Some(40), "Bare except"),
            issue("todo", "b.py", None, "Leftover TODO"),
            issue("todo", "b.py", None, "leftover todo"),
        ];
        let once = dedup(input);
        let twice = dedup(once.clone());
        assert_eq!(once.len(), 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_enrichment_moves_to_kept_issue() {
        let first = issue("r", "a.py", Some(3), "Same thing");
        let mut second = issue("r", "a.py", Some(3), "same thing");
        second.apply_enrichment("do this", Some("code()"));

        let out = dedup(vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message, "Same thing");
        assert_eq!(out[0].recommendation.as_deref(), Some("do this"));
        assert_eq!(out[0].code_suggestion.as_deref(), Some("code()"));
    }

    #[test]
    fn test_kept_enrichment_not_overwritten() {
        let mut first = issue("r", "a.py", Some(3), "Same");
        first.apply_enrichment("mine", None);
        let mut second = issue("r", "a.py", Some(3), "same");
        second.apply_enrichment("theirs", Some("x"));

        let out = dedup(vec![first, second]);
        assert_eq!(out[0].recommendation.as_deref(), Some("mine"));
        assert_eq!(out[0].code_suggestion, None);
    }
}
