//! Robust join engine.
//!
//! Merges two record sets on caller-supplied keys and always returns the
//! data together with `MatchDiagnostics`. Data-quality problems (empty
//! inputs, unjoinable keys, low match rates) never raise; the caller gets
//! degraded data plus a machine-readable diagnostics object and decides
//! whether to fall back.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::MatchDiagnostics;

/// Sentinel carried in `MatchDiagnostics::error` when the right table is empty.
pub const ERR_EMPTY_RIGHT: &str = "empty right table";
/// Sentinel carried in `MatchDiagnostics::error` when the left table is empty.
pub const ERR_EMPTY_LEFT: &str = "empty left table";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Right,
    Inner,
    Outer,
}

/// Merged rows plus the diagnostics side channel.
#[derive(Debug)]
pub struct Joined<L, R> {
    pub rows: Vec<(Option<L>, Option<R>)>,
    pub diagnostics: MatchDiagnostics,
}

/// Merge `left` and `right` on extracted keys.
///
/// A `None` key marks an unjoinable row (the typed analogue of a missing key
/// column). `merge_rate` is the fraction of left rows that found at least one
/// right match; `success = merge_rate >= threshold` is a soft signal, not a
/// failure. Duplicate right keys fan out, one output row per matched pair.
pub fn merge<L, R, K, FL, FR>(
    left: &[L],
    right: &[R],
    left_key: FL,
    right_key: FR,
    how: JoinKind,
    threshold: f64,
) -> Joined<L, R>
where
    L: Clone,
    R: Clone,
    K: Ord,
    FL: Fn(&L) -> Option<K>,
    FR: Fn(&R) -> Option<K>,
{
    log::debug!(
        "merge {how:?}: left={} rows, right={} rows, threshold={threshold}",
        left.len(),
        right.len()
    );

    if left.is_empty() {
        log::warn!("merge short-circuit: {ERR_EMPTY_LEFT}");
        return Joined {
            rows: Vec::new(),
            diagnostics: degraded(ERR_EMPTY_LEFT, 0, right.len()),
        };
    }
    if right.is_empty() {
        log::warn!("merge short-circuit: {ERR_EMPTY_RIGHT}");
        return Joined {
            rows: left.iter().map(|l| (Some(l.clone()), None)).collect(),
            diagnostics: degraded(ERR_EMPTY_RIGHT, left.len(), 0),
        };
    }

    let mut right_index: BTreeMap<K, Vec<usize>> = BTreeMap::new();
    for (ri, r) in right.iter().enumerate() {
        if let Some(key) = right_key(r) {
            right_index.entry(key).or_default().push(ri);
        }
    }

    let mut rows: Vec<(Option<L>, Option<R>)> = Vec::with_capacity(left.len());
    let mut matched_right: BTreeSet<usize> = BTreeSet::new();
    let mut left_matched = 0usize;

    for l in left {
        let hits = left_key(l).and_then(|key| right_index.get(&key));
        match hits {
            Some(indices) => {
                left_matched += 1;
                for &ri in indices {
                    matched_right.insert(ri);
                    rows.push((Some(l.clone()), Some(right[ri].clone())));
                }
            }
            None => {
                if matches!(how, JoinKind::Left | JoinKind::Outer) {
                    rows.push((Some(l.clone()), None));
                }
            }
        }
    }

    if matches!(how, JoinKind::Right | JoinKind::Outer) {
        for (ri, r) in right.iter().enumerate() {
            if !matched_right.contains(&ri) {
                rows.push((None, Some(r.clone())));
            }
        }
    }

    let merge_rate = left_matched as f64 / left.len() as f64;
    let diagnostics = MatchDiagnostics {
        success: merge_rate >= threshold,
        merge_rate,
        left_matched,
        right_matched: matched_right.len(),
        left_unmatched: left.len() - left_matched,
        right_unmatched: right.len() - matched_right.len(),
        error: None,
    };

    log::info!(
        "merge complete: rate={:.2}%, left_unmatched={}, right_unmatched={}",
        merge_rate * 100.0,
        diagnostics.left_unmatched,
        diagnostics.right_unmatched
    );
    if !diagnostics.success {
        log::warn!(
            "merge rate {:.2}% below threshold {:.2}%",
            merge_rate * 100.0,
            threshold * 100.0
        );
    }

    Joined { rows, diagnostics }
}

fn degraded(error: &str, left_unmatched: usize, right_unmatched: usize) -> MatchDiagnostics {
    MatchDiagnostics {
        success: false,
        merge_rate: 0.0,
        left_matched: 0,
        right_matched: 0,
        left_unmatched,
        right_unmatched,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct L(i64, &'static str);
    #[derive(Debug, Clone, PartialEq)]
    struct R(i64, f64);

    fn run(left: &[L], right: &[R], how: JoinKind, threshold: f64) -> Joined<L, R> {
        merge(left, right, |l| Some(l.0), |r| Some(r.0), how, threshold)
    }

    #[test]
    fn left_join_basic() {
        let left = vec![L(1, "a"), L(2, "b"), L(3, "c")];
        let right = vec![R(1, 10.0), R(3, 30.0)];
        let out = run(&left, &right, JoinKind::Left, 0.5);
        assert_eq!(out.rows.len(), 3);
        assert!(out.diagnostics.success);
        assert!((out.diagnostics.merge_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(out.diagnostics.left_unmatched, 1);
        assert_eq!(out.diagnostics.right_unmatched, 0);
        // Unmatched left row keeps null right side
        assert!(out.rows.iter().any(|(l, r)| l.as_ref().unwrap().0 == 2 && r.is_none()));
    }

    #[test]
    fn success_iff_rate_at_least_threshold() {
        let left = vec![L(1, "a"), L(2, "b"), L(3, "c"), L(4, "d"), L(5, "e")];
        let right = vec![R(1, 0.0), R(2, 0.0), R(3, 0.0), R(4, 0.0)];
        let out = run(&left, &right, JoinKind::Left, 0.8);
        assert!((out.diagnostics.merge_rate - 0.8).abs() < 1e-9);
        assert!(out.diagnostics.success, "rate equal to threshold succeeds");

        let out = run(&left, &right, JoinKind::Left, 0.81);
        assert!(!out.diagnostics.success);
    }

    #[test]
    fn merge_rate_always_in_unit_interval() {
        let left = vec![L(1, "a"), L(1, "b")];
        // Duplicate right keys fan out but must not push the rate above 1.
        let right = vec![R(1, 1.0), R(1, 2.0)];
        let out = run(&left, &right, JoinKind::Left, 0.8);
        assert_eq!(out.rows.len(), 4);
        assert!(out.diagnostics.merge_rate >= 0.0 && out.diagnostics.merge_rate <= 1.0);
        assert!((out.diagnostics.merge_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_right_short_circuits_with_sentinel() {
        let left = vec![L(1, "a"), L(2, "b")];
        let out = run(&left, &[], JoinKind::Left, 0.8);
        assert!(!out.diagnostics.success);
        assert_eq!(out.diagnostics.merge_rate, 0.0);
        assert_eq!(out.diagnostics.error.as_deref(), Some(ERR_EMPTY_RIGHT));
        // Left table returned with null right side
        assert_eq!(out.rows.len(), 2);
        assert!(out.rows.iter().all(|(l, r)| l.is_some() && r.is_none()));
    }

    #[test]
    fn empty_left_short_circuits_with_sentinel() {
        let right = vec![R(1, 10.0)];
        let out = run(&[], &right, JoinKind::Left, 0.8);
        assert!(out.rows.is_empty());
        assert_eq!(out.diagnostics.error.as_deref(), Some(ERR_EMPTY_LEFT));
        assert_eq!(out.diagnostics.right_unmatched, 1);
    }

    #[test]
    fn none_keys_never_match() {
        let left = vec![L(1, "a"), L(2, "b")];
        let right = vec![R(1, 10.0), R(2, 20.0)];
        let out = merge(
            &left,
            &right,
            |l| if l.0 == 2 { None } else { Some(l.0) },
            |r| Some(r.0),
            JoinKind::Left,
            0.5,
        );
        assert_eq!(out.diagnostics.left_matched, 1);
        assert_eq!(out.diagnostics.left_unmatched, 1);
    }

    #[test]
    fn inner_join_drops_unmatched() {
        let left = vec![L(1, "a"), L(2, "b")];
        let right = vec![R(2, 20.0)];
        let out = run(&left, &right, JoinKind::Inner, 0.0);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].0.as_ref().unwrap().0, 2);
    }

    #[test]
    fn outer_join_keeps_both_sides() {
        let left = vec![L(1, "a")];
        let right = vec![R(2, 20.0)];
        let out = run(&left, &right, JoinKind::Outer, 0.0);
        assert_eq!(out.rows.len(), 2);
        assert!(out.rows.iter().any(|(l, r)| l.is_some() && r.is_none()));
        assert!(out.rows.iter().any(|(l, r)| l.is_none() && r.is_some()));
    }

    #[test]
    fn right_join_keeps_unmatched_right() {
        let left = vec![L(1, "a")];
        let right = vec![R(1, 10.0), R(2, 20.0)];
        let out = run(&left, &right, JoinKind::Right, 0.5);
        assert_eq!(out.rows.len(), 2);
        assert!(out.rows.iter().any(|(l, r)| l.is_none() && r.as_ref().unwrap().0 == 2));
        // Rate is still left-based
        assert!((out.diagnostics.merge_rate - 1.0).abs() < 1e-9);
    }
}
