#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use strata_frame::{DataFrame, FrameError, Hasher, RowProxy};
use strata_types::HashKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("selector arrays have different lengths: left={left}, right={right}")]
    SelectorLengthMismatch { left: usize, right: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

/// Equal-length position selector arrays describing a join result: the
/// i-th entries name the i-th output row's contributing source
/// positions, with `-1` marking "no match, null row" on that side.
///
/// Every join type is expressed through this one contract; strategies
/// differ only in how the arrays are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSelectors {
    pub left: Vec<i32>,
    pub right: Vec<i32>,
}

impl RowSelectors {
    pub fn new(left: Vec<i32>, right: Vec<i32>) -> Result<Self, JoinError> {
        if left.len() != right.len() {
            return Err(JoinError::SelectorLengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        Ok(Self { left, right })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

// ── Predicate join ─────────────────────────────────────────────────────

/// Nested-loop join: test the predicate over every (left, right) row
/// pair. Match order within one outer position follows the inner scan
/// order.
pub fn predicate_join<P>(
    left: &DataFrame,
    right: &DataFrame,
    predicate: P,
    join_type: JoinType,
) -> Result<RowSelectors, JoinError>
where
    P: Fn(&RowProxy<'_>, &RowProxy<'_>) -> Result<bool, FrameError>,
{
    let left_height = left.height();
    let right_height = right.height();

    match join_type {
        JoinType::Inner | JoinType::Left => {
            let mut out_left = Vec::new();
            let mut out_right = Vec::new();
            for l in 0..left_height {
                let left_row = left.row(l)?;
                let mut matched = false;
                for r in 0..right_height {
                    let right_row = right.row(r)?;
                    if predicate(&left_row, &right_row)? {
                        out_left.push(l as i32);
                        out_right.push(r as i32);
                        matched = true;
                    }
                }
                if !matched && join_type == JoinType::Left {
                    out_left.push(l as i32);
                    out_right.push(-1);
                }
            }
            RowSelectors::new(out_left, out_right)
        }
        JoinType::Right => {
            // Mirror of the left join with sides swapped.
            let mut out_left = Vec::new();
            let mut out_right = Vec::new();
            for r in 0..right_height {
                let right_row = right.row(r)?;
                let mut matched = false;
                for l in 0..left_height {
                    let left_row = left.row(l)?;
                    if predicate(&left_row, &right_row)? {
                        out_left.push(l as i32);
                        out_right.push(r as i32);
                        matched = true;
                    }
                }
                if !matched {
                    out_left.push(-1);
                    out_right.push(r as i32);
                }
            }
            RowSelectors::new(out_left, out_right)
        }
        JoinType::Full => {
            let mut out_left = Vec::new();
            let mut out_right = Vec::new();
            let mut right_matched = vec![false; right_height];
            for l in 0..left_height {
                let left_row = left.row(l)?;
                let mut matched = false;
                for r in 0..right_height {
                    let right_row = right.row(r)?;
                    if predicate(&left_row, &right_row)? {
                        out_left.push(l as i32);
                        out_right.push(r as i32);
                        matched = true;
                        right_matched[r] = true;
                    }
                }
                if !matched {
                    out_left.push(l as i32);
                    out_right.push(-1);
                }
            }
            // Unmatched right positions trail, in right source order.
            for (r, matched) in right_matched.iter().enumerate() {
                if !matched {
                    out_left.push(-1);
                    out_right.push(r as i32);
                }
            }
            RowSelectors::new(out_left, out_right)
        }
    }
}

// ── Hash join ──────────────────────────────────────────────────────────

/// Hash-equality join. The right side is the build side: its rows are
/// indexed into a key multimap, then each left position probes it.
pub fn hash_join(
    left: &DataFrame,
    right: &DataFrame,
    left_hasher: &Hasher,
    right_hasher: &Hasher,
    join_type: JoinType,
) -> Result<RowSelectors, JoinError> {
    hash_join_with_options(
        left,
        right,
        left_hasher,
        right_hasher,
        join_type,
        JoinExecutionOptions::default(),
    )
}

pub fn hash_join_with_options(
    left: &DataFrame,
    right: &DataFrame,
    left_hasher: &Hasher,
    right_hasher: &Hasher,
    join_type: JoinType,
    options: JoinExecutionOptions,
) -> Result<RowSelectors, JoinError> {
    let (selectors, _) =
        hash_join_with_trace(left, right, left_hasher, right_hasher, join_type, options)?;
    Ok(selectors)
}

fn hash_join_with_trace(
    left: &DataFrame,
    right: &DataFrame,
    left_hasher: &Hasher,
    right_hasher: &Hasher,
    join_type: JoinType,
    options: JoinExecutionOptions,
) -> Result<(RowSelectors, JoinExecutionTrace), JoinError> {
    let mut build_map = HashMap::<HashKey, Vec<usize>>::new();
    for r in 0..right.height() {
        let key = right_hasher.key_at(right, r)?;
        build_map.entry(key).or_default().push(r);
    }

    let left_keys = (0..left.height())
        .map(|l| left_hasher.key_at(left, l))
        .collect::<Result<Vec<_>, _>>()?;

    let output_rows = estimate_output_rows(&left_keys, &build_map, right.height(), join_type);
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let selectors = if use_arena {
        probe_with_arena(&left_keys, &build_map, right.height(), join_type, output_rows)?
    } else {
        probe_with_global_allocator(&left_keys, &build_map, right.height(), join_type)?
    };

    Ok((
        selectors,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    ))
}

fn estimate_output_rows(
    left_keys: &[HashKey],
    build_map: &HashMap<HashKey, Vec<usize>>,
    right_height: usize,
    join_type: JoinType,
) -> usize {
    let probed: usize = left_keys
        .iter()
        .map(|key| match build_map.get(key) {
            Some(matches) => matches.len(),
            None if matches!(join_type, JoinType::Left | JoinType::Full) => 1,
            None => 0,
        })
        .sum();
    match join_type {
        JoinType::Full | JoinType::Right => probed + right_height,
        _ => probed,
    }
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<i32>().saturating_mul(2))
}

fn probe_with_global_allocator(
    left_keys: &[HashKey],
    build_map: &HashMap<HashKey, Vec<usize>>,
    right_height: usize,
    join_type: JoinType,
) -> Result<RowSelectors, JoinError> {
    let mut out_left = Vec::new();
    let mut out_right = Vec::new();
    let mut right_matched = vec![false; right_height];

    for (l, key) in left_keys.iter().enumerate() {
        match build_map.get(key) {
            Some(matches) => {
                for &r in matches {
                    out_left.push(l as i32);
                    out_right.push(r as i32);
                    right_matched[r] = true;
                }
            }
            None => {
                if matches!(join_type, JoinType::Left | JoinType::Full) {
                    out_left.push(l as i32);
                    out_right.push(-1);
                }
            }
        }
    }

    if matches!(join_type, JoinType::Right | JoinType::Full) {
        // Never-probed build rows trail in build-side order.
        for (r, matched) in right_matched.iter().enumerate() {
            if !matched {
                out_left.push(-1);
                out_right.push(r as i32);
            }
        }
    }

    RowSelectors::new(out_left, out_right)
}

fn probe_with_arena(
    left_keys: &[HashKey],
    build_map: &HashMap<HashKey, Vec<usize>>,
    right_height: usize,
    join_type: JoinType,
    output_rows: usize,
) -> Result<RowSelectors, JoinError> {
    let arena = Bump::new();
    let mut out_left = BumpVec::<i32>::with_capacity_in(output_rows, &arena);
    let mut out_right = BumpVec::<i32>::with_capacity_in(output_rows, &arena);
    let mut right_matched = BumpVec::<bool>::with_capacity_in(right_height, &arena);
    right_matched.extend(std::iter::repeat_n(false, right_height));

    for (l, key) in left_keys.iter().enumerate() {
        match build_map.get(key) {
            Some(matches) => {
                for &r in matches {
                    out_left.push(l as i32);
                    out_right.push(r as i32);
                    right_matched[r] = true;
                }
            }
            None => {
                if matches!(join_type, JoinType::Left | JoinType::Full) {
                    out_left.push(l as i32);
                    out_right.push(-1);
                }
            }
        }
    }

    if matches!(join_type, JoinType::Right | JoinType::Full) {
        for (r, matched) in right_matched.iter().enumerate() {
            if !matched {
                out_left.push(-1);
                out_right.push(r as i32);
            }
        }
    }

    RowSelectors::new(out_left.as_slice().to_vec(), out_right.as_slice().to_vec())
}

// ── Materialization ────────────────────────────────────────────────────

/// Apply selector arrays to both source frames and lay the columns side
/// by side. Right-side label collisions are suffixed with `_` until
/// unique.
pub fn join_frames(
    left: &DataFrame,
    right: &DataFrame,
    selectors: &RowSelectors,
) -> Result<DataFrame, JoinError> {
    if selectors.left.len() != selectors.right.len() {
        return Err(JoinError::SelectorLengthMismatch {
            left: selectors.left.len(),
            right: selectors.right.len(),
        });
    }

    let left_rows = left.select_rows(&selectors.left)?;
    let right_rows = right.select_rows(&selectors.right)?;

    let index = left.index().merge_suffixed(right.index());
    let mut columns = left_rows.columns().to_vec();
    columns.extend(right_rows.columns().iter().cloned());
    Ok(DataFrame::new(index, columns)?)
}

/// One-call hash join: compute selectors and materialize the frame.
pub fn join(
    left: &DataFrame,
    right: &DataFrame,
    left_hasher: &Hasher,
    right_hasher: &Hasher,
    join_type: JoinType,
) -> Result<DataFrame, JoinError> {
    let selectors = hash_join(left, right, left_hasher, right_hasher, join_type)?;
    join_frames(left, right, &selectors)
}

/// One-call predicate join.
pub fn join_with<P>(
    left: &DataFrame,
    right: &DataFrame,
    predicate: P,
    join_type: JoinType,
) -> Result<DataFrame, JoinError>
where
    P: Fn(&RowProxy<'_>, &RowProxy<'_>) -> Result<bool, FrameError>,
{
    let selectors = predicate_join(left, right, predicate, join_type)?;
    join_frames(left, right, &selectors)
}

#[cfg(test)]
mod tests {
    use strata_frame::{DataFrame, Hasher};
    use strata_series::Series;
    use strata_types::Value;

    use super::{
        JoinExecutionOptions, JoinType, RowSelectors, hash_join, hash_join_with_options,
        hash_join_with_trace, join, join_frames, join_with, predicate_join,
    };

    fn left_frame() -> DataFrame {
        DataFrame::of(vec![
            ("a", Series::of_int(vec![1, 2])),
            (
                "b",
                Series::of_values(vec![Value::Str("x".into()), Value::Str("y".into())]),
            ),
        ])
        .expect("left")
    }

    fn right_frame() -> DataFrame {
        DataFrame::of(vec![
            ("c", Series::of_int(vec![2, 2, 3])),
            (
                "d",
                Series::of_values(vec![
                    Value::Str("a".into()),
                    Value::Str("b".into()),
                    Value::Str("c".into()),
                ]),
            ),
        ])
        .expect("right")
    }

    fn a_eq_c(
        l: &strata_frame::RowProxy<'_>,
        r: &strata_frame::RowProxy<'_>,
    ) -> Result<bool, strata_frame::FrameError> {
        Ok(l.get_int("a")? == r.get_int("c")?)
    }

    #[test]
    fn inner_predicate_join_counts_matching_pairs() {
        let out = join_with(&left_frame(), &right_frame(), a_eq_c, JoinType::Inner)
            .expect("join");
        assert_eq!(out.height(), 2);
        assert_eq!(out.index().labels(), &["a", "b", "c", "d"]);

        let row0 = out.row(0).expect("row");
        assert_eq!(row0.get_int("a").expect("a"), 2);
        assert_eq!(row0.get("d").expect("d"), Value::Str("a".into()));
        let row1 = out.row(1).expect("row");
        assert_eq!(row1.get("d").expect("d"), Value::Str("b".into()));
    }

    #[test]
    fn left_join_keeps_unmatched_left_rows_once() {
        let out = join_with(&left_frame(), &right_frame(), a_eq_c, JoinType::Left)
            .expect("join");
        assert_eq!(out.height(), 3);

        let row0 = out.row(0).expect("row");
        assert_eq!(row0.get_int("a").expect("a"), 1);
        assert_eq!(row0.get("c").expect("c"), Value::Null);
        assert_eq!(row0.get("d").expect("d"), Value::Null);
    }

    #[test]
    fn right_join_mirrors_with_sides_swapped() {
        let selectors = predicate_join(&left_frame(), &right_frame(), a_eq_c, JoinType::Right)
            .expect("join");
        assert_eq!(selectors.len(), 3);
        assert_eq!(selectors.right, vec![0, 1, 2]);
        assert_eq!(selectors.left, vec![1, 1, -1]);
    }

    #[test]
    fn full_join_appends_unmatched_right_rows_in_source_order() {
        let out = join_with(&left_frame(), &right_frame(), a_eq_c, JoinType::Full)
            .expect("join");
        assert_eq!(out.height(), 4);

        let last = out.row(3).expect("row");
        assert_eq!(last.get("a").expect("a"), Value::Null);
        assert_eq!(last.get("b").expect("b"), Value::Null);
        assert_eq!(last.get_int("c").expect("c"), 3);
        assert_eq!(last.get("d").expect("d"), Value::Str("c".into()));
    }

    #[test]
    fn hash_join_matches_predicate_join() {
        let left = left_frame();
        let right = right_frame();
        let by_a = Hasher::col("a");
        let by_c = Hasher::col("c");

        for join_type in [JoinType::Inner, JoinType::Left, JoinType::Full] {
            let hashed = hash_join(&left, &right, &by_a, &by_c, join_type).expect("hash");
            let scanned = predicate_join(&left, &right, a_eq_c, join_type).expect("predicate");
            assert_eq!(hashed, scanned, "{join_type:?}");
        }
    }

    #[test]
    fn hash_right_join_emits_unmatched_build_rows() {
        let selectors = hash_join(
            &left_frame(),
            &right_frame(),
            &Hasher::col("a"),
            &Hasher::col("c"),
            JoinType::Right,
        )
        .expect("join");
        assert_eq!(selectors.len(), 3);
        assert!(selectors.left.contains(&-1));
        assert!(selectors.right.contains(&2));
    }

    #[test]
    fn duplicate_probe_matches_preserve_build_encounter_order() {
        let selectors = hash_join(
            &left_frame(),
            &right_frame(),
            &Hasher::col("a"),
            &Hasher::col("c"),
            JoinType::Inner,
        )
        .expect("join");
        assert_eq!(selectors.left, vec![1, 1]);
        assert_eq!(selectors.right, vec![0, 1]);
    }

    #[test]
    fn collision_labels_get_trailing_underscores() {
        let left = DataFrame::of(vec![
            ("a", Series::of_int(vec![1])),
            ("b", Series::of_int(vec![2])),
        ])
        .expect("left");
        let right = DataFrame::of(vec![
            ("a", Series::of_int(vec![1])),
            ("b", Series::of_int(vec![3])),
        ])
        .expect("right");

        let out = join(&left, &right, &Hasher::col("a"), &Hasher::col("a"), JoinType::Inner)
            .expect("join");
        assert_eq!(out.index().labels(), &["a", "b", "a_", "b_"]);
    }

    #[test]
    fn combination_hasher_joins_on_multiple_columns() {
        let left = DataFrame::of(vec![
            ("k1", Series::of_int(vec![1, 1])),
            ("k2", Series::of_int(vec![1, 2])),
        ])
        .expect("left");
        let right = DataFrame::of(vec![
            ("k1", Series::of_int(vec![1])),
            ("k2", Series::of_int(vec![2])),
        ])
        .expect("right");

        let hasher = Hasher::col("k1").and(Hasher::col("k2"));
        let selectors =
            hash_join(&left, &right, &hasher, &hasher, JoinType::Inner).expect("join");
        assert_eq!(selectors.left, vec![1]);
        assert_eq!(selectors.right, vec![0]);
    }

    #[test]
    fn selectors_must_have_equal_lengths() {
        let selectors = RowSelectors {
            left: vec![0],
            right: vec![0, 1],
        };
        let err = join_frames(&left_frame(), &right_frame(), &selectors).expect_err("must fail");
        assert!(matches!(
            err,
            super::JoinError::SelectorLengthMismatch { left: 1, right: 2 }
        ));
    }

    #[test]
    fn arena_join_matches_global_allocator_behavior() {
        let left = left_frame();
        let right = right_frame();
        let by_a = Hasher::col("a");
        let by_c = Hasher::col("c");

        let global = hash_join_with_options(
            &left,
            &right,
            &by_a,
            &by_c,
            JoinType::Full,
            JoinExecutionOptions {
                use_arena: false,
                arena_budget_bytes: 0,
            },
        )
        .expect("global join");

        let arena = hash_join_with_options(
            &left,
            &right,
            &by_a,
            &by_c,
            JoinType::Full,
            JoinExecutionOptions::default(),
        )
        .expect("arena join");

        assert_eq!(arena, global);
    }

    #[test]
    fn arena_join_falls_back_when_budget_is_too_small() {
        let left = left_frame();
        let right = right_frame();
        let options = JoinExecutionOptions {
            use_arena: true,
            arena_budget_bytes: 1,
        };

        let (selectors, trace) = hash_join_with_trace(
            &left,
            &right,
            &Hasher::col("a"),
            &Hasher::col("c"),
            JoinType::Inner,
            options,
        )
        .expect("fallback join");

        assert!(!trace.used_arena);
        assert!(trace.estimated_bytes > options.arena_budget_bytes);
        assert_eq!(selectors.len(), 2);
    }

    #[test]
    fn arena_join_is_stable_across_many_small_operations() {
        let left = left_frame();
        let right = right_frame();
        let by_a = Hasher::col("a");
        let by_c = Hasher::col("c");

        for _ in 0..1_000 {
            let out = hash_join(&left, &right, &by_a, &by_c, JoinType::Inner).expect("join");
            assert_eq!(out.len(), 2);
        }
    }
}
