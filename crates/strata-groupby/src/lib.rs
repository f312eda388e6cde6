#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use strata_expr::{Exp, ExprError};
use strata_frame::{DataFrame, FrameError, Hasher};
use strata_index::{Index, IndexError};
use strata_series::SeriesBuilder;
use strata_types::{HashKey, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("aggregation requires at least one expression")]
    NoAggregations,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// A lazy partition of one frame's rows by hash key.
///
/// Group enumeration order is the order keys were first encountered in
/// the source. Per-group views are selector-backed and copy nothing
/// until materialized.
#[derive(Debug, Clone)]
pub struct GroupBy {
    source: DataFrame,
    keys: Vec<HashKey>,
    groups: HashMap<HashKey, Vec<i32>>,
}

/// Partition a frame's row positions in one linear pass.
pub fn group(frame: &DataFrame, hasher: &Hasher) -> Result<GroupBy, GroupByError> {
    let mut keys = Vec::new();
    let mut groups = HashMap::<HashKey, Vec<i32>>::new();
    for pos in 0..frame.height() {
        let key = hasher.key_at(frame, pos)?;
        match groups.get_mut(&key) {
            Some(positions) => positions.push(pos as i32),
            None => {
                keys.push(key.clone());
                groups.insert(key, vec![pos as i32]);
            }
        }
    }
    Ok(GroupBy {
        source: frame.clone(),
        keys,
        groups,
    })
}

impl GroupBy {
    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in first-encounter order.
    #[must_use]
    pub fn keys(&self) -> &[HashKey] {
        &self.keys
    }

    #[must_use]
    pub fn contains_key(&self, key: &HashKey) -> bool {
        self.groups.contains_key(key)
    }

    #[must_use]
    pub fn positions(&self, key: &HashKey) -> Option<&[i32]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn source(&self) -> &DataFrame {
        &self.source
    }

    /// View frame for one group, rows in source encounter order.
    #[must_use]
    pub fn get_group(&self, key: &HashKey) -> Option<DataFrame> {
        let positions = self.groups.get(key)?;
        // Positions were recorded from the source, so selection holds.
        self.source.select_rows(positions).ok()
    }

    /// Truncate every group to its first `n` positions.
    #[must_use]
    pub fn head(&self, n: usize) -> GroupBy {
        let groups = self
            .groups
            .iter()
            .map(|(key, positions)| {
                let kept = positions.iter().take(n).copied().collect();
                (key.clone(), kept)
            })
            .collect();
        GroupBy {
            source: self.source.clone(),
            keys: self.keys.clone(),
            groups,
        }
    }

    /// Reorder positions within each group independently by one
    /// column's values. The sort is stable and nulls go last in either
    /// direction.
    pub fn sort_by(&self, label: &str, ascending: bool) -> Result<GroupBy, GroupByError> {
        let column = self.source.column(label)?.clone();
        let mut groups = HashMap::with_capacity(self.groups.len());
        for (key, positions) in &self.groups {
            let mut sorted = positions.clone();
            sorted.sort_by(|&a, &b| {
                let l = column.value(a as usize).unwrap_or(Value::Null);
                let r = column.value(b as usize).unwrap_or(Value::Null);
                let ord = compare_for_sort(&l, &r);
                if ascending { ord } else { flip_non_null(ord, &l, &r) }
            });
            groups.insert(key.clone(), sorted);
        }
        Ok(GroupBy {
            source: self.source.clone(),
            keys: self.keys.clone(),
            groups,
        })
    }

    /// One output row per group, in key-encounter order. Each column is
    /// one expression's scalar reduction over the group view; columns
    /// are named by the expression's underlying column and suffixed on
    /// collision.
    pub fn agg(&self, exps: &[Exp]) -> Result<DataFrame, GroupByError> {
        if exps.is_empty() {
            return Err(GroupByError::NoAggregations);
        }

        let mut builders: Vec<SeriesBuilder> = exps.iter().map(|_| SeriesBuilder::new()).collect();
        for key in &self.keys {
            let group_view = self
                .get_group(key)
                .unwrap_or_else(|| self.source.head(0));
            for (builder, exp) in builders.iter_mut().zip(exps.iter()) {
                builder.push_value(exp.reduce(&group_view)?);
            }
        }

        let mut seen = HashSet::new();
        let mut labels = Vec::with_capacity(exps.len());
        for exp in exps {
            let mut label = exp.column_name();
            while !seen.insert(label.clone()) {
                label.push('_');
            }
            labels.push(label);
        }

        let columns = builders.into_iter().map(SeriesBuilder::build).collect();
        Ok(DataFrame::new(Index::new(labels)?, columns)?)
    }

    /// Flatten back into one frame: all groups concatenated in
    /// key-encounter order. This reorders rows relative to the source;
    /// callers needing original row order must not use this path.
    pub fn to_dataframe(&self) -> Result<DataFrame, GroupByError> {
        let mut positions = Vec::with_capacity(self.source.height());
        for key in &self.keys {
            if let Some(group_positions) = self.groups.get(key) {
                positions.extend_from_slice(group_positions);
            }
        }
        Ok(self.source.select_rows(&positions)?.materialize())
    }
}

fn compare_for_sort(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match (left, right) {
            (Value::Str(l), Value::Str(r)) => l.cmp(r),
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            _ => match (left.to_double(), right.to_double()) {
                (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        },
    }
}

// Descending order still keeps nulls last.
fn flip_non_null(ord: Ordering, left: &Value, right: &Value) -> Ordering {
    if left.is_null() || right.is_null() {
        ord
    } else {
        ord.reverse()
    }
}

#[cfg(test)]
mod tests {
    use strata_expr::col;
    use strata_frame::{DataFrame, Hasher};
    use strata_series::Series;
    use strata_types::{HashKey, Value};

    use super::group;

    fn sample() -> DataFrame {
        DataFrame::of(vec![
            ("a", Series::of_int(vec![1, 2, 1, 0, 1])),
            (
                "b",
                Series::of_values(vec![
                    Value::Str("x".into()),
                    Value::Str("y".into()),
                    Value::Str("z".into()),
                    Value::Str("a".into()),
                    Value::Str("x".into()),
                ]),
            ),
        ])
        .expect("frame")
    }

    #[test]
    fn groups_enumerate_in_first_encounter_order() {
        let grouped = group(&sample(), &Hasher::col("a")).expect("group");
        assert_eq!(grouped.len(), 3);
        assert_eq!(
            grouped.keys(),
            &[HashKey::Int(1), HashKey::Int(2), HashKey::Int(0)]
        );
    }

    #[test]
    fn get_group_preserves_source_row_order() {
        let grouped = group(&sample(), &Hasher::col("a")).expect("group");
        let ones = grouped.get_group(&HashKey::Int(1)).expect("group 1");
        assert_eq!(ones.height(), 3);
        assert_eq!(
            ones.column("b").expect("b"),
            &Series::of_values(vec![
                Value::Str("x".into()),
                Value::Str("z".into()),
                Value::Str("x".into())
            ])
        );
        assert!(grouped.get_group(&HashKey::Int(9)).is_none());
    }

    #[test]
    fn agg_one_row_per_key_in_encounter_order() {
        let grouped = group(&sample(), &Hasher::col("a")).expect("group");
        let out = grouped
            .agg(&[col("a").sum(), col("b").concat(";")])
            .expect("agg");

        assert_eq!(out.height(), 3);
        assert_eq!(out.index().labels(), &["a", "b"]);

        let row0 = out.row(0).expect("row");
        assert_eq!(row0.get_long("a").expect("a"), 3);
        assert_eq!(row0.get("b").expect("b"), Value::Str("x;z;x".into()));

        let row1 = out.row(1).expect("row");
        assert_eq!(row1.get_long("a").expect("a"), 2);
        assert_eq!(row1.get("b").expect("b"), Value::Str("y".into()));

        let row2 = out.row(2).expect("row");
        assert_eq!(row2.get_long("a").expect("a"), 0);
        assert_eq!(row2.get("b").expect("b"), Value::Str("a".into()));
    }

    #[test]
    fn agg_suffixes_colliding_output_labels() {
        let grouped = group(&sample(), &Hasher::col("a")).expect("group");
        let out = grouped
            .agg(&[col("a").sum(), col("a").min(), col("a").max()])
            .expect("agg");
        assert_eq!(out.index().labels(), &["a", "a_", "a__"]);
    }

    #[test]
    fn head_truncates_each_group_independently() {
        let grouped = group(&sample(), &Hasher::col("a")).expect("group");
        let truncated = grouped.head(1);
        assert_eq!(truncated.len(), 3);
        assert_eq!(
            truncated.positions(&HashKey::Int(1)).expect("positions"),
            &[0]
        );
        assert_eq!(
            truncated
                .get_group(&HashKey::Int(1))
                .expect("group")
                .height(),
            1
        );
    }

    #[test]
    fn sort_reorders_within_groups_only() {
        let frame = DataFrame::of(vec![
            ("k", Series::of_int(vec![1, 1, 2, 2])),
            (
                "v",
                Series::of_values(vec![
                    Value::Int(9),
                    Value::Int(3),
                    Value::Null,
                    Value::Int(5),
                ]),
            ),
        ])
        .expect("frame");

        let grouped = group(&frame, &Hasher::col("k")).expect("group");
        let sorted = grouped.sort_by("v", true).expect("sort");

        assert_eq!(sorted.positions(&HashKey::Int(1)).expect("g1"), &[1, 0]);
        // Nulls sort last within their group.
        assert_eq!(sorted.positions(&HashKey::Int(2)).expect("g2"), &[3, 2]);

        let descending = grouped.sort_by("v", false).expect("sort");
        assert_eq!(descending.positions(&HashKey::Int(1)).expect("g1"), &[0, 1]);
        assert_eq!(descending.positions(&HashKey::Int(2)).expect("g2"), &[3, 2]);
    }

    #[test]
    fn ungroup_reorders_rows_but_preserves_the_multiset() {
        let frame = sample();
        let grouped = group(&frame, &Hasher::col("a")).expect("group");
        let flat = grouped.to_dataframe().expect("ungroup");

        assert_eq!(flat.height(), frame.height());
        // Group-encounter order: all a==1 rows first, then 2, then 0.
        assert_eq!(
            flat.column("a").expect("a"),
            &Series::of_int(vec![1, 1, 1, 2, 0])
        );

        let mut original: Vec<String> = (0..frame.height())
            .map(|pos| {
                let row = frame.row(pos).expect("row");
                format!("{:?}|{:?}", row.get("a").expect("a"), row.get("b").expect("b"))
            })
            .collect();
        let mut flattened: Vec<String> = (0..flat.height())
            .map(|pos| {
                let row = flat.row(pos).expect("row");
                format!("{:?}|{:?}", row.get("a").expect("a"), row.get("b").expect("b"))
            })
            .collect();
        original.sort();
        flattened.sort();
        assert_eq!(original, flattened);
    }

    #[test]
    fn grouping_by_combination_key() {
        let frame = DataFrame::of(vec![
            ("k1", Series::of_int(vec![1, 1, 1])),
            ("k2", Series::of_int(vec![1, 2, 1])),
        ])
        .expect("frame");
        let grouped = group(&frame, &Hasher::col("k1").and(Hasher::col("k2"))).expect("group");
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped
                .positions(&HashKey::Combination(vec![
                    HashKey::Int(1),
                    HashKey::Int(1)
                ]))
                .expect("positions"),
            &[0, 2]
        );
    }

    #[test]
    fn empty_frame_groups_to_nothing() {
        let frame = DataFrame::of(vec![("a", Series::of_int(Vec::new()))]).expect("frame");
        let grouped = group(&frame, &Hasher::col("a")).expect("group");
        assert!(grouped.is_empty());
        let flat = grouped.to_dataframe().expect("ungroup");
        assert_eq!(flat.height(), 0);
    }
}
