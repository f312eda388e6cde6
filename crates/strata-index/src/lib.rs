#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("label not found: {label}")]
    LabelNotFound { label: String },
    #[error("position {position} out of bounds for index of width {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
}

/// How two or more indexes are combined into one label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetCombine {
    /// Labels present in every input, in first-input order.
    Inner,
    /// Labels of the first input.
    Left,
    /// Labels of the last input.
    Right,
    /// Union of all labels in first-seen order.
    Full,
}

/// An ordered set of unique column labels with O(1) label lookup.
///
/// The label-to-position map is built lazily on first lookup and cached;
/// the label vector itself is immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<String>,
    #[serde(skip)]
    positions: OnceCell<HashMap<String, usize>>,
}

impl Index {
    /// Build an index, rejecting duplicate labels.
    pub fn new(labels: Vec<String>) -> Result<Self, IndexError> {
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(IndexError::DuplicateLabel {
                    label: label.clone(),
                });
            }
        }
        Ok(Self {
            labels,
            positions: OnceCell::new(),
        })
    }

    pub fn of(labels: &[&str]) -> Result<Self, IndexError> {
        Self::new(labels.iter().map(|l| (*l).to_string()).collect())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            labels: Vec::new(),
            positions: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label_at(&self, position: usize) -> Result<&str, IndexError> {
        self.labels
            .get(position)
            .map(String::as_str)
            .ok_or(IndexError::PositionOutOfBounds {
                position,
                len: self.labels.len(),
            })
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.position_map().contains_key(label)
    }

    /// Position of a label, failing on unknown labels.
    pub fn position(&self, label: &str) -> Result<usize, IndexError> {
        self.position_map()
            .get(label)
            .copied()
            .ok_or_else(|| IndexError::LabelNotFound {
                label: label.to_string(),
            })
    }

    #[must_use]
    pub fn position_of(&self, label: &str) -> Option<usize> {
        self.position_map().get(label).copied()
    }

    pub fn positions_of(&self, labels: &[&str]) -> Result<Vec<usize>, IndexError> {
        labels.iter().map(|l| self.position(l)).collect()
    }

    fn position_map(&self) -> &HashMap<String, usize> {
        self.positions.get_or_init(|| {
            self.labels
                .iter()
                .enumerate()
                .map(|(pos, label)| (label.clone(), pos))
                .collect()
        })
    }

    /// Keep only the named labels, in the given order.
    pub fn select_labels(&self, labels: &[&str]) -> Result<Self, IndexError> {
        for label in labels {
            if !self.contains(label) {
                return Err(IndexError::LabelNotFound {
                    label: (*label).to_string(),
                });
            }
        }
        Self::new(labels.iter().map(|l| (*l).to_string()).collect())
    }

    /// Remove the named labels, keeping the rest in original order.
    pub fn drop_labels(&self, labels: &[&str]) -> Result<Self, IndexError> {
        for label in labels {
            if !self.contains(label) {
                return Err(IndexError::LabelNotFound {
                    label: (*label).to_string(),
                });
            }
        }
        let dropped: HashSet<&str> = labels.iter().copied().collect();
        Self::new(
            self.labels
                .iter()
                .filter(|l| !dropped.contains(l.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Concatenate two indexes into one, disambiguating collisions on
    /// the right side by appending `_` until the label is unique.
    #[must_use]
    pub fn merge_suffixed(&self, other: &Index) -> Self {
        let mut labels = self.labels.clone();
        let mut seen: HashSet<String> = labels.iter().cloned().collect();
        for label in &other.labels {
            let unique = suffix_until_unique(label, &seen);
            seen.insert(unique.clone());
            labels.push(unique);
        }
        Self {
            labels,
            positions: OnceCell::new(),
        }
    }

    /// Combine the label sets of several indexes. Order within the
    /// result follows the mode's anchor input; `Full` unions in
    /// first-seen order.
    #[must_use]
    pub fn combine(mode: SetCombine, indexes: &[&Index]) -> Self {
        if indexes.is_empty() {
            return Self::empty();
        }
        let labels = match mode {
            SetCombine::Left => indexes[0].labels.clone(),
            SetCombine::Right => indexes[indexes.len() - 1].labels.clone(),
            SetCombine::Inner => indexes[0]
                .labels
                .iter()
                .filter(|label| indexes[1..].iter().all(|ix| ix.contains(label)))
                .cloned()
                .collect(),
            SetCombine::Full => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for index in indexes {
                    for label in &index.labels {
                        if seen.insert(label.clone()) {
                            out.push(label.clone());
                        }
                    }
                }
                out
            }
        };
        Self {
            labels,
            positions: OnceCell::new(),
        }
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

fn suffix_until_unique(label: &str, seen: &HashSet<String>) -> String {
    let mut candidate = label.to_string();
    while seen.contains(&candidate) {
        candidate.push('_');
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::{Index, IndexError, SetCombine};

    #[test]
    fn rejects_duplicate_labels() {
        let err = Index::of(&["a", "b", "a"]).expect_err("must fail");
        assert_eq!(err, IndexError::DuplicateLabel { label: "a".into() });
    }

    #[test]
    fn position_lookup_and_miss() {
        let index = Index::of(&["a", "b", "c"]).expect("index");
        assert_eq!(index.position("b").expect("pos"), 1);
        assert_eq!(index.position_of("z"), None);
        assert_eq!(
            index.position("z").expect_err("must fail"),
            IndexError::LabelNotFound { label: "z".into() }
        );
    }

    #[test]
    fn label_at_bounds() {
        let index = Index::of(&["a"]).expect("index");
        assert_eq!(index.label_at(0).expect("label"), "a");
        assert_eq!(
            index.label_at(1).expect_err("must fail"),
            IndexError::PositionOutOfBounds {
                position: 1,
                len: 1
            }
        );
    }

    #[test]
    fn merge_suffixed_disambiguates_right_side() {
        let left = Index::of(&["a", "b"]).expect("left");
        let right = Index::of(&["a", "b", "c"]).expect("right");
        let merged = left.merge_suffixed(&right);
        assert_eq!(merged.labels(), &["a", "b", "a_", "b_", "c"]);
    }

    #[test]
    fn merge_suffixed_chains_until_unique() {
        let left = Index::of(&["a", "a_"]).expect("left");
        let right = Index::of(&["a"]).expect("right");
        let merged = left.merge_suffixed(&right);
        assert_eq!(merged.labels(), &["a", "a_", "a__"]);
    }

    #[test]
    fn combine_modes() {
        let a = Index::of(&["x", "y", "z"]).expect("a");
        let b = Index::of(&["y", "z", "w"]).expect("b");
        let c = Index::of(&["z", "q"]).expect("c");
        let inputs = [&a, &b, &c];

        assert_eq!(
            Index::combine(SetCombine::Left, &inputs).labels(),
            &["x", "y", "z"]
        );
        assert_eq!(
            Index::combine(SetCombine::Right, &inputs).labels(),
            &["z", "q"]
        );
        assert_eq!(Index::combine(SetCombine::Inner, &inputs).labels(), &["z"]);
        assert_eq!(
            Index::combine(SetCombine::Full, &inputs).labels(),
            &["x", "y", "z", "w", "q"]
        );
    }

    #[test]
    fn combine_of_nothing_is_empty() {
        let combined = Index::combine(SetCombine::Full, &[]);
        assert!(combined.is_empty());
    }

    #[test]
    fn select_and_drop_labels() {
        let index = Index::of(&["a", "b", "c"]).expect("index");

        let selected = index.select_labels(&["c", "a"]).expect("select");
        assert_eq!(selected.labels(), &["c", "a"]);

        let dropped = index.drop_labels(&["b"]).expect("drop");
        assert_eq!(dropped.labels(), &["a", "c"]);

        assert!(index.select_labels(&["nope"]).is_err());
        assert!(index.drop_labels(&["nope"]).is_err());
    }

    #[test]
    fn serde_round_trip_rebuilds_lookup() {
        let index = Index::of(&["a", "b"]).expect("index");
        let json = serde_json::to_string(&index).expect("serialize");
        let back: Index = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, index);
        assert_eq!(back.position("b").expect("pos"), 1);
    }
}
