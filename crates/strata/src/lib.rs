#![forbid(unsafe_code)]

//! Typed, columnar in-memory DataFrame engine.
//!
//! The engine is built from small layered crates, leaves first:
//!
//! - [`strata_types`]: scalar values, numeric promotion, hash-key
//!   normal form.
//! - [`strata_series`]: immutable typed columns with primitive
//!   specialization and lazy position-selected views.
//! - [`strata_index`]: ordered unique column labels with set algebra.
//! - [`strata_frame`]: the DataFrame itself, row proxies, hashing,
//!   vertical concatenation, row appenders.
//! - [`strata_expr`]: vectorized expression and condition trees.
//! - [`strata_join`]: predicate and hash joins expressed through
//!   row-position selector arrays.
//! - [`strata_groupby`]: lazy hash-key partitioning and aggregation.
//!
//! All row-level operations compose through position selector arrays in
//! which `-1` marks a null gap, and every published value is immutable:
//! transformations derive new frames that share column storage with
//! their sources.

pub use strata_expr::{AggFunc, ColRef, Condition, Exp, ExprError, bool_col, col, col_at, filter, val, with_column};
pub use strata_frame::{
    DataFrame, DataFrameAppender, FormatOptions, FrameError, Hasher, RowProxy,
};
pub use strata_groupby::{GroupBy, GroupByError, group};
pub use strata_index::{Index, IndexError, SetCombine};
pub use strata_join::{
    DEFAULT_ARENA_BUDGET_BYTES, JoinError, JoinExecutionOptions, JoinType, RowSelectors,
    hash_join, hash_join_with_options, join, join_frames, join_with, predicate_join,
};
pub use strata_series::{
    ArithOp, CmpOp, IndexedSeries, Series, SeriesBuilder, SeriesError, SeriesKind,
};
pub use strata_types::{HashKey, TypeError, Value, ValueType, common_numeric_type};
