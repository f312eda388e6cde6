#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;

use strata_types::{HashKey, TypeError, Value, ValueType, common_numeric_type};
use thiserror::Error;

/// Storage kind of a materialized series. Primitive kinds never hold
/// nulls; `Boxed` is the only kind that can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    Int,
    Long,
    Float,
    Double,
    Bool,
    Boxed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SeriesError {
    #[error("series length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("position {position} out of bounds for series of length {len}")]
    PositionOutOfBounds { position: i64, len: usize },
    #[error("expected {expected:?} series but found {actual:?}")]
    KindMismatch {
        expected: SeriesKind,
        actual: SeriesKind,
    },
    #[error("copy target too small: needed {needed}, actual {actual}")]
    TargetTooSmall { needed: usize, actual: usize },
    #[error("integer division by zero")]
    DivisionByZero,
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// An immutable, ordered, homogeneously-typed column.
///
/// A closed tagged-variant type: one variant per primitive width plus
/// boxed-object storage, and a lazy `Indexed` view form. Storage is
/// `Arc`-shared, so clones are O(1) and derived frames share columns
/// structurally. No variant is ever mutated after construction.
#[derive(Debug, Clone)]
pub enum Series {
    Int(Arc<[i32]>),
    Long(Arc<[i64]>),
    Float(Arc<[f32]>),
    Double(Arc<[f64]>),
    Bool(Arc<[bool]>),
    Boxed(Arc<[Value]>),
    Indexed(IndexedSeries),
}

/// A lazy view over a source series plus an owned position array.
///
/// Negative positions denote null gaps. Views are always derived from an
/// existing series and never form cycles; the dense form is computed on
/// first access and cached.
#[derive(Debug, Clone)]
pub struct IndexedSeries {
    source: Arc<Series>,
    positions: Arc<[i32]>,
    // Boxed so the view variant does not make `Series` self-recursive.
    dense: OnceCell<Box<Series>>,
}

impl IndexedSeries {
    fn new(source: Arc<Series>, positions: Vec<i32>) -> Self {
        Self {
            source,
            positions: positions.into(),
            dense: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &Series {
        &self.source
    }

    #[must_use]
    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn has_gaps(&self) -> bool {
        self.positions.iter().any(|&p| p < 0)
    }

    fn kind(&self) -> SeriesKind {
        // A gap cannot be represented in a primitive array, so any gap
        // forces the boxed kind regardless of the source.
        if self.has_gaps() {
            SeriesKind::Boxed
        } else {
            self.source.kind()
        }
    }

    fn value_at(&self, pos: usize) -> Value {
        let p = self.positions[pos];
        if p < 0 {
            Value::Null
        } else {
            self.source.value_at(p as usize)
        }
    }

    fn materialize(&self) -> Series {
        self.dense
            .get_or_init(|| Box::new(self.compute_dense()))
            .as_ref()
            .clone()
    }

    fn compute_dense(&self) -> Series {
        let source = self.source.materialize();
        if self.has_gaps() {
            // Mandatory widening: primitive storage cannot hold the gap.
            let values = self
                .positions
                .iter()
                .map(|&p| {
                    if p < 0 {
                        Value::Null
                    } else {
                        source.value_at(p as usize)
                    }
                })
                .collect::<Vec<_>>();
            return Series::of_values(values);
        }

        match &source {
            Series::Int(data) => Series::of_int(self.gather(data)),
            Series::Long(data) => Series::of_long(self.gather(data)),
            Series::Float(data) => Series::of_float(self.gather(data)),
            Series::Double(data) => Series::of_double(self.gather(data)),
            Series::Bool(data) => Series::of_bool(self.gather(data)),
            Series::Boxed(data) => Series::of_values(self.gather(data)),
            // materialize() never returns a view.
            Series::Indexed(view) => view.materialize(),
        }
    }

    fn gather<T: Clone>(&self, data: &[T]) -> Vec<T> {
        self.positions
            .iter()
            .map(|&p| data[p as usize].clone())
            .collect()
    }
}

impl Series {
    #[must_use]
    pub fn of_int(values: Vec<i32>) -> Self {
        Self::Int(values.into())
    }

    #[must_use]
    pub fn of_long(values: Vec<i64>) -> Self {
        Self::Long(values.into())
    }

    #[must_use]
    pub fn of_float(values: Vec<f32>) -> Self {
        Self::Float(values.into())
    }

    #[must_use]
    pub fn of_double(values: Vec<f64>) -> Self {
        Self::Double(values.into())
    }

    #[must_use]
    pub fn of_bool(values: Vec<bool>) -> Self {
        Self::Bool(values.into())
    }

    #[must_use]
    pub fn of_values(values: Vec<Value>) -> Self {
        Self::Boxed(values.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int(d) => d.len(),
            Self::Long(d) => d.len(),
            Self::Float(d) => d.len(),
            Self::Double(d) => d.len(),
            Self::Bool(d) => d.len(),
            Self::Boxed(d) => d.len(),
            Self::Indexed(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn kind(&self) -> SeriesKind {
        match self {
            Self::Int(_) => SeriesKind::Int,
            Self::Long(_) => SeriesKind::Long,
            Self::Float(_) => SeriesKind::Float,
            Self::Double(_) => SeriesKind::Double,
            Self::Bool(_) => SeriesKind::Bool,
            Self::Boxed(_) => SeriesKind::Boxed,
            Self::Indexed(v) => v.kind(),
        }
    }

    #[must_use]
    pub fn has_nulls(&self) -> bool {
        match self {
            Self::Boxed(d) => d.iter().any(Value::is_null),
            Self::Indexed(v) => v.has_gaps() || v.source.has_nulls(),
            _ => false,
        }
    }

    /// Force a view into its dense backing form. Dense series return a
    /// cheap structural clone of themselves.
    #[must_use]
    pub fn materialize(&self) -> Series {
        match self {
            Self::Indexed(view) => view.materialize(),
            dense => dense.clone(),
        }
    }

    #[must_use]
    pub fn value(&self, pos: usize) -> Option<Value> {
        (pos < self.len()).then(|| self.value_at(pos))
    }

    fn value_at(&self, pos: usize) -> Value {
        match self {
            Self::Int(d) => Value::Int(d[pos]),
            Self::Long(d) => Value::Long(d[pos]),
            Self::Float(d) => Value::Float(d[pos]),
            Self::Double(d) => Value::Double(d[pos]),
            Self::Bool(d) => Value::Bool(d[pos]),
            Self::Boxed(d) => d[pos].clone(),
            Self::Indexed(v) => v.value_at(pos),
        }
    }

    pub fn get_int(&self, pos: usize) -> Result<i32, SeriesError> {
        match self.value(pos) {
            None => Err(self.out_of_bounds(pos)),
            Some(Value::Int(v)) => Ok(v),
            Some(Value::Null) => Err(TypeError::NullValue.into()),
            Some(_) => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Int,
                actual: self.kind(),
            }),
        }
    }

    pub fn get_long(&self, pos: usize) -> Result<i64, SeriesError> {
        match self.value(pos) {
            None => Err(self.out_of_bounds(pos)),
            Some(Value::Long(v)) => Ok(v),
            Some(Value::Int(v)) => Ok(i64::from(v)),
            Some(Value::Null) => Err(TypeError::NullValue.into()),
            Some(_) => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Long,
                actual: self.kind(),
            }),
        }
    }

    pub fn get_float(&self, pos: usize) -> Result<f32, SeriesError> {
        match self.value(pos) {
            None => Err(self.out_of_bounds(pos)),
            Some(Value::Float(v)) => Ok(v),
            Some(Value::Null) => Err(TypeError::NullValue.into()),
            Some(_) => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Float,
                actual: self.kind(),
            }),
        }
    }

    pub fn get_double(&self, pos: usize) -> Result<f64, SeriesError> {
        match self.value(pos) {
            None => Err(self.out_of_bounds(pos)),
            Some(value) => value.to_double().map_err(SeriesError::from),
        }
    }

    pub fn get_bool(&self, pos: usize) -> Result<bool, SeriesError> {
        match self.value(pos) {
            None => Err(self.out_of_bounds(pos)),
            Some(Value::Bool(v)) => Ok(v),
            Some(Value::Null) => Err(TypeError::NullValue.into()),
            Some(_) => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Bool,
                actual: self.kind(),
            }),
        }
    }

    fn out_of_bounds(&self, pos: usize) -> SeriesError {
        SeriesError::PositionOutOfBounds {
            position: pos as i64,
            len: self.len(),
        }
    }

    /// Select by row positions. Any negative position yields a null gap
    /// at that output slot; positions past the end are an error. The
    /// result is a lazy view sharing this series' storage.
    pub fn select(&self, positions: &[i32]) -> Result<Series, SeriesError> {
        let len = self.len();
        for &p in positions {
            if p >= 0 && p as usize >= len {
                return Err(SeriesError::PositionOutOfBounds {
                    position: i64::from(p),
                    len,
                });
            }
        }
        Ok(Series::Indexed(IndexedSeries::new(
            Arc::new(self.clone()),
            positions.to_vec(),
        )))
    }

    /// Concatenate other series after this one. Zero-length others are
    /// an identity short-circuit. Same-kind primitive inputs stay
    /// primitive; any kind mix widens to boxed.
    #[must_use]
    pub fn concat(&self, others: &[&Series]) -> Series {
        if others.iter().all(|s| s.is_empty()) {
            return self.clone();
        }

        let kind = self.kind();
        let same_kind = kind != SeriesKind::Boxed && others.iter().all(|s| s.kind() == kind);
        let total: usize = self.len() + others.iter().map(|s| s.len()).sum::<usize>();

        let mut parts = Vec::with_capacity(others.len() + 1);
        parts.push(self.materialize());
        parts.extend(others.iter().map(|s| s.materialize()));

        if same_kind {
            match kind {
                SeriesKind::Int => {
                    let mut out = Vec::with_capacity(total);
                    for part in &parts {
                        if let Series::Int(d) = part {
                            out.extend_from_slice(d);
                        }
                    }
                    return Series::of_int(out);
                }
                SeriesKind::Long => {
                    let mut out = Vec::with_capacity(total);
                    for part in &parts {
                        if let Series::Long(d) = part {
                            out.extend_from_slice(d);
                        }
                    }
                    return Series::of_long(out);
                }
                SeriesKind::Float => {
                    let mut out = Vec::with_capacity(total);
                    for part in &parts {
                        if let Series::Float(d) = part {
                            out.extend_from_slice(d);
                        }
                    }
                    return Series::of_float(out);
                }
                SeriesKind::Double => {
                    let mut out = Vec::with_capacity(total);
                    for part in &parts {
                        if let Series::Double(d) = part {
                            out.extend_from_slice(d);
                        }
                    }
                    return Series::of_double(out);
                }
                SeriesKind::Bool => {
                    let mut out = Vec::with_capacity(total);
                    for part in &parts {
                        if let Series::Bool(d) = part {
                            out.extend_from_slice(d);
                        }
                    }
                    return Series::of_bool(out);
                }
                SeriesKind::Boxed => {}
            }
        }

        let mut out = Vec::with_capacity(total);
        for part in &parts {
            for pos in 0..part.len() {
                out.push(part.value_at(pos));
            }
        }
        Series::of_values(out)
    }

    /// Distinct values preserving first-occurrence order.
    #[must_use]
    pub fn unique(&self) -> Series {
        match self.materialize() {
            Series::Int(data) => {
                let mut seen = HashSet::new();
                Series::of_int(data.iter().copied().filter(|v| seen.insert(*v)).collect())
            }
            Series::Long(data) => {
                let mut seen = HashSet::new();
                Series::of_long(data.iter().copied().filter(|v| seen.insert(*v)).collect())
            }
            Series::Float(data) => {
                let mut seen = HashSet::new();
                Series::of_float(
                    data.iter()
                        .copied()
                        .filter(|v| seen.insert(HashKey::of(&Value::Float(*v))))
                        .collect(),
                )
            }
            Series::Double(data) => {
                let mut seen = HashSet::new();
                Series::of_double(
                    data.iter()
                        .copied()
                        .filter(|v| seen.insert(HashKey::of(&Value::Double(*v))))
                        .collect(),
                )
            }
            Series::Bool(data) => {
                let mut seen = HashSet::new();
                Series::of_bool(data.iter().copied().filter(|v| seen.insert(*v)).collect())
            }
            dense => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for pos in 0..dense.len() {
                    let value = dense.value_at(pos);
                    if seen.insert(HashKey::of(&value)) {
                        out.push(value);
                    }
                }
                Series::of_values(out)
            }
        }
    }

    /// Keep values matching the predicate; preserves the storage kind.
    #[must_use]
    pub fn filter<P: Fn(&Value) -> bool>(&self, predicate: P) -> Series {
        let positions = self.index_where(predicate);
        match self.select(&positions) {
            // Positions come from this series, so select cannot fail.
            Ok(out) => out.materialize(),
            Err(_) => self.clone(),
        }
    }

    /// Positions of values matching the predicate.
    #[must_use]
    pub fn index_where<P: Fn(&Value) -> bool>(&self, predicate: P) -> Vec<i32> {
        let mut out = Vec::new();
        for pos in 0..self.len() {
            if predicate(&self.value_at(pos)) {
                out.push(pos as i32);
            }
        }
        out
    }

    /// Replace values at positions where `mask` is true. The mask must
    /// be a Bool series of the same length.
    pub fn replace(&self, mask: &Series, with: &Value) -> Result<Series, SeriesError> {
        if mask.len() != self.len() {
            return Err(SeriesError::LengthMismatch {
                left: self.len(),
                right: mask.len(),
            });
        }
        let mask = mask.materialize();
        let Series::Bool(bits) = &mask else {
            return Err(SeriesError::KindMismatch {
                expected: SeriesKind::Bool,
                actual: mask.kind(),
            });
        };

        let dense = self.materialize();
        match (&dense, with) {
            (Series::Int(d), Value::Int(v)) => Ok(Series::of_int(
                d.iter()
                    .zip(bits.iter())
                    .map(|(old, &hit)| if hit { *v } else { *old })
                    .collect(),
            )),
            (Series::Long(d), Value::Long(v)) => Ok(Series::of_long(
                d.iter()
                    .zip(bits.iter())
                    .map(|(old, &hit)| if hit { *v } else { *old })
                    .collect(),
            )),
            (Series::Float(d), Value::Float(v)) => Ok(Series::of_float(
                d.iter()
                    .zip(bits.iter())
                    .map(|(old, &hit)| if hit { *v } else { *old })
                    .collect(),
            )),
            (Series::Double(d), Value::Double(v)) => Ok(Series::of_double(
                d.iter()
                    .zip(bits.iter())
                    .map(|(old, &hit)| if hit { *v } else { *old })
                    .collect(),
            )),
            (Series::Bool(d), Value::Bool(v)) => Ok(Series::of_bool(
                d.iter()
                    .zip(bits.iter())
                    .map(|(old, &hit)| if hit { *v } else { *old })
                    .collect(),
            )),
            _ => {
                let out = (0..dense.len())
                    .map(|pos| {
                        if bits[pos] {
                            with.clone()
                        } else {
                            dense.value_at(pos)
                        }
                    })
                    .collect();
                Ok(Series::of_values(out))
            }
        }
    }

    /// Replace nulls with a fixed value. Primitive series have no nulls
    /// and return themselves.
    #[must_use]
    pub fn fill_nulls(&self, with: &Value) -> Series {
        match self.materialize() {
            Series::Boxed(data) => Series::of_values(
                data.iter()
                    .map(|v| if v.is_null() { with.clone() } else { v.clone() })
                    .collect(),
            ),
            dense => dense,
        }
    }

    /// Replace each null with the nearest preceding non-null value.
    /// Leading nulls stay null.
    #[must_use]
    pub fn fill_nulls_forward(&self) -> Series {
        match self.materialize() {
            Series::Boxed(data) => {
                let mut last = Value::Null;
                let out = data
                    .iter()
                    .map(|v| {
                        if v.is_null() {
                            last.clone()
                        } else {
                            last = v.clone();
                            v.clone()
                        }
                    })
                    .collect();
                Series::of_values(out)
            }
            dense => dense,
        }
    }

    /// Replace each null with the nearest following non-null value.
    /// Trailing nulls stay null.
    #[must_use]
    pub fn fill_nulls_backward(&self) -> Series {
        match self.materialize() {
            Series::Boxed(data) => {
                let mut out = vec![Value::Null; data.len()];
                let mut next = Value::Null;
                for pos in (0..data.len()).rev() {
                    if data[pos].is_null() {
                        out[pos] = next.clone();
                    } else {
                        next = data[pos].clone();
                        out[pos] = next.clone();
                    }
                }
                Series::of_values(out)
            }
            dense => dense,
        }
    }

    pub fn eq_series(&self, other: &Series) -> Result<Series, SeriesError> {
        self.compare(other, CmpOp::Eq)
    }

    pub fn ne_series(&self, other: &Series) -> Result<Series, SeriesError> {
        self.compare(other, CmpOp::Ne)
    }

    // ── Bulk copy ──────────────────────────────────────────────────────

    /// Copy `len` boxed values starting at `from` into `target[to..]`.
    pub fn copy_to(
        &self,
        target: &mut [Value],
        from: usize,
        to: usize,
        len: usize,
    ) -> Result<(), SeriesError> {
        if from + len > self.len() {
            return Err(SeriesError::PositionOutOfBounds {
                position: (from + len) as i64,
                len: self.len(),
            });
        }
        if to + len > target.len() {
            return Err(SeriesError::TargetTooSmall {
                needed: to + len,
                actual: target.len(),
            });
        }
        for offset in 0..len {
            target[to + offset] = self.value_at(from + offset);
        }
        Ok(())
    }

    pub fn copy_to_int(
        &self,
        target: &mut [i32],
        from: usize,
        to: usize,
        len: usize,
    ) -> Result<(), SeriesError> {
        match self.materialize() {
            Series::Int(data) => copy_primitive(&data, target, from, to, len),
            dense => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Int,
                actual: dense.kind(),
            }),
        }
    }

    pub fn copy_to_long(
        &self,
        target: &mut [i64],
        from: usize,
        to: usize,
        len: usize,
    ) -> Result<(), SeriesError> {
        match self.materialize() {
            Series::Long(data) => copy_primitive(&data, target, from, to, len),
            dense => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Long,
                actual: dense.kind(),
            }),
        }
    }

    pub fn copy_to_double(
        &self,
        target: &mut [f64],
        from: usize,
        to: usize,
        len: usize,
    ) -> Result<(), SeriesError> {
        match self.materialize() {
            Series::Double(data) => copy_primitive(&data, target, from, to, len),
            dense => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Double,
                actual: dense.kind(),
            }),
        }
    }

    pub fn copy_to_bool(
        &self,
        target: &mut [bool],
        from: usize,
        to: usize,
        len: usize,
    ) -> Result<(), SeriesError> {
        match self.materialize() {
            Series::Bool(data) => copy_primitive(&data, target, from, to, len),
            dense => Err(SeriesError::KindMismatch {
                expected: SeriesKind::Bool,
                actual: dense.kind(),
            }),
        }
    }

    // ── Arithmetic kernels ─────────────────────────────────────────────

    /// Element-wise arithmetic. Matching primitive pairs take the
    /// specialized slice path; everything else falls back to boxed
    /// evaluation with numeric promotion and null propagation. The
    /// routing decision is made per call on the runtime storage kind.
    pub fn arith(&self, other: &Series, op: ArithOp) -> Result<Series, SeriesError> {
        if self.len() != other.len() {
            return Err(SeriesError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        if let Some(fast) = self.try_primitive_arith(other, op)? {
            return Ok(fast);
        }

        let left = self.materialize();
        let right = other.materialize();
        let mut out = Vec::with_capacity(left.len());
        for pos in 0..left.len() {
            let l = left.value_at(pos);
            let r = right.value_at(pos);
            if l.is_null() || r.is_null() {
                out.push(Value::Null);
                continue;
            }
            let common = common_numeric_type(
                l.value_type().unwrap_or(ValueType::Str),
                r.value_type().unwrap_or(ValueType::Str),
            )?;
            out.push(apply_boxed_arith(&l, &r, common, op)?);
        }
        Ok(Series::of_values(out))
    }

    fn try_primitive_arith(
        &self,
        other: &Series,
        op: ArithOp,
    ) -> Result<Option<Series>, SeriesError> {
        match (self.materialize(), other.materialize()) {
            (Series::Int(a), Series::Int(b)) => int_arith(&a, &b, op).map(Some),
            (Series::Long(a), Series::Long(b)) => long_arith(&a, &b, op).map(Some),
            (Series::Float(a), Series::Float(b)) => Ok(Some(float_arith(&a, &b, op))),
            (Series::Double(a), Series::Double(b)) => Ok(Some(double_arith(&a, &b, op))),
            _ => Ok(None),
        }
    }

    pub fn add(&self, other: &Series) -> Result<Series, SeriesError> {
        self.arith(other, ArithOp::Add)
    }

    pub fn sub(&self, other: &Series) -> Result<Series, SeriesError> {
        self.arith(other, ArithOp::Sub)
    }

    pub fn mul(&self, other: &Series) -> Result<Series, SeriesError> {
        self.arith(other, ArithOp::Mul)
    }

    pub fn div(&self, other: &Series) -> Result<Series, SeriesError> {
        self.arith(other, ArithOp::Div)
    }

    pub fn rem(&self, other: &Series) -> Result<Series, SeriesError> {
        self.arith(other, ArithOp::Rem)
    }

    // ── Comparison kernels ─────────────────────────────────────────────

    /// Element-wise comparison producing a gap-free Bool series.
    ///
    /// `Eq`/`Ne` use NaN-aware boxed equality where `Null == Null` is
    /// true; ordering comparisons involving null produce false.
    pub fn compare(&self, other: &Series, op: CmpOp) -> Result<Series, SeriesError> {
        if self.len() != other.len() {
            return Err(SeriesError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        let bits = match (self.materialize(), other.materialize()) {
            (Series::Int(a), Series::Int(b)) => cmp_primitive(&a, &b, op),
            (Series::Long(a), Series::Long(b)) => cmp_primitive(&a, &b, op),
            (Series::Float(a), Series::Float(b)) => cmp_float(&a, &b, op),
            (Series::Double(a), Series::Double(b)) => cmp_float(&a, &b, op),
            (Series::Bool(a), Series::Bool(b)) => cmp_primitive(&a, &b, op),
            (left, right) => {
                let mut bits = Vec::with_capacity(left.len());
                for pos in 0..left.len() {
                    bits.push(compare_values(
                        &left.value_at(pos),
                        &right.value_at(pos),
                        op,
                    )?);
                }
                bits
            }
        };

        Ok(Series::of_bool(bits))
    }

    /// Compare every element against one scalar.
    pub fn compare_value(&self, value: &Value, op: CmpOp) -> Result<Series, SeriesError> {
        let dense = self.materialize();
        let mut bits = Vec::with_capacity(dense.len());
        for pos in 0..dense.len() {
            bits.push(compare_values(&dense.value_at(pos), value, op)?);
        }
        Ok(Series::of_bool(bits))
    }

    // ── Reductions ─────────────────────────────────────────────────────

    /// Null-skipping sum. Integer families sum to `Long`, float families
    /// to `Double`. Zero non-null inputs reduce to `Null`.
    pub fn sum(&self) -> Result<Value, SeriesError> {
        match self.materialize() {
            Series::Int(d) => Ok(if d.is_empty() {
                Value::Null
            } else {
                Value::Long(d.iter().fold(0_i64, |acc, &v| acc.wrapping_add(i64::from(v))))
            }),
            Series::Long(d) => Ok(if d.is_empty() {
                Value::Null
            } else {
                Value::Long(d.iter().fold(0_i64, |acc, &v| acc.wrapping_add(v)))
            }),
            Series::Float(d) => Ok(if d.is_empty() {
                Value::Null
            } else {
                Value::Double(d.iter().map(|&v| f64::from(v)).sum())
            }),
            Series::Double(d) => Ok(if d.is_empty() {
                Value::Null
            } else {
                Value::Double(d.iter().sum())
            }),
            Series::Bool(_) => Err(TypeError::NonNumeric {
                value_type: Some(ValueType::Bool),
            }
            .into()),
            dense => {
                let mut long_acc = 0_i64;
                let mut double_acc = 0.0_f64;
                let mut saw_float = false;
                let mut count = 0_usize;
                for pos in 0..dense.len() {
                    let value = dense.value_at(pos);
                    match value {
                        Value::Null => {}
                        Value::Int(v) => {
                            long_acc = long_acc.wrapping_add(i64::from(v));
                            double_acc += f64::from(v);
                            count += 1;
                        }
                        Value::Long(v) => {
                            long_acc = long_acc.wrapping_add(v);
                            double_acc += v as f64;
                            count += 1;
                        }
                        Value::Float(v) => {
                            saw_float = true;
                            double_acc += f64::from(v);
                            count += 1;
                        }
                        Value::Double(v) => {
                            saw_float = true;
                            double_acc += v;
                            count += 1;
                        }
                        other => {
                            return Err(TypeError::NonNumeric {
                                value_type: other.value_type(),
                            }
                            .into());
                        }
                    }
                }
                if count == 0 {
                    Ok(Value::Null)
                } else if saw_float {
                    Ok(Value::Double(double_acc))
                } else {
                    Ok(Value::Long(long_acc))
                }
            }
        }
    }

    /// Null-skipping minimum, preserving the element type of the
    /// winning value. Zero non-null inputs reduce to `Null`.
    pub fn min(&self) -> Result<Value, SeriesError> {
        self.extremum(true)
    }

    /// Null-skipping maximum. Zero non-null inputs reduce to `Null`.
    pub fn max(&self) -> Result<Value, SeriesError> {
        self.extremum(false)
    }

    fn extremum(&self, smallest: bool) -> Result<Value, SeriesError> {
        let dense = self.materialize();
        let mut best: Option<(f64, Value)> = None;
        for pos in 0..dense.len() {
            let value = dense.value_at(pos);
            if value.is_null() {
                continue;
            }
            let key = value.to_double()?;
            let better = match &best {
                None => true,
                Some((current, _)) => {
                    if smallest {
                        key < *current
                    } else {
                        key > *current
                    }
                }
            };
            if better {
                best = Some((key, value));
            }
        }
        Ok(best.map_or(Value::Null, |(_, value)| value))
    }

    /// Null-skipping mean as `Double`. Zero non-null inputs reduce to
    /// `Null`.
    pub fn avg(&self) -> Result<Value, SeriesError> {
        let dense = self.materialize();
        let mut acc = 0.0_f64;
        let mut count = 0_usize;
        for pos in 0..dense.len() {
            let value = dense.value_at(pos);
            if value.is_null() {
                continue;
            }
            acc += value.to_double()?;
            count += 1;
        }
        if count == 0 {
            Ok(Value::Null)
        } else {
            Ok(Value::Double(acc / count as f64))
        }
    }

    /// Null-skipping median as `Double`. Zero non-null inputs reduce to
    /// `Null`.
    pub fn median(&self) -> Result<Value, SeriesError> {
        let dense = self.materialize();
        let mut nums = Vec::with_capacity(dense.len());
        for pos in 0..dense.len() {
            let value = dense.value_at(pos);
            if value.is_null() {
                continue;
            }
            nums.push(value.to_double()?);
        }
        if nums.is_empty() {
            return Ok(Value::Null);
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = nums.len() / 2;
        if nums.len().is_multiple_of(2) {
            Ok(Value::Double((nums[mid - 1] + nums[mid]) / 2.0))
        } else {
            Ok(Value::Double(nums[mid]))
        }
    }

    #[must_use]
    pub fn count_non_null(&self) -> i64 {
        let dense = self.materialize();
        (0..dense.len())
            .filter(|&pos| !dense.value_at(pos).is_null())
            .count() as i64
    }

    /// Join the display forms of all non-null values with a separator.
    /// Zero non-null inputs reduce to `Null`.
    #[must_use]
    pub fn concat_values(&self, separator: &str) -> Value {
        let dense = self.materialize();
        let mut parts = Vec::new();
        for pos in 0..dense.len() {
            let value = dense.value_at(pos);
            if !value.is_null() {
                parts.push(value.to_string());
            }
        }
        if parts.is_empty() {
            Value::Null
        } else {
            Value::Str(parts.join(separator))
        }
    }

    /// First element, or `Null` when empty.
    #[must_use]
    pub fn first(&self) -> Value {
        if self.is_empty() {
            Value::Null
        } else {
            self.value_at(0)
        }
    }

    /// Apply a per-value conversion, producing a new series. The result
    /// keeps typed storage when every mapped value shares one primitive
    /// type; any null or type mix widens to boxed storage.
    #[must_use]
    pub fn map<F: Fn(&Value) -> Value>(&self, mapper: F) -> Series {
        let mut builder = SeriesBuilder::new();
        for pos in 0..self.len() {
            builder.push_value(mapper(&self.value_at(pos)));
        }
        builder.build()
    }
}

/// Content equality: element-wise NaN-aware comparison, so a widened or
/// view series compares equal to its dense source content.
impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        (0..self.len()).all(|pos| {
            let l = self.value_at(pos);
            let r = other.value_at(pos);
            (l.is_null() && r.is_null()) || l.semantic_eq(&r)
        })
    }
}

fn copy_primitive<T: Copy>(
    data: &[T],
    target: &mut [T],
    from: usize,
    to: usize,
    len: usize,
) -> Result<(), SeriesError> {
    if from + len > data.len() {
        return Err(SeriesError::PositionOutOfBounds {
            position: (from + len) as i64,
            len: data.len(),
        });
    }
    if to + len > target.len() {
        return Err(SeriesError::TargetTooSmall {
            needed: to + len,
            actual: target.len(),
        });
    }
    target[to..to + len].copy_from_slice(&data[from..from + len]);
    Ok(())
}

fn int_arith(a: &[i32], b: &[i32], op: ArithOp) -> Result<Series, SeriesError> {
    let mut out = Vec::with_capacity(a.len());
    for (&l, &r) in a.iter().zip(b.iter()) {
        let v = match op {
            ArithOp::Add => l.wrapping_add(r),
            ArithOp::Sub => l.wrapping_sub(r),
            ArithOp::Mul => l.wrapping_mul(r),
            ArithOp::Div => {
                if r == 0 {
                    return Err(SeriesError::DivisionByZero);
                }
                l.wrapping_div(r)
            }
            ArithOp::Rem => {
                if r == 0 {
                    return Err(SeriesError::DivisionByZero);
                }
                l.wrapping_rem(r)
            }
        };
        out.push(v);
    }
    Ok(Series::of_int(out))
}

fn long_arith(a: &[i64], b: &[i64], op: ArithOp) -> Result<Series, SeriesError> {
    let mut out = Vec::with_capacity(a.len());
    for (&l, &r) in a.iter().zip(b.iter()) {
        let v = match op {
            ArithOp::Add => l.wrapping_add(r),
            ArithOp::Sub => l.wrapping_sub(r),
            ArithOp::Mul => l.wrapping_mul(r),
            ArithOp::Div => {
                if r == 0 {
                    return Err(SeriesError::DivisionByZero);
                }
                l.wrapping_div(r)
            }
            ArithOp::Rem => {
                if r == 0 {
                    return Err(SeriesError::DivisionByZero);
                }
                l.wrapping_rem(r)
            }
        };
        out.push(v);
    }
    Ok(Series::of_long(out))
}

fn float_arith(a: &[f32], b: &[f32], op: ArithOp) -> Series {
    let apply: fn(f32, f32) -> f32 = match op {
        ArithOp::Add => |l, r| l + r,
        ArithOp::Sub => |l, r| l - r,
        ArithOp::Mul => |l, r| l * r,
        ArithOp::Div => |l, r| l / r,
        ArithOp::Rem => |l, r| l % r,
    };
    Series::of_float(a.iter().zip(b.iter()).map(|(&l, &r)| apply(l, r)).collect())
}

fn double_arith(a: &[f64], b: &[f64], op: ArithOp) -> Series {
    let apply: fn(f64, f64) -> f64 = match op {
        ArithOp::Add => |l, r| l + r,
        ArithOp::Sub => |l, r| l - r,
        ArithOp::Mul => |l, r| l * r,
        ArithOp::Div => |l, r| l / r,
        ArithOp::Rem => |l, r| l % r,
    };
    Series::of_double(a.iter().zip(b.iter()).map(|(&l, &r)| apply(l, r)).collect())
}

fn apply_boxed_arith(
    left: &Value,
    right: &Value,
    common: ValueType,
    op: ArithOp,
) -> Result<Value, SeriesError> {
    match common {
        ValueType::Int | ValueType::Long => {
            let l = left.to_long()?;
            let r = right.to_long()?;
            let v = match op {
                ArithOp::Add => l.wrapping_add(r),
                ArithOp::Sub => l.wrapping_sub(r),
                ArithOp::Mul => l.wrapping_mul(r),
                ArithOp::Div => {
                    if r == 0 {
                        return Err(SeriesError::DivisionByZero);
                    }
                    l.wrapping_div(r)
                }
                ArithOp::Rem => {
                    if r == 0 {
                        return Err(SeriesError::DivisionByZero);
                    }
                    l.wrapping_rem(r)
                }
            };
            if common == ValueType::Int {
                Ok(Value::Int(v as i32))
            } else {
                Ok(Value::Long(v))
            }
        }
        _ => {
            let l = left.to_double()?;
            let r = right.to_double()?;
            let v = match op {
                ArithOp::Add => l + r,
                ArithOp::Sub => l - r,
                ArithOp::Mul => l * r,
                ArithOp::Div => l / r,
                ArithOp::Rem => l % r,
            };
            if common == ValueType::Float {
                Ok(Value::Float(v as f32))
            } else {
                Ok(Value::Double(v))
            }
        }
    }
}

fn cmp_primitive<T: PartialOrd>(a: &[T], b: &[T], op: CmpOp) -> Vec<bool> {
    a.iter()
        .zip(b.iter())
        .map(|(l, r)| match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        })
        .collect()
}

/// Float comparison with the same equality rule as the boxed path:
/// a NaN pair compares equal, so `Eq`/`Ne` do not depend on whether
/// the column happens to be in primitive or boxed storage.
fn cmp_float<T: Copy + Into<f64>>(a: &[T], b: &[T], op: CmpOp) -> Vec<bool> {
    a.iter()
        .zip(b.iter())
        .map(|(&l, &r)| {
            let (l, r): (f64, f64) = (l.into(), r.into());
            let eq = (l.is_nan() && r.is_nan()) || l == r;
            match op {
                CmpOp::Eq => eq,
                CmpOp::Ne => !eq,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            }
        })
        .collect()
}

fn compare_values(left: &Value, right: &Value, op: CmpOp) -> Result<bool, SeriesError> {
    match op {
        CmpOp::Eq => {
            return Ok((left.is_null() && right.is_null()) || left.semantic_eq(right));
        }
        CmpOp::Ne => {
            return Ok(!((left.is_null() && right.is_null()) || left.semantic_eq(right)));
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(false);
    }

    if let (Value::Str(l), Value::Str(r)) = (left, right) {
        return Ok(match op {
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
            CmpOp::Eq | CmpOp::Ne => false,
        });
    }

    if let (Value::Bool(l), Value::Bool(r)) = (left, right) {
        return Ok(match op {
            CmpOp::Lt => !*l & *r,
            CmpOp::Le => *l <= *r,
            CmpOp::Gt => *l & !*r,
            CmpOp::Ge => *l >= *r,
            CmpOp::Eq | CmpOp::Ne => false,
        });
    }

    let l = left.to_double()?;
    let r = right.to_double()?;
    Ok(match op {
        CmpOp::Lt => l < r,
        CmpOp::Le => l <= r,
        CmpOp::Gt => l > r,
        CmpOp::Ge => l >= r,
        CmpOp::Eq | CmpOp::Ne => false,
    })
}

// ── Two-phase building ─────────────────────────────────────────────────

/// Mutable accumulation buffer feeding an immutable [`Series`].
///
/// Typed accumulators keep primitive storage; pushing a null or a
/// foreign-typed value widens the buffer to boxed storage. `build`
/// consumes the builder, so a frozen buffer cannot be appended to.
#[derive(Debug, Clone, Default)]
pub enum SeriesBuilder {
    #[default]
    Empty,
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
    Boxed(Vec<Value>),
}

impl SeriesBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::Empty
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Int(d) => d.len(),
            Self::Long(d) => d.len(),
            Self::Float(d) => d.len(),
            Self::Double(d) => d.len(),
            Self::Bool(d) => d.len(),
            Self::Boxed(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_int(&mut self, value: i32) {
        match self {
            Self::Empty => *self = Self::Int(vec![value]),
            Self::Int(d) => d.push(value),
            _ => self.push_value(Value::Int(value)),
        }
    }

    pub fn push_long(&mut self, value: i64) {
        match self {
            Self::Empty => *self = Self::Long(vec![value]),
            Self::Long(d) => d.push(value),
            _ => self.push_value(Value::Long(value)),
        }
    }

    pub fn push_float(&mut self, value: f32) {
        match self {
            Self::Empty => *self = Self::Float(vec![value]),
            Self::Float(d) => d.push(value),
            _ => self.push_value(Value::Float(value)),
        }
    }

    pub fn push_double(&mut self, value: f64) {
        match self {
            Self::Empty => *self = Self::Double(vec![value]),
            Self::Double(d) => d.push(value),
            _ => self.push_value(Value::Double(value)),
        }
    }

    pub fn push_bool(&mut self, value: bool) {
        match self {
            Self::Empty => *self = Self::Bool(vec![value]),
            Self::Bool(d) => d.push(value),
            _ => self.push_value(Value::Bool(value)),
        }
    }

    pub fn push_null(&mut self) {
        self.push_value(Value::Null);
    }

    /// Push any boxed value, widening a typed buffer when the value does
    /// not fit its element type.
    pub fn push_value(&mut self, value: Value) {
        match (&mut *self, &value) {
            (Self::Int(d), Value::Int(v)) => {
                d.push(*v);
                return;
            }
            (Self::Long(d), Value::Long(v)) => {
                d.push(*v);
                return;
            }
            (Self::Float(d), Value::Float(v)) => {
                d.push(*v);
                return;
            }
            (Self::Double(d), Value::Double(v)) => {
                d.push(*v);
                return;
            }
            (Self::Bool(d), Value::Bool(v)) => {
                d.push(*v);
                return;
            }
            (Self::Boxed(d), _) => {
                d.push(value);
                return;
            }
            (Self::Empty, _) => match value {
                Value::Int(v) => *self = Self::Int(vec![v]),
                Value::Long(v) => *self = Self::Long(vec![v]),
                Value::Float(v) => *self = Self::Float(vec![v]),
                Value::Double(v) => *self = Self::Double(vec![v]),
                Value::Bool(v) => *self = Self::Bool(vec![v]),
                other => *self = Self::Boxed(vec![other]),
            },
            _ => {
                self.widen_to_boxed();
                if let Self::Boxed(d) = self {
                    d.push(value);
                }
            }
        }
    }

    fn widen_to_boxed(&mut self) {
        let widened = match std::mem::take(self) {
            Self::Empty => Vec::new(),
            Self::Int(d) => d.into_iter().map(Value::Int).collect(),
            Self::Long(d) => d.into_iter().map(Value::Long).collect(),
            Self::Float(d) => d.into_iter().map(Value::Float).collect(),
            Self::Double(d) => d.into_iter().map(Value::Double).collect(),
            Self::Bool(d) => d.into_iter().map(Value::Bool).collect(),
            Self::Boxed(d) => d,
        };
        *self = Self::Boxed(widened);
    }

    /// Freeze the buffer into an immutable series, consuming the builder.
    #[must_use]
    pub fn build(self) -> Series {
        match self {
            Self::Empty => Series::of_values(Vec::new()),
            Self::Int(d) => Series::of_int(d),
            Self::Long(d) => Series::of_long(d),
            Self::Float(d) => Series::of_float(d),
            Self::Double(d) => Series::of_double(d),
            Self::Bool(d) => Series::of_bool(d),
            Self::Boxed(d) => Series::of_values(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_types::Value;

    use super::{ArithOp, CmpOp, Series, SeriesBuilder, SeriesError, SeriesKind};

    #[test]
    fn select_with_gaps_widens_primitive_to_boxed() {
        let series = Series::of_int(vec![10, 20, 30]);
        let out = series.select(&[2, -1, 0]).expect("select");

        assert_eq!(out.len(), 3);
        assert_eq!(out.value(0), Some(Value::Int(30)));
        assert_eq!(out.value(1), Some(Value::Null));
        assert_eq!(out.value(2), Some(Value::Int(10)));
        assert_eq!(out.materialize().kind(), SeriesKind::Boxed);
    }

    #[test]
    fn select_without_gaps_stays_primitive() {
        let series = Series::of_int(vec![10, 20, 30]);
        let out = series.select(&[1, 1, 2]).expect("select");
        assert_eq!(out.materialize().kind(), SeriesKind::Int);
        assert_eq!(out.value(0), Some(Value::Int(20)));
    }

    #[test]
    fn select_rejects_positions_past_the_end() {
        let series = Series::of_int(vec![1, 2]);
        let err = series.select(&[0, 2]).expect_err("must fail");
        assert_eq!(
            err,
            SeriesError::PositionOutOfBounds {
                position: 2,
                len: 2
            }
        );
    }

    #[test]
    fn select_preserves_length_for_gap_free_selectors() {
        let series = Series::of_double(vec![1.0, 2.0, 3.0, 4.0]);
        let positions = vec![3, 0, 0, 2, 1];
        let out = series.select(&positions).expect("select");
        assert_eq!(out.len(), positions.len());
    }

    #[test]
    fn concat_with_empty_others_is_identity() {
        let series = Series::of_long(vec![1, 2, 3]);
        let empty = Series::of_long(Vec::new());
        let out = series.concat(&[&empty]);
        assert_eq!(out, series);
        assert_eq!(out.kind(), SeriesKind::Long);
    }

    #[test]
    fn concat_same_kind_stays_primitive() {
        let a = Series::of_int(vec![1, 2]);
        let b = Series::of_int(vec![3]);
        let out = a.concat(&[&b]);
        assert_eq!(out.kind(), SeriesKind::Int);
        assert_eq!(out, Series::of_int(vec![1, 2, 3]));
    }

    #[test]
    fn concat_mixed_kinds_widens_to_boxed() {
        let a = Series::of_int(vec![1]);
        let b = Series::of_values(vec![Value::Str("x".into()), Value::Null]);
        let out = a.concat(&[&b]);
        assert_eq!(out.kind(), SeriesKind::Boxed);
        assert_eq!(out.value(1), Some(Value::Str("x".into())));
        assert_eq!(out.value(2), Some(Value::Null));
    }

    #[test]
    fn unique_preserves_first_occurrence_order() {
        let series = Series::of_values(vec![
            Value::Str("b".into()),
            Value::Str("a".into()),
            Value::Str("b".into()),
            Value::Null,
            Value::Str("a".into()),
            Value::Null,
        ]);
        let out = series.unique();
        assert_eq!(
            out,
            Series::of_values(vec![
                Value::Str("b".into()),
                Value::Str("a".into()),
                Value::Null
            ])
        );
    }

    #[test]
    fn index_where_returns_matching_positions() {
        let series = Series::of_int(vec![5, 1, 7, 3]);
        let positions = series.index_where(|v| matches!(v, Value::Int(n) if *n > 2));
        assert_eq!(positions, vec![0, 2, 3]);
    }

    #[test]
    fn replace_requires_equal_length_mask() {
        let series = Series::of_int(vec![1, 2, 3]);
        let mask = Series::of_bool(vec![true, false]);
        let err = series.replace(&mask, &Value::Int(0)).expect_err("must fail");
        assert_eq!(err, SeriesError::LengthMismatch { left: 3, right: 2 });
    }

    #[test]
    fn replace_keeps_primitive_kind_for_matching_scalar() {
        let series = Series::of_int(vec![1, 2, 3]);
        let mask = Series::of_bool(vec![false, true, false]);
        let out = series.replace(&mask, &Value::Int(0)).expect("replace");
        assert_eq!(out.kind(), SeriesKind::Int);
        assert_eq!(out, Series::of_int(vec![1, 0, 3]));
    }

    #[test]
    fn replace_with_null_widens() {
        let series = Series::of_int(vec![1, 2]);
        let mask = Series::of_bool(vec![true, false]);
        let out = series.replace(&mask, &Value::Null).expect("replace");
        assert_eq!(out.value(0), Some(Value::Null));
        assert_eq!(out.value(1), Some(Value::Int(2)));
    }

    #[test]
    fn fill_nulls_variants() {
        let series = Series::of_values(vec![
            Value::Null,
            Value::Int(2),
            Value::Null,
            Value::Int(4),
            Value::Null,
        ]);

        let fixed = series.fill_nulls(&Value::Int(0));
        assert_eq!(
            fixed,
            Series::of_values(vec![
                Value::Int(0),
                Value::Int(2),
                Value::Int(0),
                Value::Int(4),
                Value::Int(0)
            ])
        );

        let forward = series.fill_nulls_forward();
        assert_eq!(forward.value(0), Some(Value::Null));
        assert_eq!(forward.value(2), Some(Value::Int(2)));
        assert_eq!(forward.value(4), Some(Value::Int(4)));

        let backward = series.fill_nulls_backward();
        assert_eq!(backward.value(0), Some(Value::Int(2)));
        assert_eq!(backward.value(2), Some(Value::Int(4)));
        assert_eq!(backward.value(4), Some(Value::Null));
    }

    #[test]
    fn primitive_arith_fast_path_keeps_kind() {
        let a = Series::of_int(vec![10, 21]);
        let b = Series::of_int(vec![3, 7]);

        let add = a.arith(&b, ArithOp::Add).expect("add");
        assert_eq!(add, Series::of_int(vec![13, 28]));
        assert_eq!(add.kind(), SeriesKind::Int);

        // Integer division truncates on the primitive path.
        let div = a.arith(&b, ArithOp::Div).expect("div");
        assert_eq!(div, Series::of_int(vec![3, 3]));

        let rem = a.arith(&b, ArithOp::Rem).expect("rem");
        assert_eq!(rem, Series::of_int(vec![1, 0]));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let a = Series::of_int(vec![1]);
        let b = Series::of_int(vec![0]);
        let err = a.arith(&b, ArithOp::Div).expect_err("must fail");
        assert_eq!(err, SeriesError::DivisionByZero);
    }

    #[test]
    fn mixed_arith_falls_back_to_boxed_with_promotion() {
        let a = Series::of_int(vec![1, 2]);
        let b = Series::of_double(vec![0.5, 1.5]);
        let out = a.arith(&b, ArithOp::Add).expect("add");
        assert_eq!(out.kind(), SeriesKind::Boxed);
        assert_eq!(out.value(0), Some(Value::Double(1.5)));
        assert_eq!(out.value(1), Some(Value::Double(3.5)));
    }

    #[test]
    fn boxed_arith_propagates_nulls() {
        let a = Series::of_values(vec![Value::Int(1), Value::Null, Value::Int(3)]);
        let b = Series::of_int(vec![10, 20, 30]);
        let out = a.arith(&b, ArithOp::Add).expect("add");
        assert_eq!(out.value(0), Some(Value::Int(11)));
        assert_eq!(out.value(1), Some(Value::Null));
        assert_eq!(out.value(2), Some(Value::Int(33)));
    }

    #[test]
    fn arith_requires_equal_lengths() {
        let a = Series::of_int(vec![1, 2]);
        let b = Series::of_int(vec![1]);
        let err = a.arith(&b, ArithOp::Add).expect_err("must fail");
        assert_eq!(err, SeriesError::LengthMismatch { left: 2, right: 1 });
    }

    #[test]
    fn comparisons_with_null_ordering_are_false() {
        let a = Series::of_values(vec![Value::Int(1), Value::Null]);
        let b = Series::of_int(vec![0, 5]);
        let out = a.compare(&b, CmpOp::Gt).expect("cmp");
        assert_eq!(out, Series::of_bool(vec![true, false]));
    }

    #[test]
    fn eq_treats_null_pairs_as_equal() {
        let a = Series::of_values(vec![Value::Null, Value::Int(1)]);
        let b = Series::of_values(vec![Value::Null, Value::Null]);
        let out = a.eq_series(&b).expect("eq");
        assert_eq!(out, Series::of_bool(vec![true, false]));
    }

    #[test]
    fn compare_value_against_scalar() {
        let series = Series::of_int(vec![1, 5, 3]);
        let out = series
            .compare_value(&Value::Int(3), CmpOp::Ge)
            .expect("cmp");
        assert_eq!(out, Series::of_bool(vec![false, true, true]));
    }

    #[test]
    fn copy_to_int_requires_matching_kind() {
        let series = Series::of_double(vec![1.0]);
        let mut target = [0_i32; 1];
        let err = series
            .copy_to_int(&mut target, 0, 0, 1)
            .expect_err("must fail");
        assert!(matches!(err, SeriesError::KindMismatch { .. }));
    }

    #[test]
    fn copy_to_transfers_boxed_values_at_offset() {
        let series = Series::of_int(vec![7, 8]);
        let mut target = vec![Value::Null; 4];
        series.copy_to(&mut target, 0, 1, 2).expect("copy");
        assert_eq!(target[0], Value::Null);
        assert_eq!(target[1], Value::Int(7));
        assert_eq!(target[2], Value::Int(8));
        assert_eq!(target[3], Value::Null);
    }

    #[test]
    fn reductions_over_empty_or_all_null_input_are_null() {
        let empty = Series::of_int(Vec::new());
        assert_eq!(empty.sum().expect("sum"), Value::Null);
        assert_eq!(empty.min().expect("min"), Value::Null);
        assert_eq!(empty.max().expect("max"), Value::Null);
        assert_eq!(empty.avg().expect("avg"), Value::Null);
        assert_eq!(empty.median().expect("median"), Value::Null);

        let nulls = Series::of_values(vec![Value::Null, Value::Null]);
        assert_eq!(nulls.sum().expect("sum"), Value::Null);
        assert_eq!(nulls.count_non_null(), 0);
        assert_eq!(nulls.concat_values(";"), Value::Null);
    }

    #[test]
    fn sum_skips_nulls_and_promotes() {
        let ints = Series::of_values(vec![Value::Int(1), Value::Null, Value::Int(2)]);
        assert_eq!(ints.sum().expect("sum"), Value::Long(3));

        let mixed = Series::of_values(vec![Value::Int(1), Value::Double(0.5)]);
        assert_eq!(mixed.sum().expect("sum"), Value::Double(1.5));
    }

    #[test]
    fn min_max_preserve_element_type() {
        let series = Series::of_values(vec![Value::Int(5), Value::Null, Value::Int(2)]);
        assert_eq!(series.min().expect("min"), Value::Int(2));
        assert_eq!(series.max().expect("max"), Value::Int(5));
    }

    #[test]
    fn median_even_and_odd_counts() {
        let odd = Series::of_double(vec![3.0, 1.0, 2.0]);
        assert_eq!(odd.median().expect("median"), Value::Double(2.0));

        let even = Series::of_double(vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(even.median().expect("median"), Value::Double(2.5));
    }

    #[test]
    fn concat_values_skips_nulls() {
        let series = Series::of_values(vec![
            Value::Str("x".into()),
            Value::Null,
            Value::Str("z".into()),
        ]);
        assert_eq!(series.concat_values(";"), Value::Str("x;z".into()));
    }

    #[test]
    fn builder_keeps_typed_storage_until_widened() {
        let mut builder = SeriesBuilder::new();
        builder.push_int(1);
        builder.push_int(2);
        assert_eq!(builder.clone().build().kind(), SeriesKind::Int);

        builder.push_null();
        builder.push_int(3);
        let series = builder.build();
        assert_eq!(series.kind(), SeriesKind::Boxed);
        assert_eq!(series.value(2), Some(Value::Null));
        assert_eq!(series.value(3), Some(Value::Int(3)));
    }

    #[test]
    fn builder_is_consumed_by_build() {
        let mut builder = SeriesBuilder::new();
        builder.push_double(1.5);
        let series = builder.build();
        assert_eq!(series, Series::of_double(vec![1.5]));
        // `builder` is moved; a new buffer starts empty.
        let fresh = SeriesBuilder::new().build();
        assert!(fresh.is_empty());
    }

    #[test]
    fn materialize_of_a_view_is_dense_and_repeatable() {
        let series = Series::of_int(vec![1, 2, 3]);
        let view = series.select(&[2, 0]).expect("select");
        let first = view.materialize();
        let second = view.materialize();
        assert_eq!(first.kind(), SeriesKind::Int);
        assert_eq!(first, Series::of_int(vec![3, 1]));
        assert_eq!(first, second);
    }

    #[test]
    fn nan_equality_does_not_depend_on_storage_kind() {
        let primitive = Series::of_double(vec![f64::NAN, 1.0]);
        let boxed = Series::of_values(vec![Value::Double(f64::NAN), Value::Double(1.0)]);

        let fast = primitive.eq_series(&primitive).expect("eq");
        let slow = boxed.eq_series(&boxed).expect("eq");
        assert_eq!(fast, Series::of_bool(vec![true, true]));
        assert_eq!(fast, slow);

        let ne = primitive.ne_series(&primitive).expect("ne");
        assert_eq!(ne, Series::of_bool(vec![false, false]));

        // Ordering against NaN stays false on both paths.
        let lt = primitive.compare(&primitive, CmpOp::Lt).expect("lt");
        assert_eq!(lt, Series::of_bool(vec![false, false]));
    }

    #[test]
    fn map_keeps_primitive_storage_for_uniform_results() {
        let series = Series::of_int(vec![1, 2, 3]);
        let doubled = series.map(|v| match v {
            Value::Int(n) => Value::Int(n * 2),
            other => other.clone(),
        });
        assert_eq!(doubled.kind(), SeriesKind::Int);
        assert_eq!(doubled, Series::of_int(vec![2, 4, 6]));
    }

    #[test]
    fn map_to_mixed_results_widens_to_boxed() {
        let series = Series::of_values(vec![Value::Int(1), Value::Null, Value::Int(200)]);
        let flagged = series.map(|v| match v {
            Value::Int(n) if *n > 100 => Value::Str("big".into()),
            other => other.clone(),
        });
        assert_eq!(flagged.kind(), SeriesKind::Boxed);
        assert_eq!(
            flagged,
            Series::of_values(vec![
                Value::Int(1),
                Value::Null,
                Value::Str("big".into())
            ])
        );
    }

    #[test]
    fn view_of_view_materializes_through() {
        let base = Series::of_int(vec![1, 2, 3, 4]);
        let first = base.select(&[3, 2, 1, 0]).expect("first");
        let second = first.select(&[0, -1, 3]).expect("second");
        assert_eq!(second.value(0), Some(Value::Int(4)));
        assert_eq!(second.value(1), Some(Value::Null));
        assert_eq!(second.value(2), Some(Value::Int(1)));
        assert_eq!(second.materialize().kind(), SeriesKind::Boxed);
    }
}
