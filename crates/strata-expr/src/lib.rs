#![forbid(unsafe_code)]

use strata_frame::{DataFrame, FrameError};
use strata_series::{ArithOp, CmpOp, Series, SeriesError, SeriesKind};
use strata_types::{TypeError, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("column position must be non-negative, got {position}")]
    NegativePosition { position: i64 },
    #[error("expression '{name}' does not support scalar reduction")]
    ReduceUnsupported { name: String },
    #[error("condition column '{name}' is not a Bool series, found {actual:?}")]
    NonBoolColumn { name: String, actual: SeriesKind },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// A column reference, by label or by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColRef {
    Name(String),
    Pos(usize),
}

impl ColRef {
    fn resolve<'a>(&self, frame: &'a DataFrame) -> Result<&'a Series, ExprError> {
        match self {
            Self::Name(label) => Ok(frame.column(label)?),
            Self::Pos(pos) => Ok(frame.column_at(*pos)?),
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Name(label) => label.clone(),
            Self::Pos(pos) => format!("col({pos})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Min,
    Max,
    Avg,
    Median,
    Count,
    First,
    Concat,
}

impl AggFunc {
    fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Median => "median",
            Self::Count => "count",
            Self::First => "first",
            Self::Concat => "concat",
        }
    }
}

/// A stateless, reusable expression tree node.
///
/// Evaluation is vectorized: `eval` produces a whole series per call,
/// routing arithmetic through the series kernels so matching primitive
/// operands take the specialized path. `reduce` is the parallel scalar
/// evaluation used by aggregations.
#[derive(Debug, Clone, PartialEq)]
pub enum Exp {
    Col(ColRef),
    Val(Value),
    Neg(Box<Exp>),
    Arith {
        op: ArithOp,
        left: Box<Exp>,
        right: Box<Exp>,
    },
    Agg {
        func: AggFunc,
        arg: Box<Exp>,
        separator: Option<String>,
    },
}

#[must_use]
pub fn col(label: &str) -> Exp {
    Exp::Col(ColRef::Name(label.to_string()))
}

/// Positional column reference. Negative positions are illegal.
pub fn col_at(position: i64) -> Result<Exp, ExprError> {
    if position < 0 {
        return Err(ExprError::NegativePosition { position });
    }
    Ok(Exp::Col(ColRef::Pos(position as usize)))
}

#[must_use]
pub fn val(value: Value) -> Exp {
    Exp::Val(value)
}

impl Exp {
    #[must_use]
    pub fn add(self, other: Exp) -> Exp {
        self.arith_with(ArithOp::Add, other)
    }

    #[must_use]
    pub fn sub(self, other: Exp) -> Exp {
        self.arith_with(ArithOp::Sub, other)
    }

    #[must_use]
    pub fn mul(self, other: Exp) -> Exp {
        self.arith_with(ArithOp::Mul, other)
    }

    #[must_use]
    pub fn div(self, other: Exp) -> Exp {
        self.arith_with(ArithOp::Div, other)
    }

    #[must_use]
    pub fn rem(self, other: Exp) -> Exp {
        self.arith_with(ArithOp::Rem, other)
    }

    fn arith_with(self, op: ArithOp, other: Exp) -> Exp {
        Exp::Arith {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn neg(self) -> Exp {
        Exp::Neg(Box::new(self))
    }

    #[must_use]
    pub fn sum(self) -> Exp {
        self.agg_with(AggFunc::Sum, None)
    }

    #[must_use]
    pub fn min(self) -> Exp {
        self.agg_with(AggFunc::Min, None)
    }

    #[must_use]
    pub fn max(self) -> Exp {
        self.agg_with(AggFunc::Max, None)
    }

    #[must_use]
    pub fn avg(self) -> Exp {
        self.agg_with(AggFunc::Avg, None)
    }

    #[must_use]
    pub fn median(self) -> Exp {
        self.agg_with(AggFunc::Median, None)
    }

    #[must_use]
    pub fn count(self) -> Exp {
        self.agg_with(AggFunc::Count, None)
    }

    #[must_use]
    pub fn first(self) -> Exp {
        self.agg_with(AggFunc::First, None)
    }

    /// Null-skipping string join with a separator.
    #[must_use]
    pub fn concat(self, separator: &str) -> Exp {
        self.agg_with(AggFunc::Concat, Some(separator.to_string()))
    }

    fn agg_with(self, func: AggFunc, separator: Option<String>) -> Exp {
        Exp::Agg {
            func,
            arg: Box::new(self),
            separator,
        }
    }

    // ── Condition builders ─────────────────────────────────────────────

    #[must_use]
    pub fn eq(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Eq, other)
    }

    #[must_use]
    pub fn ne(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Ne, other)
    }

    #[must_use]
    pub fn lt(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Lt, other)
    }

    #[must_use]
    pub fn le(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Le, other)
    }

    #[must_use]
    pub fn gt(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Gt, other)
    }

    #[must_use]
    pub fn ge(self, other: Exp) -> Condition {
        self.cmp_with(CmpOp::Ge, other)
    }

    fn cmp_with(self, op: CmpOp, other: Exp) -> Condition {
        Condition::Cmp {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn is_null(self) -> Condition {
        Condition::IsNull(Box::new(self))
    }

    #[must_use]
    pub fn not_null(self) -> Condition {
        Condition::NotNull(Box::new(self))
    }

    // ── Evaluation ─────────────────────────────────────────────────────

    /// Evaluate against a frame, producing a series of the frame's
    /// height. Aggregations produce a single-row series.
    pub fn eval(&self, frame: &DataFrame) -> Result<Series, ExprError> {
        match self {
            Self::Col(col_ref) => Ok(col_ref.resolve(frame)?.clone()),
            Self::Val(value) => Ok(broadcast(value, frame.height())),
            Self::Neg(child) => negate(&child.eval(frame)?),
            Self::Arith { op, left, right } => {
                let l = left.eval(frame)?;
                let r = right.eval(frame)?;
                Ok(l.arith(&r, *op)?)
            }
            Self::Agg { .. } => {
                let value = self.reduce(frame)?;
                Ok(Series::of_values(vec![value]))
            }
        }
    }

    /// Evaluate against a bare series. A column reference resolves to
    /// the series itself.
    pub fn eval_series(&self, series: &Series) -> Result<Series, ExprError> {
        match self {
            Self::Col(_) => Ok(series.clone()),
            Self::Val(value) => Ok(broadcast(value, series.len())),
            Self::Neg(child) => negate(&child.eval_series(series)?),
            Self::Arith { op, left, right } => {
                let l = left.eval_series(series)?;
                let r = right.eval_series(series)?;
                Ok(l.arith(&r, *op)?)
            }
            Self::Agg {
                func,
                arg,
                separator,
            } => {
                let input = arg.eval_series(series)?;
                let value = apply_agg(*func, &input, separator.as_deref())?;
                Ok(Series::of_values(vec![value]))
            }
        }
    }

    /// Fold to a single scalar. Only aggregation nodes support this;
    /// anything else fails naming the offending expression.
    pub fn reduce(&self, frame: &DataFrame) -> Result<Value, ExprError> {
        match self {
            Self::Agg {
                func,
                arg,
                separator,
            } => {
                let input = arg.eval(frame)?;
                apply_agg(*func, &input, separator.as_deref())
            }
            other => Err(ExprError::ReduceUnsupported { name: other.name() }),
        }
    }

    /// Human-readable form, used in error messages and display names.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Col(col_ref) => col_ref.name(),
            Self::Val(value) => value.to_string(),
            Self::Neg(child) => format!("-{}", child.name()),
            Self::Arith { op, left, right } => {
                let symbol = match op {
                    ArithOp::Add => "+",
                    ArithOp::Sub => "-",
                    ArithOp::Mul => "*",
                    ArithOp::Div => "/",
                    ArithOp::Rem => "%",
                };
                format!("{} {} {}", left.name(), symbol, right.name())
            }
            Self::Agg { func, arg, .. } => format!("{}({})", func.name(), arg.name()),
        }
    }

    /// The underlying column label this expression targets, used to name
    /// aggregation output columns.
    #[must_use]
    pub fn column_name(&self) -> String {
        match self {
            Self::Col(col_ref) => col_ref.name(),
            Self::Neg(child) => child.column_name(),
            Self::Agg { arg, .. } => arg.column_name(),
            other => other.name(),
        }
    }
}

fn broadcast(value: &Value, height: usize) -> Series {
    match value {
        Value::Int(v) => Series::of_int(vec![*v; height]),
        Value::Long(v) => Series::of_long(vec![*v; height]),
        Value::Float(v) => Series::of_float(vec![*v; height]),
        Value::Double(v) => Series::of_double(vec![*v; height]),
        Value::Bool(v) => Series::of_bool(vec![*v; height]),
        boxed => Series::of_values(vec![boxed.clone(); height]),
    }
}

fn negate(series: &Series) -> Result<Series, ExprError> {
    match series.materialize() {
        Series::Int(d) => Ok(Series::of_int(d.iter().map(|v| v.wrapping_neg()).collect())),
        Series::Long(d) => Ok(Series::of_long(d.iter().map(|v| v.wrapping_neg()).collect())),
        Series::Float(d) => Ok(Series::of_float(d.iter().map(|v| -v).collect())),
        Series::Double(d) => Ok(Series::of_double(d.iter().map(|v| -v).collect())),
        dense => {
            let mut out = Vec::with_capacity(dense.len());
            for pos in 0..dense.len() {
                let value = dense.value(pos).unwrap_or(Value::Null);
                out.push(match value {
                    Value::Null => Value::Null,
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Long(v) => Value::Long(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    Value::Double(v) => Value::Double(-v),
                    other => {
                        return Err(SeriesError::from(TypeError::NonNumeric {
                            value_type: other.value_type(),
                        })
                        .into());
                    }
                });
            }
            Ok(Series::of_values(out))
        }
    }
}

fn apply_agg(func: AggFunc, input: &Series, separator: Option<&str>) -> Result<Value, ExprError> {
    let out = match func {
        AggFunc::Sum => input.sum()?,
        AggFunc::Min => input.min()?,
        AggFunc::Max => input.max()?,
        AggFunc::Avg => input.avg()?,
        AggFunc::Median => input.median()?,
        AggFunc::Count => Value::Long(input.count_non_null()),
        AggFunc::First => input.first(),
        AggFunc::Concat => input.concat_values(separator.unwrap_or("")),
    };
    Ok(out)
}

/// A boolean expression tree producing a gap-free Bool series.
///
/// Boolean algebra combinators are vectorized over whole series, not
/// scalar branching.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Cmp {
        op: CmpOp,
        left: Box<Exp>,
        right: Box<Exp>,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    IsNull(Box<Exp>),
    NotNull(Box<Exp>),
    BoolCol(ColRef),
}

/// Use an existing Bool column as a condition.
#[must_use]
pub fn bool_col(label: &str) -> Condition {
    Condition::BoolCol(ColRef::Name(label.to_string()))
}

impl Condition {
    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        Condition::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }

    /// Evaluate to a Bool series of the frame's height.
    pub fn eval(&self, frame: &DataFrame) -> Result<Series, ExprError> {
        match self {
            Self::Cmp { op, left, right } => {
                let l = left.eval(frame)?;
                let r = right.eval(frame)?;
                Ok(l.compare(&r, *op)?)
            }
            Self::And(left, right) => {
                let l = bool_bits(&left.eval(frame)?);
                let r = bool_bits(&right.eval(frame)?);
                Ok(Series::of_bool(
                    l.iter().zip(r.iter()).map(|(a, b)| *a && *b).collect(),
                ))
            }
            Self::Or(left, right) => {
                let l = bool_bits(&left.eval(frame)?);
                let r = bool_bits(&right.eval(frame)?);
                Ok(Series::of_bool(
                    l.iter().zip(r.iter()).map(|(a, b)| *a || *b).collect(),
                ))
            }
            Self::Not(child) => {
                let bits = bool_bits(&child.eval(frame)?);
                Ok(Series::of_bool(bits.iter().map(|b| !b).collect()))
            }
            Self::IsNull(exp) => {
                let series = exp.eval(frame)?;
                Ok(Series::of_bool(
                    (0..series.len())
                        .map(|pos| series.value(pos).is_none_or(|v| v.is_null()))
                        .collect(),
                ))
            }
            Self::NotNull(exp) => {
                let series = exp.eval(frame)?;
                Ok(Series::of_bool(
                    (0..series.len())
                        .map(|pos| series.value(pos).is_some_and(|v| !v.is_null()))
                        .collect(),
                ))
            }
            Self::BoolCol(col_ref) => {
                let column = col_ref.resolve(frame)?.materialize();
                if column.kind() != SeriesKind::Bool {
                    return Err(ExprError::NonBoolColumn {
                        name: col_ref.name(),
                        actual: column.kind(),
                    });
                }
                Ok(column)
            }
        }
    }
}

fn bool_bits(series: &Series) -> Vec<bool> {
    // Condition evaluation always yields a dense Bool series.
    match series.materialize() {
        Series::Bool(bits) => bits.to_vec(),
        dense => (0..dense.len())
            .map(|pos| matches!(dense.value(pos), Some(Value::Bool(true))))
            .collect(),
    }
}

/// Keep the rows where the condition holds.
pub fn filter(frame: &DataFrame, condition: &Condition) -> Result<DataFrame, ExprError> {
    let mask = condition.eval(frame)?;
    Ok(frame.filter_by_mask(&mask)?)
}

/// Evaluate an expression and attach it as a column, adding or
/// replacing by label.
pub fn with_column(frame: &DataFrame, label: &str, exp: &Exp) -> Result<DataFrame, ExprError> {
    let series = exp.eval(frame)?;
    Ok(frame.with_column(label, series)?)
}
