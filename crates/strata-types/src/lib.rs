#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of column element types.
///
/// `Int`/`Long`/`Float`/`Double`/`Bool` columns have primitive-specialized
/// storage and never hold nulls; `Str` values only live in boxed storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Long,
    Float,
    Double,
    Str,
}

impl ValueType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Float | Self::Double)
    }
}

/// A boxed scalar with a logical null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Value {
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int(_) => Some(ValueType::Int),
            Self::Long(_) => Some(ValueType::Long),
            Self::Float(_) => Some(ValueType::Float),
            Self::Double(_) => Some(ValueType::Double),
            Self::Str(_) => Some(ValueType::Str),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// NaN-aware equality: two NaNs of any float width compare equal,
    /// and numerically equal values of different widths compare equal.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Double(a), Self::Double(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (a, b) if a == b => true,
            (a, b) => match (a.to_double(), b.to_double()) {
                (Ok(x), Ok(y)) => (x.is_nan() && y.is_nan()) || x == y,
                _ => false,
            },
        }
    }

    pub fn to_double(&self) -> Result<f64, TypeError> {
        match self {
            Self::Int(v) => Ok(f64::from(*v)),
            Self::Long(v) => Ok(*v as f64),
            Self::Float(v) => Ok(f64::from(*v)),
            Self::Double(v) => Ok(*v),
            Self::Null => Err(TypeError::NullValue),
            other => Err(TypeError::NonNumeric {
                value_type: other.value_type(),
            }),
        }
    }

    pub fn to_long(&self) -> Result<i64, TypeError> {
        match self {
            Self::Int(v) => Ok(i64::from(*v)),
            Self::Long(v) => Ok(*v),
            Self::Null => Err(TypeError::NullValue),
            other => Err(TypeError::NonNumeric {
                value_type: other.value_type(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i32, TypeError> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Null => Err(TypeError::NullValue),
            other => Err(TypeError::Incompatible {
                left: other.value_type(),
                right: Some(ValueType::Int),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::Null => Err(TypeError::NullValue),
            other => Err(TypeError::Incompatible {
                left: other.value_type(),
                right: Some(ValueType::Bool),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeError> {
        match self {
            Self::Str(v) => Ok(v),
            Self::Null => Err(TypeError::NullValue),
            other => Err(TypeError::Incompatible {
                left: other.value_type(),
                right: Some(ValueType::Str),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("value of type {value_type:?} is not numeric")]
    NonNumeric { value_type: Option<ValueType> },
    #[error("no common type for {left:?} and {right:?}")]
    Incompatible {
        left: Option<ValueType>,
        right: Option<ValueType>,
    },
    #[error("value is null")]
    NullValue,
}

/// Numeric promotion for binary arithmetic.
///
/// Same type maps to itself; `Int`/`Long` mix to `Long`; any mix of the
/// integer and float families (or `Float` with `Double`) promotes to
/// `Double`. `Bool` and `Str` are not numeric.
pub fn common_numeric_type(left: ValueType, right: ValueType) -> Result<ValueType, TypeError> {
    use ValueType::{Double, Float, Int, Long};

    if !left.is_numeric() || !right.is_numeric() {
        let bad = if left.is_numeric() { right } else { left };
        return Err(TypeError::NonNumeric {
            value_type: Some(bad),
        });
    }

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Int, Long) | (Long, Int) => Long,
        (Float, Double) | (Double, Float) => Double,
        // Integer-family with float-family widens all the way to Double.
        _ => Double,
    };

    Ok(out)
}

// ── Hash-key normal form ───────────────────────────────────────────────

/// Eq + Hash normal form of a [`Value`], used for hash-join and group-by
/// keys. Float keys are canonicalized by bit pattern so that all NaN
/// payloads collide and `-0.0` groups with `0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HashKey {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    FloatBits(u32),
    DoubleBits(u64),
    Str(String),
    Combination(Vec<HashKey>),
}

fn canonical_f32_bits(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else if v == 0.0 {
        0.0_f32.to_bits()
    } else {
        v.to_bits()
    }
}

fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0_f64.to_bits()
    } else {
        v.to_bits()
    }
}

impl HashKey {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            Value::Long(v) => Self::Long(*v),
            Value::Float(v) => Self::FloatBits(canonical_f32_bits(*v)),
            Value::Double(v) => Self::DoubleBits(canonical_f64_bits(*v)),
            Value::Str(v) => Self::Str(v.clone()),
        }
    }

    /// Combination key for composite hashers. Flattens nested
    /// combinations so `(a and b) and c` equals `a and (b and c)`.
    #[must_use]
    pub fn combine(parts: Vec<HashKey>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Self::Combination(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::Combination(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::{HashKey, TypeError, Value, ValueType, common_numeric_type};

    #[test]
    fn numeric_promotion_follows_lattice() {
        assert_eq!(
            common_numeric_type(ValueType::Int, ValueType::Int).expect("int+int"),
            ValueType::Int
        );
        assert_eq!(
            common_numeric_type(ValueType::Int, ValueType::Long).expect("int+long"),
            ValueType::Long
        );
        assert_eq!(
            common_numeric_type(ValueType::Float, ValueType::Float).expect("float+float"),
            ValueType::Float
        );
        assert_eq!(
            common_numeric_type(ValueType::Long, ValueType::Float).expect("long+float"),
            ValueType::Double
        );
        assert_eq!(
            common_numeric_type(ValueType::Float, ValueType::Double).expect("float+double"),
            ValueType::Double
        );
    }

    #[test]
    fn promotion_rejects_non_numeric_operands() {
        let err = common_numeric_type(ValueType::Str, ValueType::Int).expect_err("must fail");
        assert_eq!(
            err,
            TypeError::NonNumeric {
                value_type: Some(ValueType::Str)
            }
        );
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        assert!(Value::Double(f64::NAN).semantic_eq(&Value::Double(f64::NAN)));
        assert!(Value::Float(f32::NAN).semantic_eq(&Value::Float(f32::NAN)));
        assert!(!Value::Double(f64::NAN).semantic_eq(&Value::Double(1.0)));
    }

    #[test]
    fn semantic_eq_bridges_numeric_widths() {
        assert!(Value::Int(3).semantic_eq(&Value::Long(3)));
        assert!(Value::Long(3).semantic_eq(&Value::Double(3.0)));
        assert!(!Value::Int(3).semantic_eq(&Value::Str("3".to_owned())));
    }

    #[test]
    fn to_double_rejects_null_and_strings() {
        assert_eq!(Value::Null.to_double(), Err(TypeError::NullValue));
        assert!(matches!(
            Value::Str("x".to_owned()).to_double(),
            Err(TypeError::NonNumeric { .. })
        ));
        assert_eq!(Value::Int(2).to_double(), Ok(2.0));
    }

    #[test]
    fn hash_key_canonicalizes_float_bits() {
        let nan_a = HashKey::of(&Value::Double(f64::NAN));
        let nan_b = HashKey::of(&Value::Double(-f64::NAN));
        assert_eq!(nan_a, nan_b);

        let zero = HashKey::of(&Value::Double(0.0));
        let neg_zero = HashKey::of(&Value::Double(-0.0));
        assert_eq!(zero, neg_zero);
    }

    #[test]
    fn combination_keys_flatten() {
        let a = HashKey::of(&Value::Int(1));
        let b = HashKey::of(&Value::Str("x".to_owned()));
        let c = HashKey::of(&Value::Int(2));

        let left_nested = HashKey::combine(vec![
            HashKey::combine(vec![a.clone(), b.clone()]),
            c.clone(),
        ]);
        let right_nested = HashKey::combine(vec![a, HashKey::combine(vec![b, c])]);
        assert_eq!(left_nested, right_nested);
    }

    #[test]
    fn value_serde_round_trip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Long(1 << 40),
            Value::Double(2.5),
            Value::Str("abc".to_owned()),
        ];
        for value in values {
            let json = serde_json::to_string(&value).expect("serialize");
            let back: Value = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(value, back);
        }
    }
}
