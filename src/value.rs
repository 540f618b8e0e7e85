use crate::err::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column type. Int=1, Float=2, Str=3 ( type codes per the table file format ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit signed integer, 4 bytes.
    Int,
    /// 32-bit IEEE-754 float, 4 bytes.
    Float,
    /// Fixed-length ASCII string of the declared byte length, zero padded.
    Str(usize),
}

impl DataType {
    /// Encoded size of a value of this type.
    pub fn size(self) -> usize {
        match self {
            DataType::Int | DataType::Float => 4,
            DataType::Str(len) => len,
        }
    }

    /// Type code used in the table file header.
    pub fn code(self) -> u8 {
        match self {
            DataType::Int => 1,
            DataType::Float => 2,
            DataType::Str(_) => 3,
        }
    }

    /// Inverse of [`DataType::code`]. `len` only matters for strings.
    pub fn from_code(code: u8, len: usize) -> Result<DataType> {
        match code {
            1 => Ok(DataType::Int),
            2 => Ok(DataType::Float),
            3 => Ok(DataType::Str(len)),
            _ => Err(Error::PageCorrupt(format!("unknown column type code {}", code))),
        }
    }
}

/// Runtime value. `Null` never reaches disk; it appears only in the
/// unmatched side of outer-join results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    ///
    Null,
    ///
    Int(i32),
    ///
    Float(f32),
    ///
    Str(String),
}

impl Value {
    /// The default Value for a DataType.
    pub fn default(t: DataType) -> Value {
        match t {
            DataType::Int => Value::Int(0),
            DataType::Float => Value::Float(0.0),
            DataType::Str(_) => Value::Str(String::new()),
        }
    }

    /// Convert self to the declared type of a column.
    /// Strings parse into numbers, numbers render into strings.
    pub fn coerce(&self, t: DataType) -> Result<Value> {
        let fail = || Error::SchemaMismatch(format!("cannot convert {} to {:?}", self, t));
        Ok(match (self, t) {
            (Value::Null, _) => Value::Null,
            (Value::Int(x), DataType::Int) => Value::Int(*x),
            (Value::Int(x), DataType::Float) => Value::Float(*x as f32),
            (Value::Int(x), DataType::Str(_)) => Value::Str(x.to_string()),
            (Value::Float(x), DataType::Float) => Value::Float(*x),
            (Value::Float(x), DataType::Int) => Value::Int(*x as i32),
            (Value::Float(x), DataType::Str(_)) => Value::Str(x.to_string()),
            (Value::Str(s), DataType::Str(_)) => Value::Str(s.clone()),
            (Value::Str(s), DataType::Int) => Value::Int(s.trim().parse().map_err(|_| fail())?),
            (Value::Str(s), DataType::Float) => Value::Float(s.trim().parse().map_err(|_| fail())?),
        })
    }

    /// Comparison used by predicates and joins: natural ordering for
    /// numbers ( cross-type via f64 ), case-insensitive for strings.
    /// None when the two values are not comparable ( e.g. Null ).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Int(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => {
                Some(a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()))
            }
            _ => None,
        }
    }

    /// Total ordering for sorting. Null sorts first; incomparable pairs
    /// fall back to the type rank so the sort is stable.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        match self.compare(other) {
            Some(ord) => ord,
            None => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 1,
            Value::Str(_) => 2,
        }
    }

    /// Canonical key for hash indexes and hash joins. Follows the same
    /// equality rules as [`Value::compare`]: numbers by numeric value,
    /// strings case-insensitively.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "\0null".to_string(),
            Value::Int(x) => format!("i{}", x),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() && *x >= i32::MIN as f32 && *x <= i32::MAX as f32
                {
                    format!("i{}", *x as i64)
                } else {
                    format!("f{}", x)
                }
            }
            Value::Str(s) => format!("s{}", s.to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(x) => write!(f, "{}", x),
            // Keep a decimal point so a printed float re-parses as one.
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}
