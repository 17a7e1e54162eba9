//! Core value and row types.
//!
//! Rows carry values of the four wire types only. Timestamps travel as
//! [`Value::Text`] in RFC 3339 nanosecond form and are parsed at the sites
//! that need an instant (window boundaries, predicate evaluation).

use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::plan::FieldType;
use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single field value flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Float values hash by bit pattern so NaN and -0.0 stay deterministic.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float64(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl Value {
    /// The wire type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Bool(_) => FieldType::Boolean,
            Value::Int64(_) => FieldType::Integer64,
            Value::Float64(_) => FieldType::Float64,
            Value::Text(_) => FieldType::Text,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.field_type().as_str()
    }

    /// Strictly parse one raw ingress token by field type. Empty tokens and
    /// malformed numerics/booleans are rejected with the field name and the
    /// raw value attached.
    pub fn parse_token(token: &str, field_type: FieldType, field_name: &str) -> EngineResult<Self> {
        if token.is_empty() {
            return Err(EngineError::parse_error(field_name, token, "empty field"));
        }
        match field_type {
            FieldType::Text => Ok(Value::Text(token.to_string())),
            FieldType::Boolean => token.parse::<bool>().map(Value::Bool).map_err(|_| {
                EngineError::parse_error(field_name, token, "expected 'true' or 'false'")
            }),
            FieldType::Integer64 => token
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| EngineError::parse_error(field_name, token, "invalid integer")),
            FieldType::Float64 => token
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|_| EngineError::parse_error(field_name, token, "invalid float")),
        }
    }

    /// Coerce a value to a declared output type. Semantics follow the
    /// render-then-reparse rule of the aggregate output path: a Float64
    /// with no fractional part converts to Integer64, anything lossy fails.
    pub fn coerce_to(&self, target: FieldType) -> EngineResult<Value> {
        match (self, target) {
            (Value::Bool(b), FieldType::Boolean) => Ok(Value::Bool(*b)),
            (Value::Int64(i), FieldType::Integer64) => Ok(Value::Int64(*i)),
            (Value::Float64(f), FieldType::Float64) => Ok(Value::Float64(*f)),
            (Value::Text(s), FieldType::Text) => Ok(Value::Text(s.clone())),

            (Value::Int64(i), FieldType::Float64) => Ok(Value::Float64(*i as f64)),
            (Value::Float64(f), FieldType::Integer64) => {
                if f.fract() == 0.0 && f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64
                {
                    Ok(Value::Int64(*f as i64))
                } else {
                    Err(EngineError::conversion(format!(
                        "cannot convert float {} to integer64",
                        f
                    )))
                }
            }

            (Value::Text(s), FieldType::Boolean) => s.parse::<bool>().map(Value::Bool).map_err(
                |_| EngineError::conversion(format!("cannot convert text '{}' to boolean", s)),
            ),
            (Value::Text(s), FieldType::Integer64) => s.parse::<i64>().map(Value::Int64).map_err(
                |_| EngineError::conversion(format!("cannot convert text '{}' to integer64", s)),
            ),
            (Value::Text(s), FieldType::Float64) => s.parse::<f64>().map(Value::Float64).map_err(
                |_| EngineError::conversion(format!("cannot convert text '{}' to float64", s)),
            ),

            (value, FieldType::Text) => Ok(Value::Text(value.to_string())),

            (value, target) => Err(EngineError::conversion(format!(
                "cannot convert {} value {} to {}",
                value.type_name(),
                value,
                target.as_str()
            ))),
        }
    }

    /// Numeric view for Int64/Float64 promotion; None for bool/text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse an RFC 3339 nanosecond-precision timestamp carried in a text field.
pub fn parse_rfc3339(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::conversion(format!("invalid RFC 3339 timestamp '{}': {}", raw, e)))
}

/// Ordered tuple of grouping-field values, computed at ingress and carried
/// unchanged by every downstream row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Group {
    values: Vec<Value>,
}

impl Group {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Row produced by the ingress operator: full ingress payload plus group.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRow {
    pub group: Group,
    pub payload: Vec<Value>,
}

/// Row produced at window close: one payload value per aggregate output
/// field, group preserved from the last input row.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub group: Group,
    pub payload: Vec<Value>,
}

/// Row surfaced to the sink after projection.
#[derive(Debug, Clone, PartialEq)]
pub struct EgressRow {
    pub group: Group,
    pub payload: Vec<Value>,
}
