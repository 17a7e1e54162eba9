//! Stateful aggregate accumulators.
//!
//! A functor is initialized once when its aggregate operator is built,
//! updated once per input row inside a window, read at window close, and
//! reset at every window boundary. After a reset the functor is
//! indistinguishable from a freshly initialized one.

use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::types::Value;
use crate::flowstream::fql::plan::FieldType;
use hyperloglogplus::{HyperLogLog, HyperLogLogPlus};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;

/// Register exponent for the approximate-unique sketch: 2^17 registers.
const SKETCH_PRECISION: u8 = 17;

/// Aggregate accumulator contract.
///
/// `update` receives `None` only for calls without an input field
/// (`count`); every other functor requires a value.
pub trait Functor: Send {
    fn reset(&mut self);
    fn update(&mut self, value: Option<&Value>) -> EngineResult<()>;
    fn value(&self) -> EngineResult<Value>;
}

/// Build a functor by aggregate function name.
///
/// `input_type` is the type of the call's input field; `count` takes none.
/// Unknown names are fatal at operator init.
pub fn make_functor(name: &str, input_type: Option<FieldType>) -> EngineResult<Box<dyn Functor>> {
    match name {
        "first" => Ok(Box::new(First::new())),
        "last" => Ok(Box::new(Last::new())),
        "count" => Ok(Box::new(Counter::new())),
        "sum" => Ok(Box::new(Summer::new(require_numeric("sum", input_type)?))),
        "average" => Ok(Box::new(Averager::new(require_numeric(
            "average", input_type,
        )?))),
        "minimum" => Ok(Box::new(Minimizer::new(require_numeric(
            "minimum", input_type,
        )?)?)),
        "maximum" => Ok(Box::new(Maximizer::new(require_numeric(
            "maximum", input_type,
        )?)?)),
        "distinctcount" => Ok(Box::new(DistinctCounter::new())),
        "unique" => Ok(Box::new(Uniquer::new()?)),
        "group" => Ok(Box::new(GroupValue::new())),
        other => Err(EngineError::unknown_function(other)),
    }
}

fn require_numeric(function: &str, input_type: Option<FieldType>) -> EngineResult<FieldType> {
    match input_type {
        Some(t @ (FieldType::Integer64 | FieldType::Float64)) => Ok(t),
        Some(other) => Err(EngineError::conversion(format!(
            "{} is not defined over {} input",
            function,
            other.as_str()
        ))),
        None => Err(EngineError::conversion(format!(
            "{} requires an input field",
            function
        ))),
    }
}

fn require_input<'a>(value: Option<&'a Value>) -> EngineResult<&'a Value> {
    value.ok_or_else(|| EngineError::conversion("aggregate update without input value"))
}

fn require_f64(value: &Value) -> EngineResult<f64> {
    value.as_f64().ok_or_else(|| {
        EngineError::conversion(format!(
            "expected numeric value, got {} value {}",
            value.type_name(),
            value
        ))
    })
}

/// Value of the first update since reset.
pub struct First {
    first: Option<Value>,
}

impl First {
    pub fn new() -> Self {
        Self { first: None }
    }
}

impl Functor for First {
    fn reset(&mut self) {
        self.first = None;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        let value = require_input(value)?;
        if self.first.is_none() {
            self.first = Some(value.clone());
        }
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        self.first
            .clone()
            .ok_or_else(|| EngineError::conversion("first over an empty window"))
    }
}

/// Value of the last update since reset.
pub struct Last {
    last: Option<Value>,
}

impl Last {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl Functor for Last {
    fn reset(&mut self) {
        self.last = None;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        self.last = Some(require_input(value)?.clone());
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        self.last
            .clone()
            .ok_or_else(|| EngineError::conversion("last over an empty window"))
    }
}

/// Number of updates since reset, emitted as Float64.
pub struct Counter {
    count: i64,
}

impl Counter {
    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl Functor for Counter {
    fn reset(&mut self) {
        self.count = 0;
    }

    fn update(&mut self, _value: Option<&Value>) -> EngineResult<()> {
        self.count += 1;
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        Ok(Value::Float64(self.count as f64))
    }
}

/// Arithmetic sum as Float64.
pub struct Summer {
    sum: f64,
}

impl Summer {
    pub fn new(_input_type: FieldType) -> Self {
        Self { sum: 0.0 }
    }
}

impl Functor for Summer {
    fn reset(&mut self) {
        self.sum = 0.0;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        self.sum += require_f64(require_input(value)?)?;
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        Ok(Value::Float64(self.sum))
    }
}

/// Sum over count. An empty window has no average; reading it is a
/// conversion error attributed to the window's output row.
pub struct Averager {
    count: i64,
    sum: f64,
}

impl Averager {
    pub fn new(_input_type: FieldType) -> Self {
        Self { count: 0, sum: 0.0 }
    }
}

impl Functor for Averager {
    fn reset(&mut self) {
        self.count = 0;
        self.sum = 0.0;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        self.sum += require_f64(require_input(value)?)?;
        self.count += 1;
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        if self.count == 0 {
            return Err(EngineError::conversion("average over an empty window"));
        }
        Ok(Value::Float64(self.sum / self.count as f64))
    }
}

/// Minimum of all updates; starts at the type maximum.
pub struct Minimizer {
    input_type: FieldType,
    minimum: Value,
}

impl Minimizer {
    pub fn new(input_type: FieldType) -> EngineResult<Self> {
        let mut f = Self {
            input_type,
            minimum: Value::Int64(0),
        };
        f.reset();
        Ok(f)
    }
}

impl Functor for Minimizer {
    fn reset(&mut self) {
        self.minimum = match self.input_type {
            FieldType::Float64 => Value::Float64(f64::MAX),
            _ => Value::Int64(i64::MAX),
        };
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        let value = require_input(value)?;
        match (&self.minimum, value) {
            (Value::Float64(current), _) => {
                let v = require_f64(value)?;
                if v < *current {
                    self.minimum = Value::Float64(v);
                }
            }
            (Value::Int64(current), Value::Int64(v)) => {
                if v < current {
                    self.minimum = Value::Int64(*v);
                }
            }
            _ => {
                return Err(EngineError::conversion(format!(
                    "minimum over {} input cannot accept {} value {}",
                    self.input_type.as_str(),
                    value.type_name(),
                    value
                )))
            }
        }
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        Ok(self.minimum.clone())
    }
}

/// Maximum of all updates; starts at the type minimum.
pub struct Maximizer {
    input_type: FieldType,
    maximum: Value,
}

impl Maximizer {
    pub fn new(input_type: FieldType) -> EngineResult<Self> {
        let mut f = Self {
            input_type,
            maximum: Value::Int64(0),
        };
        f.reset();
        Ok(f)
    }
}

impl Functor for Maximizer {
    fn reset(&mut self) {
        self.maximum = match self.input_type {
            FieldType::Float64 => Value::Float64(-f64::MAX),
            _ => Value::Int64(i64::MIN),
        };
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        let value = require_input(value)?;
        match (&self.maximum, value) {
            (Value::Float64(current), _) => {
                let v = require_f64(value)?;
                if v > *current {
                    self.maximum = Value::Float64(v);
                }
            }
            (Value::Int64(current), Value::Int64(v)) => {
                if v > current {
                    self.maximum = Value::Int64(*v);
                }
            }
            _ => {
                return Err(EngineError::conversion(format!(
                    "maximum over {} input cannot accept {} value {}",
                    self.input_type.as_str(),
                    value.type_name(),
                    value
                )))
            }
        }
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        Ok(self.maximum.clone())
    }
}

/// Exact distinct count over FNV-32 value hashes.
pub struct DistinctCounter {
    counts: HashMap<u32, i64>,
    num_distinct: i64,
}

impl DistinctCounter {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            num_distinct: 0,
        }
    }
}

impl Functor for DistinctCounter {
    fn reset(&mut self) {
        self.counts = HashMap::new();
        self.num_distinct = 0;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        let key = value_hash(require_input(value)?)?;
        match self.counts.get_mut(&key) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(key, 1);
                self.num_distinct += 1;
            }
        }
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        Ok(Value::Int64(self.num_distinct))
    }
}

/// Approximate distinct count: a HyperLogLog sketch with 2^17 registers fed
/// the same FNV-32 hashes the exact counter uses. Reset replaces the sketch
/// with a freshly allocated one of the same configuration.
pub struct Uniquer {
    sketch: HyperLogLogPlus<u32, RandomState>,
}

impl Uniquer {
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            sketch: new_sketch()?,
        })
    }
}

fn new_sketch() -> EngineResult<HyperLogLogPlus<u32, RandomState>> {
    HyperLogLogPlus::new(SKETCH_PRECISION, RandomState::new())
        .map_err(|e| EngineError::conversion(format!("cannot allocate sketch: {:?}", e)))
}

impl Functor for Uniquer {
    fn reset(&mut self) {
        // Precision 17 was accepted at construction, so this cannot fail.
        if let Ok(sketch) = new_sketch() {
            self.sketch = sketch;
        }
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        self.sketch.insert(&value_hash(require_input(value)?)?);
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        let mut sketch = self.sketch.clone();
        Ok(Value::Int64(sketch.count().round() as i64))
    }
}

/// Passthrough of the most recent value; used for grouping columns carried
/// through the aggregate stage.
pub struct GroupValue {
    latest: Option<Value>,
}

impl GroupValue {
    pub fn new() -> Self {
        Self { latest: None }
    }
}

impl Functor for GroupValue {
    fn reset(&mut self) {
        self.latest = None;
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        self.latest = Some(require_input(value)?.clone());
        Ok(())
    }

    fn value(&self) -> EngineResult<Value> {
        self.latest
            .clone()
            .ok_or_else(|| EngineError::conversion("group over an empty window"))
    }
}

/// FNV-1 32-bit hash of a value in its canonical byte encoding: Float64 as
/// 8-byte big-endian IEEE-754, Int64 as 8-byte little-endian two's
/// complement, Text as UTF-8. Booleans have no hash encoding and are
/// rejected.
pub fn value_hash(value: &Value) -> EngineResult<u32> {
    match value {
        Value::Float64(f) => Ok(fnv1_32(&f.to_bits().to_be_bytes())),
        Value::Int64(i) => Ok(fnv1_32(&i.to_le_bytes())),
        Value::Text(s) => Ok(fnv1_32(s.as_bytes())),
        Value::Bool(_) => Err(EngineError::conversion(
            "boolean values have no hash encoding",
        )),
    }
}

fn fnv1_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2166136261;
    const PRIME: u32 = 16777619;
    let mut hash = OFFSET_BASIS;
    for b in bytes {
        hash = hash.wrapping_mul(PRIME) ^ u32::from(*b);
    }
    hash
}
