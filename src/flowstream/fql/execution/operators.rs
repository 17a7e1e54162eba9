//! Pipeline operators.
//!
//! Each operator is configured from exactly one plan node at startup and
//! shares the [`OperatorBase`] field tables. Row dataflow is strictly
//! one-way: the runtime driver owns the wiring and calls one operator at a
//! time; windows coordinate across rows only through the per-group state in
//! [`super::window`].

use crate::flowstream::fql::codegen::CompiledFilter;
use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::functors::{make_functor, Functor};
use crate::flowstream::fql::execution::types::{AggregateRow, EgressRow, Group, IngressRow, Value};
use crate::flowstream::fql::plan::{property_slot, FieldType, Node, PlanField};
use chrono::Duration;
use std::collections::HashMap;

/// Field tables shared by every operator, initialized from one plan node.
#[derive(Debug, Clone)]
pub struct OperatorBase {
    pub output_field_names: Vec<String>,
    pub output_field_types: Vec<FieldType>,
    pub group_field_names: Vec<String>,
    pub group_field_types: Vec<FieldType>,
    name_to_type: HashMap<String, FieldType>,
    name_to_index: HashMap<String, usize>,
}

impl OperatorBase {
    pub fn from_node(node: &Node) -> Self {
        let mut name_to_type = HashMap::new();
        let mut name_to_index = HashMap::new();
        let mut output_field_names = Vec::with_capacity(node.fields.len());
        let mut output_field_types = Vec::with_capacity(node.fields.len());
        for (i, field) in node.fields.iter().enumerate() {
            output_field_names.push(field.name.clone());
            output_field_types.push(field.field_type);
            name_to_type.insert(field.name.clone(), field.field_type);
            name_to_index.insert(field.name.clone(), i);
        }

        let group_field_names = node.group_fields.iter().map(|f| f.name.clone()).collect();
        let group_field_types = node.group_fields.iter().map(|f| f.field_type).collect();

        Self {
            output_field_names,
            output_field_types,
            group_field_names,
            group_field_types,
            name_to_type,
            name_to_index,
        }
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.name_to_type.get(name).copied()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }
}

/// Parses delimited records into ingress rows and materializes the group
/// substructure from the grouping fields.
pub struct Ingress {
    pub base: OperatorBase,
    group_indexes: Vec<usize>,
}

impl Ingress {
    pub fn init(node: &Node) -> EngineResult<Self> {
        let base = OperatorBase::from_node(node);
        let mut group_indexes = Vec::with_capacity(base.group_field_names.len());
        for name in &base.group_field_names {
            let index = base.field_index(name).ok_or_else(|| {
                EngineError::malformed_plan(format!(
                    "group field '{}' absent from ingress field list",
                    name
                ))
            })?;
            group_indexes.push(index);
        }
        Ok(Self {
            base,
            group_indexes,
        })
    }

    /// Parse one delimited record into an ingress row. Token count and
    /// every token conversion are strict; failures name the field and the
    /// raw value and are attributed to this row.
    pub fn ingress(&self, record: &str, delimiter: char) -> EngineResult<IngressRow> {
        let tokens: Vec<&str> = record.split(delimiter).collect();
        if tokens.len() != self.base.output_field_names.len() {
            return Err(EngineError::parse_error(
                "record",
                record,
                format!(
                    "expected {} fields, found {}",
                    self.base.output_field_names.len(),
                    tokens.len()
                ),
            ));
        }

        let mut payload = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            payload.push(Value::parse_token(
                token,
                self.base.output_field_types[i],
                &self.base.output_field_names[i],
            )?);
        }

        let group = Group::new(
            self.group_indexes
                .iter()
                .map(|&i| payload[i].clone())
                .collect(),
        );

        Ok(IngressRow { group, payload })
    }
}

/// A predicate gate (pre-filter, post-filter, or egress filter) bound to
/// its generated filter routine. Rows failing the predicate are dropped
/// silently by the driver.
pub struct Filter {
    pub base: OperatorBase,
    filter: CompiledFilter,
}

impl Filter {
    pub fn init(node: &Node, filter: CompiledFilter) -> Self {
        Self {
            base: OperatorBase::from_node(node),
            filter,
        }
    }

    pub fn eval(&self, payload: &[Value]) -> EngineResult<bool> {
        self.filter.eval(payload)
    }
}

/// Window shape, resolved from the positional property list.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowKind {
    TumblingTime {
        interval: Duration,
        time_field_index: usize,
    },
    TumblingDistance {
        interval_rows: i64,
    },
    Session {
        include_closing_row: bool,
    },
}

/// Window operator configuration. The per-group open/close state machine
/// lives in [`super::window::WindowTable`].
pub struct Window {
    pub base: OperatorBase,
    pub kind: WindowKind,
}

impl Window {
    pub fn init(node: &Node) -> EngineResult<Self> {
        let base = OperatorBase::from_node(node);

        let window_type = property(node, property_slot::WINDOW_TYPE)?;
        let interval_type = property(node, property_slot::INTERVAL_TYPE)?;

        let kind = match (window_type, interval_type) {
            ("tumbling", "time") => {
                let amount = property(node, property_slot::INTERVAL_AMOUNT)?;
                let amount: f64 = amount.parse().map_err(|_| {
                    EngineError::conversion(format!("invalid interval amount '{}'", amount))
                })?;
                let unit = property(node, property_slot::INTERVAL_UNIT)?;
                let interval = interval_duration(amount, unit)?;
                let field_name = property(node, property_slot::INTERVAL_FIELD)?;
                let time_field_index = base.field_index(field_name).ok_or_else(|| {
                    EngineError::malformed_plan(format!(
                        "interval field '{}' absent from window field list",
                        field_name
                    ))
                })?;
                WindowKind::TumblingTime {
                    interval,
                    time_field_index,
                }
            }
            ("tumbling", "distance") => {
                let amount = property(node, property_slot::INTERVAL_AMOUNT)?;
                let interval_rows: i64 = amount.parse().map_err(|_| {
                    EngineError::conversion(format!("invalid interval amount '{}'", amount))
                })?;
                if interval_rows <= 0 {
                    return Err(EngineError::malformed_plan(format!(
                        "distance window needs a positive row interval, got {}",
                        interval_rows
                    )));
                }
                // The sequence field is declared alongside the interval; its
                // presence is what marks the stream as row-countable.
                property(node, property_slot::SEQUENCE_FIELD)?;
                WindowKind::TumblingDistance { interval_rows }
            }
            ("session", _) => {
                let raw = property(node, property_slot::INCLUDE_CLOSING_ROW)?;
                let include_closing_row = raw.parse::<bool>().map_err(|_| {
                    EngineError::conversion(format!("invalid include_closing_row '{}'", raw))
                })?;
                WindowKind::Session {
                    include_closing_row,
                }
            }
            (window_type, interval_type) => {
                return Err(EngineError::malformed_plan(format!(
                    "illegal window configuration: type '{}', interval '{}'",
                    window_type, interval_type
                )))
            }
        };

        Ok(Self { base, kind })
    }
}

fn property<'a>(node: &'a Node, slot: usize) -> EngineResult<&'a str> {
    node.properties
        .get(slot)
        .map(|s| s.as_str())
        .ok_or_else(|| EngineError::missing_property(property_slot::NAMES[slot]))
}

fn interval_duration(amount: f64, unit: &str) -> EngineResult<Duration> {
    let nanos_per_unit: f64 = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        other => {
            return Err(EngineError::malformed_plan(format!(
                "illegal interval unit '{}'",
                other
            )))
        }
    };
    let nanos = amount * nanos_per_unit;
    if !nanos.is_finite() || nanos <= 0.0 {
        return Err(EngineError::malformed_plan(format!(
            "interval must be positive, got {}{}",
            amount, unit
        )));
    }
    Ok(Duration::nanoseconds(nanos as i64))
}

/// Grouped aggregation: one functor per call, call i feeding output field i.
pub struct Aggregate {
    pub base: OperatorBase,
    input_indexes: Vec<Option<usize>>,
    functors: Vec<Box<dyn Functor>>,
}

impl Aggregate {
    /// Build the functor bank from the node's calls. `input_fields` is the
    /// upstream (ingress) payload layout used to resolve call inputs.
    pub fn init(node: &Node, input_fields: &[PlanField]) -> EngineResult<Self> {
        let base = OperatorBase::from_node(node);
        if node.calls.len() != node.fields.len() {
            return Err(EngineError::malformed_plan(format!(
                "aggregate node has {} calls for {} output fields",
                node.calls.len(),
                node.fields.len()
            )));
        }

        let mut input_indexes = Vec::with_capacity(node.calls.len());
        let mut functors: Vec<Box<dyn Functor>> = Vec::with_capacity(node.calls.len());
        for call in &node.calls {
            let input = call.input_fields.first();
            let input_index = match input {
                Some(field) => Some(
                    input_fields
                        .iter()
                        .position(|f| f.name == field.name)
                        .ok_or_else(|| {
                            EngineError::malformed_plan(format!(
                                "call input '{}' absent from the upstream payload",
                                field.name
                            ))
                        })?,
                ),
                None => None,
            };
            input_indexes.push(input_index);
            functors.push(make_functor(
                &call.function,
                input.map(|f| f.field_type),
            )?);
        }

        Ok(Self {
            base,
            input_indexes,
            functors,
        })
    }

    /// Feed one ingress row to every functor.
    pub fn update(&mut self, row: &IngressRow) -> EngineResult<()> {
        for (functor, input_index) in self.functors.iter_mut().zip(&self.input_indexes) {
            let value = input_index.map(|i| &row.payload[i]);
            functor.update(value)?;
        }
        Ok(())
    }

    /// Close the window: read every functor in output-field order, coerce
    /// to the declared output types, then reset the bank. The group is
    /// preserved from the window's last input row.
    pub fn close(&mut self, group: Group) -> EngineResult<AggregateRow> {
        let mut payload = Vec::with_capacity(self.functors.len());
        let mut failure = None;
        for (i, functor) in self.functors.iter().enumerate() {
            match functor
                .value()
                .and_then(|v| v.coerce_to(self.base.output_field_types[i]))
            {
                Ok(value) => payload.push(value),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.reset();
        match failure {
            Some(e) => Err(e),
            None => Ok(AggregateRow { group, payload }),
        }
    }

    /// Reset every functor to its post-init state.
    pub fn reset(&mut self) {
        for functor in &mut self.functors {
            functor.reset();
        }
    }
}

/// Copies named fields from the aggregate row into the egress row shape.
pub struct Project {
    pub base: OperatorBase,
    input_indexes: Vec<usize>,
}

impl Project {
    /// `input_fields` is the aggregate payload layout.
    pub fn init(node: &Node, input_fields: &[PlanField]) -> EngineResult<Self> {
        let base = OperatorBase::from_node(node);
        let mut input_indexes = Vec::with_capacity(base.output_field_names.len());
        for name in &base.output_field_names {
            let index = input_fields
                .iter()
                .position(|f| &f.name == name)
                .ok_or_else(|| {
                    EngineError::malformed_plan(format!(
                        "projected field '{}' absent from the aggregate payload",
                        name
                    ))
                })?;
            input_indexes.push(index);
        }
        Ok(Self {
            base,
            input_indexes,
        })
    }

    pub fn project(&self, row: &AggregateRow) -> EngineResult<EgressRow> {
        let mut payload = Vec::with_capacity(self.input_indexes.len());
        for (out_index, in_index) in self.input_indexes.iter().enumerate() {
            let value = row.payload.get(*in_index).ok_or_else(|| {
                EngineError::conversion(format!(
                    "aggregate payload index {} out of range",
                    in_index
                ))
            })?;
            payload.push(value.coerce_to(self.base.output_field_types[out_index])?);
        }
        Ok(EgressRow {
            group: row.group.clone(),
            payload,
        })
    }
}

/// Final formatting of surfaced rows for the sink.
pub struct Egress {
    pub base: OperatorBase,
}

impl Egress {
    pub fn init(node: &Node) -> Self {
        Self {
            base: OperatorBase::from_node(node),
        }
    }

    /// Render one row as a delimited text line (no trailing newline).
    pub fn format_delimited(&self, row: &EgressRow, delimiter: char) -> String {
        let mut line = String::new();
        for (i, value) in row.payload.iter().enumerate() {
            if i > 0 {
                line.push(delimiter);
            }
            line.push_str(&value.to_string());
        }
        line
    }
}
