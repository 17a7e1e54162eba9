//! Per-query code generation.
//!
//! The generator walks the plan's predicate condition lists and produces an
//! interpretable filter program instead of target-language source: each
//! predicate becomes a small expression tree over payload field references
//! and typed constants, type-checked against the plan at generation time so
//! evaluation never sees an unsupported comparison. Absent predicates
//! compile to constant-true passthroughs.
//!
//! Alongside the program the generator emits the per-query row schema (the
//! group/ingress/aggregate/egress payload layouts) to a stable relative
//! path, stamped with a fresh namespace identifier so coexisting generated
//! schemas do not collide. Rebuilds are deterministic modulo that
//! identifier.

use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::types::{parse_rfc3339, Value};
use crate::flowstream::fql::plan::{
    Comparator, FieldConstantCondition, FieldType, FieldUsage, OperatorType, Plan, PlanField,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Relative path, under the generation output directory, where the row
/// schema lands. The runtime driver loads it from here.
pub const SCHEMA_FILE_RELATIVE_PATH: &str = "generated/row_schema.json";

/// One field of a generated payload layout; position in the list is the
/// payload index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub usage: FieldUsage,
}

impl From<&PlanField> for SchemaField {
    fn from(f: &PlanField) -> Self {
        SchemaField {
            name: f.name.clone(),
            field_type: f.field_type,
            usage: f.usage,
        }
    }
}

/// Ordered field layout of one payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PayloadSchema {
    pub fields: Vec<SchemaField>,
}

impl PayloadSchema {
    fn from_plan_fields(fields: &[PlanField]) -> Self {
        Self {
            fields: fields.iter().map(SchemaField::from).collect(),
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_types(&self) -> Vec<FieldType> {
        self.fields.iter().map(|f| f.field_type).collect()
    }
}

/// The generated row schema: group and per-stage payload layouts plus the
/// fresh namespace identifier that keeps coexisting schemas apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    pub namespace: String,
    pub group: PayloadSchema,
    pub ingress: PayloadSchema,
    pub aggregate: PayloadSchema,
    pub egress: PayloadSchema,
}

impl RowSchema {
    /// Write the schema as JSON under `out_dir` at the stable relative
    /// path, creating directories as needed. Returns the full path.
    pub fn write_to_dir(&self, out_dir: &Path) -> EngineResult<PathBuf> {
        let path = out_dir.join(SCHEMA_FILE_RELATIVE_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::conversion(format!("cannot render row schema: {}", e)))?;
        let mut file = fs::File::create(&path)?;
        file.write_all(json.as_bytes())?;
        Ok(path)
    }

    /// Load a previously written schema file.
    pub fn from_json_reader(reader: impl Read) -> EngineResult<Self> {
        serde_json::from_reader(reader)
            .map_err(|e| EngineError::conversion(format!("cannot read row schema: {}", e)))
    }
}

/// A typed comparison operand: either a generated constant or a translated
/// payload value. Timestamps exist only here, after the RFC 3339 parse of a
/// time-usage text field.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Interpretable predicate expression over one payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Const(bool),
    Cmp {
        field_index: usize,
        comparator: Comparator,
        constant: Scalar,
    },
    And(Vec<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
}

/// One predicate bound to the payload layout it evaluates against.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    schema: PayloadSchema,
    expr: FilterExpr,
}

impl CompiledFilter {
    fn passthrough(schema: PayloadSchema) -> Self {
        Self {
            schema,
            expr: FilterExpr::Const(true),
        }
    }

    /// Evaluate against a raw payload. The payload is first translated to
    /// typed scalars (including the timestamp parse of time-usage text
    /// fields); translation failures are row-time errors.
    pub fn eval(&self, payload: &[Value]) -> EngineResult<bool> {
        // Passthroughs skip translation so rows without a predicate never
        // pay the timestamp parse.
        if let FilterExpr::Const(pass) = self.expr {
            return Ok(pass);
        }
        let translated = translate_payload(payload, &self.schema)?;
        eval_expr(&self.expr, &translated)
    }
}

/// The five per-query filter entry points.
#[derive(Debug, Clone)]
pub struct FilterProgram {
    ingress: CompiledFilter,
    aggregate: CompiledFilter,
    project: CompiledFilter,
    session_open: CompiledFilter,
    session_close: CompiledFilter,
}

impl FilterProgram {
    pub fn ingress_filter(&self) -> &CompiledFilter {
        &self.ingress
    }

    pub fn aggregate_filter(&self) -> &CompiledFilter {
        &self.aggregate
    }

    pub fn project_filter(&self) -> &CompiledFilter {
        &self.project
    }

    pub fn eval_ingress(&self, payload: &[Value]) -> EngineResult<bool> {
        self.ingress.eval(payload)
    }

    pub fn eval_aggregate(&self, payload: &[Value]) -> EngineResult<bool> {
        self.aggregate.eval(payload)
    }

    pub fn eval_project(&self, payload: &[Value]) -> EngineResult<bool> {
        self.project.eval(payload)
    }

    pub fn eval_session_open(&self, payload: &[Value]) -> EngineResult<bool> {
        self.session_open.eval(payload)
    }

    pub fn eval_session_close(&self, payload: &[Value]) -> EngineResult<bool> {
        self.session_close.eval(payload)
    }
}

/// Everything generation produces for one query.
#[derive(Debug, Clone)]
pub struct Generated {
    pub program: FilterProgram,
    pub schema: RowSchema,
}

/// Generate the filter program and row schema for a validated plan.
pub fn generate(plan: &Plan) -> EngineResult<Generated> {
    let ingress_node = plan.root()?;
    if ingress_node.operator != OperatorType::Ingress {
        return Err(EngineError::malformed_plan("plan root is not ingress"));
    }

    let ingress_schema = PayloadSchema::from_plan_fields(&ingress_node.fields);
    let group_schema = PayloadSchema::from_plan_fields(&ingress_node.group_fields);

    let aggregate_schema = plan
        .find_first(OperatorType::Aggregate)
        .map(|n| PayloadSchema::from_plan_fields(&n.fields))
        .unwrap_or_default();
    let egress_schema = plan
        .find_first(OperatorType::Project)
        .map(|n| PayloadSchema::from_plan_fields(&n.fields))
        .unwrap_or_default();

    let ingress = compile_node_filter(
        plan.find_first(OperatorType::PreFilter).map(|n| &n.conditions[..]),
        &ingress_schema,
    )?;
    let aggregate = compile_node_filter(
        plan.find_first(OperatorType::PostFilter).map(|n| &n.conditions[..]),
        &aggregate_schema,
    )?;
    let project = compile_node_filter(
        plan.find_first(OperatorType::Project).map(|n| &n.conditions[..]),
        &egress_schema,
    )?;

    let window_node = plan.find_first(OperatorType::Window);
    let session_open = compile_node_filter(
        window_node.map(|n| &n.session_open_conditions[..]),
        &ingress_schema,
    )?;
    let session_close = compile_node_filter(
        window_node.map(|n| &n.session_close_conditions[..]),
        &ingress_schema,
    )?;

    let schema = RowSchema {
        namespace: format!("q_{}", Uuid::new_v4().simple()),
        group: group_schema,
        ingress: ingress_schema,
        aggregate: aggregate_schema,
        egress: egress_schema,
    };

    Ok(Generated {
        program: FilterProgram {
            ingress,
            aggregate,
            project,
            session_open,
            session_close,
        },
        schema,
    })
}

fn compile_node_filter(
    conditions: Option<&[FieldConstantCondition]>,
    schema: &PayloadSchema,
) -> EngineResult<CompiledFilter> {
    let conditions = match conditions {
        Some(c) if !c.is_empty() => c,
        _ => return Ok(CompiledFilter::passthrough(schema.clone())),
    };

    let mut leaves = Vec::with_capacity(conditions.len());
    for condition in conditions {
        leaves.push(compile_condition(condition, schema)?);
    }
    let expr = if leaves.len() == 1 {
        leaves.into_iter().next().unwrap()
    } else {
        FilterExpr::And(leaves)
    };
    Ok(CompiledFilter {
        schema: schema.clone(),
        expr,
    })
}

fn compile_condition(
    condition: &FieldConstantCondition,
    schema: &PayloadSchema,
) -> EngineResult<FilterExpr> {
    let field_index = schema.field_index(&condition.field_name).ok_or_else(|| {
        EngineError::malformed_plan(format!(
            "predicate references field '{}' absent from the payload",
            condition.field_name
        ))
    })?;
    let field = &schema.fields[field_index];
    let constant = type_constant(condition, field)?;

    if matches!(constant, Scalar::Bool(_)) && !is_equality(condition.comparator) {
        return Err(EngineError::incompatible_types(
            &condition.field_name,
            "boolean",
            "ordering comparator",
        ));
    }

    Ok(FilterExpr::Cmp {
        field_index,
        comparator: condition.comparator,
        constant,
    })
}

fn is_equality(comparator: Comparator) -> bool {
    matches!(comparator, Comparator::Equal | Comparator::NotEqual)
}

/// Type a predicate constant against the field it compares with. Numeric
/// comparisons between Int64 and Float64 promote to Float64; a time-usage
/// text field takes a timestamp constant; everything else must match the
/// field type exactly.
fn type_constant(condition: &FieldConstantCondition, field: &SchemaField) -> EngineResult<Scalar> {
    let raw = condition.constant.as_str();
    match field.field_type {
        FieldType::Boolean => raw.parse::<bool>().map(Scalar::Bool).map_err(|_| {
            EngineError::incompatible_types(&field.name, "boolean", format!("'{}'", raw))
        }),
        FieldType::Integer64 => {
            if let Ok(i) = raw.parse::<i64>() {
                Ok(Scalar::Int64(i))
            } else if let Ok(f) = raw.parse::<f64>() {
                Ok(Scalar::Float64(f))
            } else {
                Err(EngineError::incompatible_types(
                    &field.name,
                    "integer64",
                    format!("'{}'", raw),
                ))
            }
        }
        FieldType::Float64 => raw.parse::<f64>().map(Scalar::Float64).map_err(|_| {
            EngineError::incompatible_types(&field.name, "float64", format!("'{}'", raw))
        }),
        FieldType::Text => {
            if field.usage == FieldUsage::Time {
                parse_rfc3339(raw).map(Scalar::Timestamp).map_err(|_| {
                    EngineError::incompatible_types(&field.name, "timestamp", format!("'{}'", raw))
                })
            } else {
                Ok(Scalar::Text(raw.to_string()))
            }
        }
    }
}

/// Materialize typed scalars from a raw payload, parsing time-usage text
/// fields into instants.
fn translate_payload(payload: &[Value], schema: &PayloadSchema) -> EngineResult<Vec<Scalar>> {
    if payload.len() != schema.fields.len() {
        return Err(EngineError::conversion(format!(
            "payload has {} values but the schema declares {}",
            payload.len(),
            schema.fields.len()
        )));
    }
    payload
        .iter()
        .zip(&schema.fields)
        .map(|(value, field)| translate_value(value, field))
        .collect()
}

fn translate_value(value: &Value, field: &SchemaField) -> EngineResult<Scalar> {
    match value {
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Int64(i) => Ok(Scalar::Int64(*i)),
        Value::Float64(f) => Ok(Scalar::Float64(*f)),
        Value::Text(s) => {
            if field.usage == FieldUsage::Time {
                Ok(Scalar::Timestamp(parse_rfc3339(s)?))
            } else {
                Ok(Scalar::Text(s.clone()))
            }
        }
    }
}

fn eval_expr(expr: &FilterExpr, payload: &[Scalar]) -> EngineResult<bool> {
    match expr {
        FilterExpr::Const(pass) => Ok(*pass),
        FilterExpr::Cmp {
            field_index,
            comparator,
            constant,
        } => {
            let left = payload.get(*field_index).ok_or_else(|| {
                EngineError::conversion(format!("payload index {} out of range", field_index))
            })?;
            compare(left, *comparator, constant)
        }
        FilterExpr::And(children) => {
            for child in children {
                if !eval_expr(child, payload)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        FilterExpr::Or(left, right) => {
            Ok(eval_expr(left, payload)? || eval_expr(right, payload)?)
        }
        FilterExpr::Not(inner) => Ok(!eval_expr(inner, payload)?),
    }
}

fn compare(left: &Scalar, comparator: Comparator, right: &Scalar) -> EngineResult<bool> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Scalar::Bool(l), Scalar::Bool(r)) => {
            return Ok(match comparator {
                Comparator::Equal => l == r,
                Comparator::NotEqual => l != r,
                _ => false,
            });
        }
        (Scalar::Int64(l), Scalar::Int64(r)) => l.cmp(r),
        (Scalar::Text(l), Scalar::Text(r)) => l.as_bytes().cmp(r.as_bytes()),
        (Scalar::Timestamp(l), Scalar::Timestamp(r)) => l.cmp(r),
        (l, r) => {
            // Mixed numerics promote to Float64; generation rejected
            // everything else, so a miss here is a conversion error.
            let (lf, rf) = match (scalar_f64(l), scalar_f64(r)) {
                (Some(lf), Some(rf)) => (lf, rf),
                _ => {
                    return Err(EngineError::conversion(format!(
                        "cannot compare {:?} with {:?}",
                        l, r
                    )))
                }
            };
            match lf.partial_cmp(&rf) {
                Some(ordering) => ordering,
                None => return Ok(false),
            }
        }
    };

    Ok(match comparator {
        Comparator::Equal => ordering == Ordering::Equal,
        Comparator::NotEqual => ordering != Ordering::Equal,
        Comparator::LessThan => ordering == Ordering::Less,
        Comparator::LessThanOrEqual => ordering != Ordering::Greater,
        Comparator::GreaterThan => ordering == Ordering::Greater,
        Comparator::GreaterThanOrEqual => ordering != Ordering::Less,
    })
}

fn scalar_f64(scalar: &Scalar) -> Option<f64> {
    match scalar {
        Scalar::Int64(i) => Some(*i as f64),
        Scalar::Float64(f) => Some(*f),
        _ => None,
    }
}
