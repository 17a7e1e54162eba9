//! Query plan data model.
//!
//! A compiled FQL query is a linear chain of typed operator nodes rooted at
//! the ingress node. Nodes live in an arena ([`Plan::nodes`]) and reference
//! their single child by index, so the tree carries no pointers and
//! serializes naturally. The binary wire form lives in [`wire`].

pub mod wire;

use crate::flowstream::fql::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Primitive type of a row field.
///
/// Ordinals are part of the wire format and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Float64,
    Integer64,
    Text,
}

impl FieldType {
    pub fn ordinal(&self) -> u8 {
        match self {
            FieldType::Boolean => 0,
            FieldType::Float64 => 1,
            FieldType::Integer64 => 2,
            FieldType::Text => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> EngineResult<Self> {
        match ordinal {
            0 => Ok(FieldType::Boolean),
            1 => Ok(FieldType::Float64),
            2 => Ok(FieldType::Integer64),
            3 => Ok(FieldType::Text),
            other => Err(EngineError::unknown_enum("field type", other)),
        }
    }

    /// Map a catalog type name to a wire type. Timestamps travel as text
    /// and are parsed on demand at the sites that need an instant.
    pub fn from_catalog_name(name: &str) -> EngineResult<Self> {
        match name {
            "boolean" => Ok(FieldType::Boolean),
            "float64" => Ok(FieldType::Float64),
            "integer64" => Ok(FieldType::Integer64),
            "text" | "timestamp" => Ok(FieldType::Text),
            other => Err(EngineError::conversion(format!(
                "unknown field type name '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Float64 => "float64",
            FieldType::Integer64 => "integer64",
            FieldType::Text => "text",
        }
    }
}

/// Semantic tag directing windowing and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldUsage {
    Data,
    Time,
    Group,
    Sequence,
}

impl FieldUsage {
    pub fn ordinal(&self) -> u8 {
        match self {
            FieldUsage::Data => 0,
            FieldUsage::Time => 1,
            FieldUsage::Group => 2,
            FieldUsage::Sequence => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> EngineResult<Self> {
        match ordinal {
            0 => Ok(FieldUsage::Data),
            1 => Ok(FieldUsage::Time),
            2 => Ok(FieldUsage::Group),
            3 => Ok(FieldUsage::Sequence),
            other => Err(EngineError::unknown_enum("field usage", other)),
        }
    }

    pub fn from_catalog_name(name: &str) -> EngineResult<Self> {
        match name {
            "data" => Ok(FieldUsage::Data),
            "time" => Ok(FieldUsage::Time),
            "group" => Ok(FieldUsage::Group),
            "sequence" => Ok(FieldUsage::Sequence),
            other => Err(EngineError::conversion(format!(
                "unknown field usage name '{}'",
                other
            ))),
        }
    }
}

/// Pipeline stage a node configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Ingress,
    PreFilter,
    Window,
    Aggregate,
    PostFilter,
    Project,
    Egress,
}

impl OperatorType {
    pub fn ordinal(&self) -> u8 {
        match self {
            OperatorType::Ingress => 0,
            OperatorType::PreFilter => 1,
            OperatorType::Window => 2,
            OperatorType::Aggregate => 3,
            OperatorType::PostFilter => 4,
            OperatorType::Project => 5,
            OperatorType::Egress => 6,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> EngineResult<Self> {
        match ordinal {
            0 => Ok(OperatorType::Ingress),
            1 => Ok(OperatorType::PreFilter),
            2 => Ok(OperatorType::Window),
            3 => Ok(OperatorType::Aggregate),
            4 => Ok(OperatorType::PostFilter),
            5 => Ok(OperatorType::Project),
            6 => Ok(OperatorType::Egress),
            other => Err(EngineError::unknown_enum("operator type", other)),
        }
    }
}

/// Comparison operator in a field-constant predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Comparator {
    pub fn ordinal(&self) -> u8 {
        match self {
            Comparator::Equal => 0,
            Comparator::NotEqual => 1,
            Comparator::LessThan => 2,
            Comparator::LessThanOrEqual => 3,
            Comparator::GreaterThan => 4,
            Comparator::GreaterThanOrEqual => 5,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> EngineResult<Self> {
        match ordinal {
            0 => Ok(Comparator::Equal),
            1 => Ok(Comparator::NotEqual),
            2 => Ok(Comparator::LessThan),
            3 => Ok(Comparator::LessThanOrEqual),
            4 => Ok(Comparator::GreaterThan),
            5 => Ok(Comparator::GreaterThanOrEqual),
            other => Err(EngineError::unknown_enum("comparator", other)),
        }
    }
}

/// A named, typed, usage-tagged column of a node's output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanField {
    pub name: String,
    pub field_type: FieldType,
    pub usage: FieldUsage,
}

impl PlanField {
    pub fn new(name: impl Into<String>, field_type: FieldType, usage: FieldUsage) -> Self {
        Self {
            name: name.into(),
            field_type,
            usage,
        }
    }
}

/// A predicate of the form `field op constant`; the constant is carried as
/// text and typed against the field at code generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConstantCondition {
    pub field_name: String,
    pub comparator: Comparator,
    pub constant: String,
}

/// An aggregate call: function name plus its input fields.
/// `count` takes no input; every other function takes exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub function: String,
    pub input_fields: Vec<PlanField>,
}

/// Positional property slot indices at a window node.
pub mod property_slot {
    pub const WINDOW_TYPE: usize = 0;
    pub const INTERVAL_TYPE: usize = 1;
    pub const INTERVAL_AMOUNT: usize = 2;
    pub const INTERVAL_UNIT: usize = 3;
    pub const INTERVAL_FIELD: usize = 4;
    pub const INCLUDE_CLOSING_ROW: usize = 5;
    pub const SEQUENCE_FIELD: usize = 6;

    pub const COUNT: usize = 7;

    pub const NAMES: [&str; COUNT] = [
        "window_type",
        "interval_type",
        "interval_amount",
        "interval_unit",
        "interval_field",
        "include_closing_row",
        "sequence_field",
    ];
}

/// One vertex of the query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub operator: OperatorType,
    pub fields: Vec<PlanField>,
    pub group_fields: Vec<PlanField>,
    /// Conjunctive filter conditions (pre-filter, post-filter, project nodes)
    pub conditions: Vec<FieldConstantCondition>,
    /// Aggregate calls (aggregate nodes); call i feeds output field i
    pub calls: Vec<Call>,
    /// Positional window properties (window nodes), see [`property_slot`]
    pub properties: Vec<String>,
    /// Session-open gate conditions (session window nodes)
    pub session_open_conditions: Vec<FieldConstantCondition>,
    /// Session-close gate conditions (session window nodes)
    pub session_close_conditions: Vec<FieldConstantCondition>,
    /// Arena index of the single child, `None` at the egress leaf
    pub child: Option<usize>,
}

impl Node {
    pub fn new(id: i64, operator: OperatorType) -> Self {
        Self {
            id,
            operator,
            fields: Vec::new(),
            group_fields: Vec::new(),
            conditions: Vec::new(),
            calls: Vec::new(),
            properties: Vec::new(),
            session_open_conditions: Vec::new(),
            session_close_conditions: Vec::new(),
            child: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&PlanField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A compiled query plan: an arena of nodes whose root (the ingress node)
/// sits at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<Node>,
}

impl Plan {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn root(&self) -> EngineResult<&Node> {
        self.nodes
            .first()
            .ok_or_else(|| EngineError::malformed_plan("plan has no nodes"))
    }

    /// Walk the chain from the root, yielding each node in pipeline order.
    pub fn chain(&self) -> ChainIter<'_> {
        ChainIter {
            plan: self,
            next: if self.nodes.is_empty() { None } else { Some(0) },
        }
    }

    /// First node of the given operator kind along the chain.
    pub fn find_first(&self, operator: OperatorType) -> Option<&Node> {
        self.chain().find(|n| n.operator == operator)
    }

    /// Structural validation: a linear chain rooted at ingress, acyclic,
    /// with every referenced field name present in its node's field list.
    pub fn validate(&self) -> EngineResult<()> {
        let root = self.root()?;
        if root.operator != OperatorType::Ingress {
            return Err(EngineError::malformed_plan(format!(
                "root node must be ingress, found {:?}",
                root.operator
            )));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut index = Some(0usize);
        while let Some(i) = index {
            let node = self.nodes.get(i).ok_or_else(|| {
                EngineError::malformed_plan(format!("child index {} out of bounds", i))
            })?;
            if visited[i] {
                return Err(EngineError::malformed_plan(format!(
                    "node {} appears twice in the chain",
                    node.id
                )));
            }
            visited[i] = true;
            Self::validate_references(node)?;
            index = node.child;
        }

        if let Some(unreached) = visited.iter().position(|v| !v) {
            return Err(EngineError::malformed_plan(format!(
                "node at index {} is not reachable from the root",
                unreached
            )));
        }
        Ok(())
    }

    fn validate_references(node: &Node) -> EngineResult<()> {
        let check = |name: &str, what: &str| -> EngineResult<()> {
            if node.field(name).is_none() {
                return Err(EngineError::malformed_plan(format!(
                    "{} references field '{}' absent from node {} field list",
                    what, name, node.id
                )));
            }
            Ok(())
        };

        for group in &node.group_fields {
            check(&group.name, "group")?;
        }
        for cond in node
            .conditions
            .iter()
            .chain(&node.session_open_conditions)
            .chain(&node.session_close_conditions)
        {
            check(&cond.field_name, "predicate")?;
        }
        for call in &node.calls {
            for input in &call.input_fields {
                check(&input.name, "call")?;
            }
        }
        Ok(())
    }

    /// Debug projection of the plan as pretty JSON. No round-trip contract;
    /// the binary wire form is the canonical representation.
    pub fn show_json(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::malformed_plan(format!("cannot render plan: {}", e)))
    }
}

/// Iterator over the plan chain in pipeline order.
pub struct ChainIter<'a> {
    plan: &'a Plan,
    next: Option<usize>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.next?;
        let node = self.plan.nodes.get(i)?;
        self.next = node.child;
        Some(node)
    }
}
