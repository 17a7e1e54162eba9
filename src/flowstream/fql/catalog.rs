//! Immutable catalog of streams.
//!
//! A four-level namespace tree, `System → Database → Schema → Table →
//! Field`, loaded once from JSON and read-only afterwards. Tables resolve
//! fully-qualified `system.database.schema.table` names; lookup is
//! name-exact and case-sensitive.

use crate::flowstream::fql::error::{EngineError, EngineResult, NotFoundKind};
use crate::flowstream::fql::plan::{FieldType, FieldUsage, PlanField};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub databases: Vec<Database>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schemas: Vec<Schema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub usage: String,
}

impl Field {
    /// Resolve the catalog's textual type/usage tags into plan enums.
    pub fn to_plan_field(&self) -> EngineResult<PlanField> {
        Ok(PlanField {
            name: self.name.clone(),
            field_type: FieldType::from_catalog_name(&self.field_type)?,
            usage: FieldUsage::from_catalog_name(&self.usage)?,
        })
    }
}

impl Table {
    /// Render the two-line sample template for this table: a header line of
    /// field names and a second line of field types, `#`-prefixed.
    pub fn csv_template(&self, delimiter: char) -> String {
        let mut names = vec!["#".to_string()];
        let mut types = vec!["#".to_string()];
        for field in &self.fields {
            names.push(field.name.clone());
            types.push(field.field_type.clone());
        }
        let sep = delimiter.to_string();
        format!("{}\n{}\n", names.join(&sep), types.join(&sep))
    }
}

/// The loaded catalog. Construction is the only mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub root: System,
}

/// A split fully-qualified table name.
struct QualifiedName<'a> {
    system: &'a str,
    database: &'a str,
    schema: &'a str,
    table: &'a str,
}

fn split_qualified(fq_name: &str) -> EngineResult<QualifiedName<'_>> {
    let parts: Vec<&str> = fq_name.split('.').collect();
    match parts.as_slice() {
        [system, database, schema, table] => Ok(QualifiedName {
            system,
            database,
            schema,
            table,
        }),
        _ => Err(EngineError::malformed_name(fq_name)),
    }
}

impl Catalog {
    pub fn new(root: System) -> Self {
        Self { root }
    }

    /// Load a catalog from its JSON form.
    pub fn from_json_reader(reader: impl Read) -> EngineResult<Self> {
        let root: System = serde_json::from_reader(reader)
            .map_err(|e| EngineError::conversion(format!("cannot read catalog: {}", e)))?;
        Ok(Self { root })
    }

    /// Write the catalog back out as JSON.
    pub fn to_json_writer(&self, mut writer: impl Write) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(&self.root)
            .map_err(|e| EngineError::conversion(format!("cannot render catalog: {}", e)))?;
        writer.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Resolve a `system.database.schema.table` name to its table.
    pub fn find_table(&self, fq_name: &str) -> EngineResult<&Table> {
        let name = split_qualified(fq_name)?;

        if self.root.name != name.system {
            return Err(EngineError::not_found(NotFoundKind::System, name.system));
        }
        let database = self
            .root
            .databases
            .iter()
            .find(|d| d.name == name.database)
            .ok_or_else(|| EngineError::not_found(NotFoundKind::Database, name.database))?;
        let schema = database
            .schemas
            .iter()
            .find(|s| s.name == name.schema)
            .ok_or_else(|| EngineError::not_found(NotFoundKind::Schema, name.schema))?;
        schema
            .tables
            .iter()
            .find(|t| t.name == name.table)
            .ok_or_else(|| EngineError::not_found(NotFoundKind::Table, name.table))
    }

    /// Resolve a field within a fully-qualified table.
    pub fn find_field(&self, fq_name: &str, field_name: &str) -> EngineResult<&Field> {
        let table = self.find_table(fq_name)?;
        table
            .fields
            .iter()
            .find(|f| f.name == field_name)
            .ok_or_else(|| EngineError::not_found(NotFoundKind::Field, field_name))
    }
}
