use std::fmt;

/// The catalog level at which a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    System,
    Database,
    Schema,
    Table,
    Field,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::System => write!(f, "system"),
            NotFoundKind::Database => write!(f, "database"),
            NotFoundKind::Schema => write!(f, "schema"),
            NotFoundKind::Table => write!(f, "table"),
            NotFoundKind::Field => write!(f, "field"),
        }
    }
}

/// Errors raised while loading plans and catalogs or while processing rows.
///
/// Load-time variants (plan, catalog, code generation, operator init) abort
/// engine start. Row-time variants (parse, conversion) are logged with row
/// context by the driver, counted, and the offending row is dropped.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Structural violation in a serialized or deserialized plan
    MalformedPlan { message: String },

    /// An enum ordinal outside the known set was read from the wire
    UnknownEnum { what: String, ordinal: u8 },

    /// A window node is missing one of its positional properties
    MissingRequiredProperty { property: String },

    /// A fully-qualified name did not have four dotted segments
    MalformedName { name: String },

    /// A catalog lookup missed at some level of the tree
    NotFound { kind: NotFoundKind, name: String },

    /// A raw ingress token could not be converted to its field type
    ParseError {
        field: String,
        value: String,
        message: String,
    },

    /// A value could not be coerced to a declared output type
    ConversionError { message: String },

    /// A predicate compares types with no common comparison domain
    IncompatibleTypes {
        field: String,
        left: String,
        right: String,
    },

    /// An aggregate call references a functor name that does not exist
    UnknownFunction { name: String },

    /// Cooperative stop was requested
    Cancelled,

    /// I/O failure on the source or sink
    Io { message: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MalformedPlan { message } => {
                write!(f, "malformed plan: {}", message)
            }
            EngineError::UnknownEnum { what, ordinal } => {
                write!(f, "unknown {} ordinal {}", what, ordinal)
            }
            EngineError::MissingRequiredProperty { property } => {
                write!(f, "missing required window property '{}'", property)
            }
            EngineError::MalformedName { name } => {
                write!(
                    f,
                    "malformed name '{}': expected system.database.schema.table",
                    name
                )
            }
            EngineError::NotFound { kind, name } => {
                write!(f, "cannot find {} '{}'", kind, name)
            }
            EngineError::ParseError {
                field,
                value,
                message,
            } => {
                write!(
                    f,
                    "parse error for field '{}' with value '{}': {}",
                    field, value, message
                )
            }
            EngineError::ConversionError { message } => {
                write!(f, "conversion error: {}", message)
            }
            EngineError::IncompatibleTypes { field, left, right } => {
                write!(
                    f,
                    "incompatible types for field '{}': cannot compare {} with {}",
                    field, left, right
                )
            }
            EngineError::UnknownFunction { name } => {
                write!(f, "unknown function name: {}", name)
            }
            EngineError::Cancelled => write!(f, "cancellation requested"),
            EngineError::Io { message } => write!(f, "i/o error: {}", message),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            message: err.to_string(),
        }
    }
}

impl EngineError {
    /// Create a malformed-plan error
    pub fn malformed_plan(message: impl Into<String>) -> Self {
        EngineError::MalformedPlan {
            message: message.into(),
        }
    }

    /// Create an unknown-enum error for a wire ordinal
    pub fn unknown_enum(what: impl Into<String>, ordinal: u8) -> Self {
        EngineError::UnknownEnum {
            what: what.into(),
            ordinal,
        }
    }

    /// Create a missing-property error
    pub fn missing_property(property: impl Into<String>) -> Self {
        EngineError::MissingRequiredProperty {
            property: property.into(),
        }
    }

    /// Create a malformed-name error
    pub fn malformed_name(name: impl Into<String>) -> Self {
        EngineError::MalformedName { name: name.into() }
    }

    /// Create a not-found error naming the missing catalog level
    pub fn not_found(kind: NotFoundKind, name: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a per-row parse error naming the field and raw value
    pub fn parse_error(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        EngineError::ParseError {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        EngineError::ConversionError {
            message: message.into(),
        }
    }

    /// Create an incompatible-types error for a predicate leaf
    pub fn incompatible_types(
        field: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        EngineError::IncompatibleTypes {
            field: field.into(),
            left: left.into(),
            right: right.into(),
        }
    }

    /// Create an unknown-function error
    pub fn unknown_function(name: impl Into<String>) -> Self {
        EngineError::UnknownFunction { name: name.into() }
    }

    /// True for errors the driver attributes to a single row and drops
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            EngineError::ParseError { .. } | EngineError::ConversionError { .. }
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
