//! Error types for Tessera
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! | Group | Raised by | Propagation |
//! |-------|-----------|-------------|
//! | `SchemaError` | definition loading | logged, entry skipped |
//! | `ValidationError` | typed mutations | negative result to the caller |
//! | `ConversionError` | `AttributeType::convert` | typed `Err` |
//! | `BackendError` | storage backends | fatal in lifecycle phases, negative result otherwise |

use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent attribute definition
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Caller-supplied value or attribute rejected
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Raw value could not be converted to its typed form
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// I/O error (config files, database directory)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background worker pool rejected or lost a task
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Errors raised while building attribute definitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Entry has no `type` key
    #[error("no type specified for attribute '{name}'")]
    MissingType {
        /// Attribute name
        name: String,
    },

    /// Entry names a type that does not exist
    #[error("invalid type '{type_name}' for attribute '{name}'")]
    UnknownType {
        /// Attribute name
        name: String,
        /// Type name as written in the source
        type_name: String,
    },

    /// Enum, ladder or multi-enum without any values
    #[error("no values specified for {kind} attribute '{name}'")]
    EmptyValues {
        /// Attribute name
        name: String,
        /// Human-readable kind
        kind: String,
    },

    /// Two attribute names sanitize to the same column identifier
    #[error("attribute '{name}' maps to column '{column}' already used by '{existing}'")]
    ColumnCollision {
        /// Rejected attribute name
        name: String,
        /// Shared column identifier
        column: String,
        /// Attribute that already owns the column
        existing: String,
    },

    /// Entry is not a table or has malformed fields
    #[error("invalid entry for attribute '{name}': {reason}")]
    InvalidEntry {
        /// Attribute name
        name: String,
        /// What was wrong
        reason: String,
    },

    /// Source document could not be parsed at all
    #[error("failed to parse definition source: {0}")]
    Parse(String),
}

/// Errors returned when a caller-supplied mutation is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No definition with that name
    #[error("unknown attribute '{name}'")]
    UnknownAttribute {
        /// Attribute name
        name: String,
    },

    /// Value fails the definition's validator
    #[error("invalid value '{value}' for attribute '{name}'")]
    InvalidValue {
        /// Attribute name
        name: String,
        /// Rejected value
        value: String,
    },

    /// Operation requires a different attribute type
    #[error("attribute '{name}' is {actual}, operation requires {expected}")]
    WrongType {
        /// Attribute name
        name: String,
        /// Required type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// Integer arithmetic would overflow
    #[error("integer overflow updating attribute '{name}'")]
    Overflow {
        /// Attribute name
        name: String,
    },
}

/// Errors returned by raw-to-typed conversion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Not a base-10 integer in range
    #[error("'{value}' is not an integer")]
    NotInteger {
        /// Rejected value
        value: String,
    },

    /// Not UUID text
    #[error("'{value}' is not an identifier")]
    NotIdentifier {
        /// Rejected value
        value: String,
    },

    /// Not `true`/`false`
    #[error("'{value}' is not a boolean")]
    NotBoolean {
        /// Rejected value
        value: String,
    },
}

/// Errors raised by storage backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Operation attempted before `initialize` or after `shutdown`
    #[error("backend is not initialized")]
    NotInitialized,

    /// Could not open a connection or build the pool
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement failed
    #[error("query failed: {0}")]
    Query(String),

    /// Adding a column failed
    #[error("migration of column '{column}' failed: {reason}")]
    Migration {
        /// Column being added
        column: String,
        /// Driver message
        reason: String,
    },

    /// Batch transaction failed and was rolled back
    #[error("transaction rolled back: {0}")]
    Transaction(String),

    /// Filesystem error while preparing the store
    #[error("I/O failure: {0}")]
    Io(String),
}
