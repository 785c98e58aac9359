//! Core types for Tessera
//!
//! This crate defines the attribute data model shared by every layer:
//! - IdentityId: Opaque identifier of the entity that owns attributes
//! - AttributeType: Closed set of value kinds with validation/conversion rules
//! - AttributeDefinition: Immutable schema entry (name, kind payload, default)
//! - EntityAttributeRecord: Mutable per-identity map of raw attribute values
//! - Error: Error taxonomy (schema, validation, conversion, backend)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute_type;
pub mod definition;
pub mod error;
pub mod record;
pub mod types;

pub use attribute_type::{AttributeType, SqlClass, TypedValue};
pub use definition::{
    column_name, default_permission_node, AttributeDefinition, DefinitionKind, COLUMN_PREFIX,
    PERMISSION_NODE_PREFIX,
};
pub use error::{
    BackendError, ConversionError, Error, Result, SchemaError, ValidationError,
};
pub use record::EntityAttributeRecord;
pub use types::IdentityId;
