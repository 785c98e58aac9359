//! Attribute definitions
//!
//! An `AttributeDefinition` is an immutable schema entry. The per-type
//! payload lives in `DefinitionKind`, so an enum carries its value list and a
//! permission carries its node, and nothing else carries either.
//!
//! ## Column naming
//!
//! Each definition maps to one column: `info_` followed by the lowercased
//! name with every character outside `[a-z0-9_]` replaced by `_`. Distinct
//! names can collide (`a-b` and `a_b`); the registry rejects the second one.

use crate::attribute_type::{split_multi, AttributeType, TypedValue};
use crate::error::{ConversionError, ValidationError};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Prefix of every attribute column
pub const COLUMN_PREFIX: &str = "info_";

/// Derive the column identifier for an attribute name
pub fn column_name(name: &str) -> String {
    let mut column = String::with_capacity(COLUMN_PREFIX.len() + name.len());
    column.push_str(COLUMN_PREFIX);
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            column.push(c);
        } else {
            column.push('_');
        }
    }
    column
}

/// Prefix of permission nodes synthesized for definitions that declare none
pub const PERMISSION_NODE_PREFIX: &str = "tessera.permission.";

/// Permission node used when a permission attribute declares none
pub fn default_permission_node(name: &str) -> String {
    format!("{}{}", PERMISSION_NODE_PREFIX, name.to_lowercase())
}

/// Type-specific payload of a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Integer attribute
    Integer,
    /// Free text attribute
    Text,
    /// UUID attribute
    Identifier,
    /// Single choice out of `values`
    Enum {
        /// Allowed values, in declared order
        values: Vec<String>,
    },
    /// Any subset of `values`
    MultiEnum {
        /// Allowed values, in declared order
        values: Vec<String>,
    },
    /// Ordered steps, lowest first
    Ladder {
        /// Steps, in declared order
        values: Vec<String>,
    },
    /// Boolean bound to a permission node
    Permission {
        /// Permission node granted while the flag is true
        node: String,
    },
}

impl DefinitionKind {
    /// Discriminant of this payload
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            DefinitionKind::Integer => AttributeType::Integer,
            DefinitionKind::Text => AttributeType::Text,
            DefinitionKind::Identifier => AttributeType::Identifier,
            DefinitionKind::Enum { .. } => AttributeType::Enum,
            DefinitionKind::MultiEnum { .. } => AttributeType::MultiEnum,
            DefinitionKind::Ladder { .. } => AttributeType::Ladder,
            DefinitionKind::Permission { .. } => AttributeType::Permission,
        }
    }

    fn values(&self) -> &[String] {
        match self {
            DefinitionKind::Enum { values }
            | DefinitionKind::MultiEnum { values }
            | DefinitionKind::Ladder { values } => values,
            _ => &[],
        }
    }
}

/// Immutable schema entry for one attribute
///
/// Identity is the (case-sensitive) name. The default value always validates
/// against the definition itself, provided list kinds carry at least one value.
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    name: String,
    kind: DefinitionKind,
    default_value: String,
}

impl AttributeDefinition {
    /// Build a definition, resolving the default value
    ///
    /// - A declared default that validates is kept.
    /// - A declared default that does not validate is replaced by the first
    ///   listed value for enum/ladder/multi-enum, or the type's canonical
    ///   default otherwise.
    /// - No declared default: enum and ladder start at their first value,
    ///   every other kind uses the canonical default.
    pub fn new(name: impl Into<String>, kind: DefinitionKind, default: Option<String>) -> Self {
        let mut definition = AttributeDefinition {
            name: name.into(),
            kind,
            default_value: String::new(),
        };
        definition.default_value = definition.resolve_default(default);
        definition
    }

    fn resolve_default(&self, declared: Option<String>) -> String {
        let ty = self.attribute_type();
        match declared {
            Some(value) if ty.validate(&value, self) => ty
                .convert(&value)
                .map(|typed| typed.to_raw())
                .unwrap_or(value),
            Some(_) => match self.kind.values().first() {
                Some(first) => first.clone(),
                None => ty.canonical_default(),
            },
            None => match (&self.kind, self.kind.values().first()) {
                (DefinitionKind::Enum { .. } | DefinitionKind::Ladder { .. }, Some(first)) => {
                    first.clone()
                }
                _ => ty.canonical_default(),
            },
        }
    }

    /// Attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type-specific payload
    pub fn kind(&self) -> &DefinitionKind {
        &self.kind
    }

    /// Value kind
    pub fn attribute_type(&self) -> AttributeType {
        self.kind.attribute_type()
    }

    /// Resolved default value
    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    /// Allowed values for enum, multi-enum and ladder definitions; empty otherwise
    pub fn values(&self) -> &[String] {
        self.kind.values()
    }

    /// Permission node, for permission definitions
    pub fn permission_node(&self) -> Option<&str> {
        match &self.kind {
            DefinitionKind::Permission { node } => Some(node),
            _ => None,
        }
    }

    /// Column identifier backing this attribute
    pub fn column_name(&self) -> String {
        column_name(&self.name)
    }

    /// Whether `raw` is acceptable for this attribute
    pub fn is_valid_value(&self, raw: &str) -> bool {
        self.attribute_type().validate(raw, self)
    }

    /// Whether the resolved default passes this definition's own validator
    pub fn is_self_consistent(&self) -> bool {
        self.is_valid_value(&self.default_value)
    }

    /// Convert a raw value with this definition's type
    pub fn convert(&self, raw: &str) -> Result<TypedValue, ConversionError> {
        self.attribute_type().convert(raw)
    }

    /// Validate `raw` and return the form every backend stores and reads back
    ///
    /// Booleans become `true`/`false`, integers lose signs and leading zeros,
    /// identifiers are lowercased and multi-enum tokens are trimmed.
    pub fn canonicalize(&self, raw: &str) -> Result<String, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            name: self.name.clone(),
            value: raw.to_string(),
        };
        if !self.is_valid_value(raw) {
            return Err(invalid());
        }
        self.convert(raw)
            .map(|typed| typed.to_raw())
            .map_err(|_| invalid())
    }

    /// Next step for enum and ladder definitions
    ///
    /// Clamped at the last value. Values outside the list, and other kinds,
    /// return `current` unchanged.
    pub fn next_value(&self, current: &str) -> String {
        match &self.kind {
            DefinitionKind::Enum { values } | DefinitionKind::Ladder { values } => {
                match values.iter().position(|v| v == current) {
                    Some(i) if i + 1 < values.len() => values[i + 1].clone(),
                    _ => current.to_string(),
                }
            }
            _ => current.to_string(),
        }
    }

    /// Previous step for enum and ladder definitions, clamped at the first value
    pub fn previous_value(&self, current: &str) -> String {
        match &self.kind {
            DefinitionKind::Enum { values } | DefinitionKind::Ladder { values } => {
                match values.iter().position(|v| v == current) {
                    Some(i) if i > 0 => values[i - 1].clone(),
                    _ => current.to_string(),
                }
            }
            _ => current.to_string(),
        }
    }

    /// Split a stored multi-enum value into its selections
    pub fn parse_multi(&self, raw: &str) -> Vec<String> {
        split_multi(raw)
    }

    /// Join selections into the stored multi-enum form
    pub fn format_multi(&self, selections: &[String]) -> String {
        selections.join(",")
    }

    /// Whether `value` is among the selections in `current`
    pub fn is_selected(&self, current: &str, value: &str) -> bool {
        split_multi(current).iter().any(|s| s == value)
    }

    /// Add `value` to the selections in `current`, or remove it if present
    pub fn toggle(&self, current: &str, value: &str) -> String {
        let mut selections = split_multi(current);
        if let Some(pos) = selections.iter().position(|s| s == value) {
            selections.remove(pos);
        } else {
            selections.push(value.to_string());
        }
        self.format_multi(&selections)
    }
}

impl PartialEq for AttributeDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AttributeDefinition {}

impl Hash for AttributeDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for AttributeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, default '{}')",
            self.name,
            self.attribute_type(),
            self.default_value
        )
    }
}
