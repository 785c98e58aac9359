//! Attribute value kinds
//!
//! Every attribute is stored as a raw string. `AttributeType` decides which
//! strings are acceptable for a definition, how they convert to a typed
//! value, and which storage class the backing column uses.

use crate::definition::AttributeDefinition;
use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of attribute value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// Signed 64-bit integer, supports add/subtract
    Integer,
    /// Free text
    Text,
    /// UUID in textual form
    Identifier,
    /// One value out of a fixed list
    Enum,
    /// Any subset of a fixed list, stored comma-separated
    MultiEnum,
    /// Ordered list supporting promote/demote
    Ladder,
    /// Boolean stored as `true`/`false`
    Permission,
}

/// Storage class of the column backing an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlClass {
    /// Integer column
    Numeric,
    /// Text column
    Text,
    /// Boolean-ish column (dialect specific)
    Boolean,
}

/// Typed form of a raw attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    /// Integer value
    Integer(i64),
    /// Text value
    Text(String),
    /// Identifier value
    Identifier(Uuid),
    /// Selected enum value
    Enum(String),
    /// Selected multi-enum values in stored order
    MultiEnum(Vec<String>),
    /// Current ladder step
    Ladder(String),
    /// Permission flag
    Permission(bool),
}

impl AttributeType {
    /// All variants, in declaration order
    pub const ALL: [AttributeType; 7] = [
        AttributeType::Integer,
        AttributeType::Text,
        AttributeType::Identifier,
        AttributeType::Enum,
        AttributeType::MultiEnum,
        AttributeType::Ladder,
        AttributeType::Permission,
    ];

    /// Check whether `raw` is acceptable for `definition`
    ///
    /// Enum, ladder and multi-enum membership is checked against the
    /// definition's value list.
    pub fn validate(&self, raw: &str, definition: &AttributeDefinition) -> bool {
        match self {
            AttributeType::Integer => raw.parse::<i64>().is_ok(),
            AttributeType::Text => true,
            AttributeType::Identifier => parse_hyphenated(raw).is_some(),
            AttributeType::Enum | AttributeType::Ladder => {
                definition.values().iter().any(|v| v == raw)
            }
            AttributeType::MultiEnum => {
                if raw.is_empty() {
                    return true;
                }
                let allowed = definition.values();
                raw.split(',')
                    .all(|token| allowed.iter().any(|v| v == token.trim()))
            }
            AttributeType::Permission => parse_bool(raw).is_some(),
        }
    }

    /// Convert a raw value to its typed form
    ///
    /// Callers validate first; conversion of invalid input fails instead of
    /// truncating.
    pub fn convert(&self, raw: &str) -> Result<TypedValue, ConversionError> {
        match self {
            AttributeType::Integer => raw
                .parse::<i64>()
                .map(TypedValue::Integer)
                .map_err(|_| ConversionError::NotInteger {
                    value: raw.to_string(),
                }),
            AttributeType::Text => Ok(TypedValue::Text(raw.to_string())),
            AttributeType::Identifier => parse_hyphenated(raw)
                .map(TypedValue::Identifier)
                .ok_or_else(|| ConversionError::NotIdentifier {
                    value: raw.to_string(),
                }),
            AttributeType::Enum => Ok(TypedValue::Enum(raw.to_string())),
            AttributeType::MultiEnum => Ok(TypedValue::MultiEnum(split_multi(raw))),
            AttributeType::Ladder => Ok(TypedValue::Ladder(raw.to_string())),
            AttributeType::Permission => parse_bool(raw)
                .map(TypedValue::Permission)
                .ok_or_else(|| ConversionError::NotBoolean {
                    value: raw.to_string(),
                }),
        }
    }

    /// Canonical default used when a definition declares none (or an invalid one)
    ///
    /// Identifier defaults to the nil UUID so the default is stable across calls.
    pub fn canonical_default(&self) -> String {
        match self {
            AttributeType::Integer => "0".to_string(),
            AttributeType::Text
            | AttributeType::Enum
            | AttributeType::MultiEnum
            | AttributeType::Ladder => String::new(),
            AttributeType::Identifier => Uuid::nil().hyphenated().to_string(),
            AttributeType::Permission => "false".to_string(),
        }
    }

    /// Storage class of the backing column
    pub fn sql_class(&self) -> SqlClass {
        match self {
            AttributeType::Integer => SqlClass::Numeric,
            AttributeType::Permission => SqlClass::Boolean,
            _ => SqlClass::Text,
        }
    }

    /// Whether definitions of this type carry a value list
    pub fn has_value_list(&self) -> bool {
        matches!(
            self,
            AttributeType::Enum | AttributeType::MultiEnum | AttributeType::Ladder
        )
    }

    /// Name as used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Integer => "integer",
            AttributeType::Text => "text",
            AttributeType::Identifier => "identifier",
            AttributeType::Enum => "enum",
            AttributeType::MultiEnum => "multienum",
            AttributeType::Ladder => "ladder",
            AttributeType::Permission => "permission",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Integer => "Integer",
            AttributeType::Text => "Text",
            AttributeType::Identifier => "Identifier",
            AttributeType::Enum => "Enum",
            AttributeType::MultiEnum => "MultiEnum",
            AttributeType::Ladder => "Ladder",
            AttributeType::Permission => "Permission",
        };
        f.write_str(name)
    }
}

impl FromStr for AttributeType {
    type Err = String;

    /// Case-insensitive; accepts the short aliases found in older config files
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(AttributeType::Integer),
            "string" | "text" => Ok(AttributeType::Text),
            "uuid" | "identifier" => Ok(AttributeType::Identifier),
            "enum" => Ok(AttributeType::Enum),
            "multienum" | "multi_enum" | "multi-enum" => Ok(AttributeType::MultiEnum),
            "ladder" => Ok(AttributeType::Ladder),
            "permission" | "boolean" | "bool" => Ok(AttributeType::Permission),
            other => Err(other.to_string()),
        }
    }
}

impl TypedValue {
    /// The kind this value belongs to
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            TypedValue::Integer(_) => AttributeType::Integer,
            TypedValue::Text(_) => AttributeType::Text,
            TypedValue::Identifier(_) => AttributeType::Identifier,
            TypedValue::Enum(_) => AttributeType::Enum,
            TypedValue::MultiEnum(_) => AttributeType::MultiEnum,
            TypedValue::Ladder(_) => AttributeType::Ladder,
            TypedValue::Permission(_) => AttributeType::Permission,
        }
    }

    /// Raw string form, as stored
    pub fn to_raw(&self) -> String {
        match self {
            TypedValue::Integer(i) => i.to_string(),
            TypedValue::Text(s) | TypedValue::Enum(s) | TypedValue::Ladder(s) => s.clone(),
            TypedValue::Identifier(u) => u.hyphenated().to_string(),
            TypedValue::MultiEnum(values) => values.join(","),
            TypedValue::Permission(b) => b.to_string(),
        }
    }
}

/// Case-insensitive `true`/`false`
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Hyphenated 8-4-4-4-12 form only; simple, braced and urn forms are rejected
fn parse_hyphenated(raw: &str) -> Option<Uuid> {
    if raw.len() != 36 {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

/// Split a stored multi-enum value into trimmed tokens
pub(crate) fn split_multi(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AttributeDefinition, DefinitionKind};

    fn list(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_integer_validation() {
        let def = AttributeDefinition::new("coins", DefinitionKind::Integer, None);
        assert!(AttributeType::Integer.validate("42", &def));
        assert!(AttributeType::Integer.validate("-7", &def));
        assert!(!AttributeType::Integer.validate("4.2", &def));
        assert!(!AttributeType::Integer.validate("", &def));
        assert!(!AttributeType::Integer.validate("ten", &def));
    }

    #[test]
    fn test_identifier_validation() {
        let def = AttributeDefinition::new("partner", DefinitionKind::Identifier, None);
        assert!(AttributeType::Identifier.validate("6f1c7d52-3b62-4b5e-9a3c-0d1e2f3a4b5c", &def));
        assert!(!AttributeType::Identifier.validate("6f1c7d52", &def));
        for other_form in [
            "6f1c7d523b624b5e9a3c0d1e2f3a4b5c",
            "{6f1c7d52-3b62-4b5e-9a3c-0d1e2f3a4b5c}",
            "urn:uuid:6f1c7d52-3b62-4b5e-9a3c-0d1e2f3a4b5c",
        ] {
            assert!(!AttributeType::Identifier.validate(other_form, &def));
        }
    }

    #[test]
    fn test_enum_and_ladder_membership() {
        let def = AttributeDefinition::new(
            "class",
            DefinitionKind::Enum {
                values: list(&["warrior", "mage"]),
            },
            None,
        );
        assert!(AttributeType::Enum.validate("mage", &def));
        assert!(!AttributeType::Enum.validate("Mage", &def));
        assert!(!AttributeType::Enum.validate("", &def));

        let ladder = AttributeDefinition::new(
            "rank",
            DefinitionKind::Ladder {
                values: list(&["member", "vip"]),
            },
            None,
        );
        assert!(AttributeType::Ladder.validate("vip", &ladder));
        assert!(!AttributeType::Ladder.validate("admin", &ladder));
    }

    #[test]
    fn test_multi_enum_validation() {
        let def = AttributeDefinition::new(
            "colors",
            DefinitionKind::MultiEnum {
                values: list(&["red", "blue", "green"]),
            },
            None,
        );
        assert!(AttributeType::MultiEnum.validate("", &def));
        assert!(AttributeType::MultiEnum.validate("red", &def));
        assert!(AttributeType::MultiEnum.validate("red, green", &def));
        assert!(!AttributeType::MultiEnum.validate("red,purple", &def));
        assert!(!AttributeType::MultiEnum.validate("red,", &def));
    }

    #[test]
    fn test_permission_validation_is_case_insensitive() {
        let def = AttributeDefinition::new(
            "fly",
            DefinitionKind::Permission {
                node: "perm.fly".to_string(),
            },
            None,
        );
        assert!(AttributeType::Permission.validate("true", &def));
        assert!(AttributeType::Permission.validate("FALSE", &def));
        assert!(!AttributeType::Permission.validate("yes", &def));
        assert!(!AttributeType::Permission.validate("1", &def));
    }

    #[test]
    fn test_convert_rejects_invalid_input() {
        assert_eq!(
            AttributeType::Integer.convert("12x"),
            Err(ConversionError::NotInteger {
                value: "12x".to_string()
            })
        );
        assert!(AttributeType::Identifier.convert("nope").is_err());
        assert!(AttributeType::Permission.convert("maybe").is_err());
        // Out of range is an error, not a truncation
        assert!(AttributeType::Integer.convert("99999999999999999999").is_err());
    }

    #[test]
    fn test_convert_typed_values() {
        assert_eq!(
            AttributeType::Integer.convert("-30").unwrap(),
            TypedValue::Integer(-30)
        );
        assert_eq!(
            AttributeType::Permission.convert("True").unwrap(),
            TypedValue::Permission(true)
        );
        assert_eq!(
            AttributeType::MultiEnum.convert("red, green").unwrap(),
            TypedValue::MultiEnum(list(&["red", "green"]))
        );
        assert_eq!(
            AttributeType::MultiEnum.convert("").unwrap(),
            TypedValue::MultiEnum(Vec::new())
        );
    }

    #[test]
    fn test_canonical_defaults() {
        assert_eq!(AttributeType::Integer.canonical_default(), "0");
        assert_eq!(AttributeType::Text.canonical_default(), "");
        assert_eq!(AttributeType::Permission.canonical_default(), "false");
        let id = AttributeType::Identifier.canonical_default();
        assert_eq!(id, "00000000-0000-0000-0000-000000000000");
        // Stable across calls
        assert_eq!(id, AttributeType::Identifier.canonical_default());
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("INT".parse::<AttributeType>(), Ok(AttributeType::Integer));
        assert_eq!("string".parse::<AttributeType>(), Ok(AttributeType::Text));
        assert_eq!("UUID".parse::<AttributeType>(), Ok(AttributeType::Identifier));
        assert_eq!("MultiEnum".parse::<AttributeType>(), Ok(AttributeType::MultiEnum));
        assert!("float".parse::<AttributeType>().is_err());
    }

    #[test]
    fn test_sql_class() {
        assert_eq!(AttributeType::Integer.sql_class(), SqlClass::Numeric);
        assert_eq!(AttributeType::Permission.sql_class(), SqlClass::Boolean);
        assert_eq!(AttributeType::Ladder.sql_class(), SqlClass::Text);
    }

    #[test]
    fn test_typed_value_to_raw() {
        assert_eq!(TypedValue::Integer(70).to_raw(), "70");
        assert_eq!(TypedValue::Permission(false).to_raw(), "false");
        assert_eq!(
            TypedValue::MultiEnum(list(&["red", "green"])).to_raw(),
            "red,green"
        );
    }
}
