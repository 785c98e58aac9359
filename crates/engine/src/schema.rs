//! Attribute definition registry
//!
//! Definitions are loaded from a TOML document with one table per attribute,
//! in document order:
//!
//! ```toml
//! [rank]
//! type = "ladder"
//! ladder = ["member", "vip", "premium", "admin"]
//! default = "member"
//! ```
//!
//! The registry publishes an immutable `DefinitionSet`. Reload, insert and
//! remove build a new set and swap it in under the write lock, so a reader
//! holding a snapshot never sees a half-applied change.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tessera_core::{
    default_permission_node, AttributeDefinition, AttributeType, DefinitionKind, Error, Result,
    SchemaError,
};
use toml::Value;
use tracing::{info, warn};

/// Definitions file name placed in the data directory
pub const ATTRIBUTES_FILE_NAME: &str = "attributes.toml";

/// Immutable, ordered set of definitions with name and column indexes
#[derive(Debug, Default)]
pub struct DefinitionSet {
    ordered: Vec<Arc<AttributeDefinition>>,
    by_name: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
}

impl DefinitionSet {
    /// Set with no definitions
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set, skipping entries that collide with earlier ones
    ///
    /// A repeated name or a column identifier already taken by another name
    /// is reported and the later entry is dropped.
    pub fn build(
        definitions: impl IntoIterator<Item = Arc<AttributeDefinition>>,
    ) -> (Self, Vec<SchemaError>) {
        let mut set = Self::default();
        let mut errors = Vec::new();
        for definition in definitions {
            if let Err(err) = set.push(definition) {
                errors.push(err);
            }
        }
        (set, errors)
    }

    fn push(
        &mut self,
        definition: Arc<AttributeDefinition>,
    ) -> std::result::Result<(), SchemaError> {
        if self.by_name.contains_key(definition.name()) {
            return Err(SchemaError::InvalidEntry {
                name: definition.name().to_string(),
                reason: "duplicate attribute name".to_string(),
            });
        }
        let column = definition.column_name();
        if let Some(&idx) = self.by_column.get(&column) {
            return Err(SchemaError::ColumnCollision {
                name: definition.name().to_string(),
                column,
                existing: self.ordered[idx].name().to_string(),
            });
        }
        let idx = self.ordered.len();
        self.by_name.insert(definition.name().to_string(), idx);
        self.by_column.insert(column, idx);
        self.ordered.push(definition);
        Ok(())
    }

    /// Copy of this set with `definition` added, replacing any same-named entry
    fn with_inserted(
        &self,
        definition: Arc<AttributeDefinition>,
    ) -> std::result::Result<Self, SchemaError> {
        let mut next = Self::default();
        for existing in self.ordered.iter().filter(|d| d.name() != definition.name()) {
            next.push(Arc::clone(existing))?;
        }
        next.push(definition)?;
        Ok(next)
    }

    /// Copy of this set without `name`
    fn without(&self, name: &str) -> Self {
        let (next, _) = Self::build(
            self.ordered
                .iter()
                .filter(|d| d.name() != name)
                .cloned(),
        );
        next
    }

    /// Definition by name
    pub fn get(&self, name: &str) -> Option<&Arc<AttributeDefinition>> {
        self.by_name.get(name).map(|&idx| &self.ordered[idx])
    }

    /// Whether a definition exists
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All definitions in load order
    pub fn all(&self) -> &[Arc<AttributeDefinition>] {
        &self.ordered
    }

    /// Definitions of one type, in load order
    pub fn by_type(&self, ty: AttributeType) -> Vec<Arc<AttributeDefinition>> {
        self.ordered
            .iter()
            .filter(|d| d.attribute_type() == ty)
            .cloned()
            .collect()
    }

    /// Names in load order
    pub fn names(&self) -> Vec<String> {
        self.ordered.iter().map(|d| d.name().to_string()).collect()
    }

    /// Definition owning a column identifier
    pub fn by_column(&self, column: &str) -> Option<&Arc<AttributeDefinition>> {
        self.by_column.get(column).map(|&idx| &self.ordered[idx])
    }

    /// Resolved default of a definition
    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|d| d.default_value())
    }

    /// Type of a definition
    pub fn type_of(&self, name: &str) -> Option<AttributeType> {
        self.get(name).map(|d| d.attribute_type())
    }

    /// Whether `raw` is valid for the named definition; false if unknown
    pub fn is_valid_value(&self, name: &str, raw: &str) -> bool {
        self.get(name).is_some_and(|d| d.is_valid_value(raw))
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Holder of the current definition snapshot
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    current: RwLock<Arc<DefinitionSet>>,
}

impl DefinitionRegistry {
    /// Registry with no definitions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry publishing `set`
    pub fn from_set(set: DefinitionSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Registry loaded from a TOML source; per-entry problems are logged and skipped
    pub fn from_toml(source: &str) -> Result<Self> {
        let registry = Self::new();
        registry.load_str(source)?;
        Ok(registry)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<DefinitionSet> {
        Arc::clone(&self.current.read())
    }

    /// Replace every definition with those parsed from `source`
    ///
    /// Returns the per-entry errors that caused entries to be skipped. Fails
    /// only when the document itself cannot be parsed, in which case the
    /// current set is left in place.
    pub fn load_str(&self, source: &str) -> Result<Vec<SchemaError>> {
        let (definitions, mut errors) = parse_definitions(source)?;
        let (set, collisions) = DefinitionSet::build(definitions.into_iter().map(Arc::new));
        errors.extend(collisions);
        for err in &errors {
            warn!(target: "tessera::schema", error = %err, "Skipping attribute definition");
        }
        info!(
            target: "tessera::schema",
            loaded = set.len(),
            skipped = errors.len(),
            "Attribute definitions loaded"
        );
        *self.current.write() = Arc::new(set);
        Ok(errors)
    }

    /// Replace every definition with those in the file at `path`
    pub fn load_file(&self, path: &Path) -> Result<Vec<SchemaError>> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read attributes file '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.load_str(&source)
    }

    /// Add or replace one definition
    pub fn insert(&self, definition: AttributeDefinition) -> Result<Arc<AttributeDefinition>> {
        let definition = Arc::new(definition);
        let mut current = self.current.write();
        let next = current.with_inserted(Arc::clone(&definition))?;
        *current = Arc::new(next);
        info!(
            target: "tessera::schema",
            attribute = %definition.name(),
            kind = %definition.attribute_type(),
            "Attribute definition added"
        );
        Ok(definition)
    }

    /// Remove one definition; its column stays in the backend
    pub fn remove(&self, name: &str) -> Option<Arc<AttributeDefinition>> {
        let mut current = self.current.write();
        let removed = current.get(name).cloned()?;
        *current = Arc::new(current.without(name));
        info!(target: "tessera::schema", attribute = %name, "Attribute definition removed");
        Some(removed)
    }

    /// Definition by name
    pub fn get(&self, name: &str) -> Option<Arc<AttributeDefinition>> {
        self.snapshot().get(name).cloned()
    }

    /// Whether a definition exists
    pub fn has(&self, name: &str) -> bool {
        self.snapshot().has(name)
    }

    /// All definitions in load order
    pub fn all(&self) -> Vec<Arc<AttributeDefinition>> {
        self.snapshot().all().to_vec()
    }

    /// Definitions of one type
    pub fn by_type(&self, ty: AttributeType) -> Vec<Arc<AttributeDefinition>> {
        self.snapshot().by_type(ty)
    }

    /// Names in load order
    pub fn names(&self) -> Vec<String> {
        self.snapshot().names()
    }

    /// Definition owning a column identifier
    pub fn by_column(&self, column: &str) -> Option<Arc<AttributeDefinition>> {
        self.snapshot().by_column(column).cloned()
    }

    /// Resolved default of a definition
    pub fn default_value(&self, name: &str) -> Option<String> {
        self.snapshot().default_value(name).map(str::to_string)
    }

    /// Type of a definition
    pub fn type_of(&self, name: &str) -> Option<AttributeType> {
        self.snapshot().type_of(name)
    }

    /// Whether `raw` is valid for the named definition
    pub fn is_valid_value(&self, name: &str, raw: &str) -> bool {
        self.snapshot().is_valid_value(name, raw)
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no definition is loaded
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Parse a definitions document into definitions and per-entry errors
///
/// Fails only if `source` is not a TOML document.
pub fn parse_definitions(
    source: &str,
) -> std::result::Result<(Vec<AttributeDefinition>, Vec<SchemaError>), SchemaError> {
    let table: toml::Table = source
        .parse()
        .map_err(|e: toml::de::Error| SchemaError::Parse(e.to_string()))?;
    let mut definitions = Vec::with_capacity(table.len());
    let mut errors = Vec::new();
    for (name, value) in &table {
        match parse_entry(name, value) {
            Ok(definition) => definitions.push(definition),
            Err(err) => errors.push(err),
        }
    }
    Ok((definitions, errors))
}

fn parse_entry(name: &str, value: &Value) -> std::result::Result<AttributeDefinition, SchemaError> {
    let table = value.as_table().ok_or_else(|| invalid(name, "expected a table"))?;
    let type_name = match table.get("type") {
        None => {
            return Err(SchemaError::MissingType {
                name: name.to_string(),
            })
        }
        Some(Value::String(s)) => s,
        Some(_) => return Err(invalid(name, "type must be a string")),
    };
    let ty: AttributeType = type_name.parse().map_err(|_| SchemaError::UnknownType {
        name: name.to_string(),
        type_name: type_name.clone(),
    })?;
    let default = table
        .get("default")
        .map(|v| scalar_text(name, "default", v))
        .transpose()?;

    let kind = match ty {
        AttributeType::Integer => DefinitionKind::Integer,
        AttributeType::Text => DefinitionKind::Text,
        AttributeType::Identifier => DefinitionKind::Identifier,
        AttributeType::Enum => DefinitionKind::Enum {
            values: value_list(name, table, ty)?,
        },
        AttributeType::MultiEnum => DefinitionKind::MultiEnum {
            values: value_list(name, table, ty)?,
        },
        AttributeType::Ladder => DefinitionKind::Ladder {
            values: value_list(name, table, ty)?,
        },
        AttributeType::Permission => DefinitionKind::Permission {
            node: match table.get("permission-node") {
                Some(v) => scalar_text(name, "permission-node", v)?,
                None => default_permission_node(name),
            },
        },
    };
    Ok(AttributeDefinition::new(name, kind, default))
}

fn value_list(
    name: &str,
    table: &toml::Table,
    ty: AttributeType,
) -> std::result::Result<Vec<String>, SchemaError> {
    let raw = table.get("values").or_else(|| table.get("ladder"));
    let values = match raw {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| scalar_text(name, "values", v).map(|s| s.trim().to_string()))
            .filter(|r| !matches!(r, Ok(s) if s.is_empty()))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid(name, "values must be an array")),
    };
    if values.is_empty() {
        return Err(SchemaError::EmptyValues {
            name: name.to_string(),
            kind: ty.as_str().to_string(),
        });
    }
    Ok(values)
}

fn scalar_text(name: &str, key: &str, value: &Value) -> std::result::Result<String, SchemaError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        _ => Err(invalid(name, &format!("{} must be a scalar", key))),
    }
}

fn invalid(name: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidEntry {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Render definitions back into the TOML layout `parse_definitions` reads
pub fn render_definitions(definitions: &[Arc<AttributeDefinition>]) -> String {
    let mut root = toml::Table::new();
    for definition in definitions {
        let mut entry = toml::Table::new();
        entry.insert(
            "type".to_string(),
            Value::String(definition.attribute_type().as_str().to_string()),
        );
        match definition.kind() {
            DefinitionKind::Ladder { values } => {
                entry.insert("ladder".to_string(), string_array(values));
            }
            DefinitionKind::Enum { values } | DefinitionKind::MultiEnum { values } => {
                entry.insert("values".to_string(), string_array(values));
            }
            DefinitionKind::Permission { node } => {
                entry.insert("permission-node".to_string(), Value::String(node.clone()));
            }
            DefinitionKind::Integer | DefinitionKind::Text | DefinitionKind::Identifier => {}
        }
        let default = match definition.kind() {
            DefinitionKind::Integer => definition
                .default_value()
                .parse::<i64>()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::String(definition.default_value().to_string())),
            DefinitionKind::Permission { .. } => {
                Value::Boolean(definition.default_value().eq_ignore_ascii_case("true"))
            }
            _ => Value::String(definition.default_value().to_string()),
        };
        entry.insert("default".to_string(), default);
        root.insert(definition.name().to_string(), Value::Table(entry));
    }
    root.to_string()
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// Write the sample definitions file if it does not already exist
pub fn write_default_if_missing(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::write(path, default_toml()).map_err(|e| {
            Error::Config(format!(
                "Failed to write default attributes file '{}': {}",
                path.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Sample definitions written on first start
pub fn default_toml() -> &'static str {
    r#"# Tessera attribute definitions
#
# One table per attribute. Keys:
#   type             int | string | uuid | enum | multienum | ladder | permission
#   default          default value (optional)
#   values           allowed values for enum and multienum
#   ladder           ordered steps for ladder (lowest first)
#   permission-node  node bound to a permission attribute
#                    (default: tessera.permission.<name>)

[coins]
type = "int"
default = 0

[rank]
type = "ladder"
ladder = ["member", "vip", "premium", "admin"]
default = "member"

[colors]
type = "multienum"
values = ["red", "blue", "green"]

[nickname]
type = "string"

[fly]
type = "permission"
default = false
permission-node = "tessera.fly"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_file_loads_cleanly() {
        let registry = DefinitionRegistry::new();
        let errors = registry.load_str(default_toml()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(
            registry.names(),
            vec!["coins", "rank", "colors", "nickname", "fly"]
        );
        assert_eq!(registry.default_value("rank").as_deref(), Some("member"));
        assert_eq!(registry.default_value("colors").as_deref(), Some(""));
        assert_eq!(registry.type_of("fly"), Some(AttributeType::Permission));
    }

    #[test]
    fn bad_entries_are_skipped_and_reported() {
        let source = r#"
[ok]
type = "int"

[notype]
default = "x"

[weird]
type = "float"

[empty]
type = "enum"
values = []
"#;
        let registry = DefinitionRegistry::new();
        let errors = registry.load_str(source).unwrap();
        assert_eq!(registry.names(), vec!["ok"]);
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], SchemaError::MissingType { .. }));
        assert!(matches!(errors[1], SchemaError::UnknownType { .. }));
        assert!(matches!(errors[2], SchemaError::EmptyValues { .. }));
    }

    #[test]
    fn unparseable_document_keeps_current_set() {
        let registry = DefinitionRegistry::from_toml(default_toml()).unwrap();
        assert!(registry.load_str("[[[").is_err());
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn column_collision_rejects_second_entry() {
        let source = r#"
["a-b"]
type = "int"

[a_b]
type = "string"
"#;
        let registry = DefinitionRegistry::new();
        let errors = registry.load_str(source).unwrap();
        assert_eq!(registry.names(), vec!["a-b"]);
        assert_eq!(
            errors,
            vec![SchemaError::ColumnCollision {
                name: "a_b".to_string(),
                column: "info_a_b".to_string(),
                existing: "a-b".to_string(),
            }]
        );
    }

    #[test]
    fn invalid_list_default_falls_back_to_first_value() {
        let registry = DefinitionRegistry::from_toml(
            r#"
[rank]
type = "ladder"
values = ["member", "vip"]
default = "owner"
"#,
        )
        .unwrap();
        assert_eq!(registry.default_value("rank").as_deref(), Some("member"));
    }

    #[test]
    fn permission_node_is_synthesized() {
        let registry = DefinitionRegistry::from_toml("[Fly]\ntype = \"permission\"\n").unwrap();
        let def = registry.get("Fly").unwrap();
        assert_eq!(def.permission_node(), Some("tessera.permission.fly"));
        assert_eq!(def.default_value(), "false");
    }

    #[test]
    fn snapshot_is_stable_across_reload() {
        let registry = DefinitionRegistry::from_toml(default_toml()).unwrap();
        let before = registry.snapshot();
        registry.load_str("[only]\ntype = \"int\"\n").unwrap();
        assert_eq!(before.len(), 5);
        assert_eq!(registry.names(), vec!["only"]);
    }

    #[test]
    fn insert_replaces_and_remove_drops() {
        let registry = DefinitionRegistry::from_toml(default_toml()).unwrap();
        registry
            .insert(AttributeDefinition::new(
                "coins",
                DefinitionKind::Integer,
                Some("10".to_string()),
            ))
            .unwrap();
        assert_eq!(registry.default_value("coins").as_deref(), Some("10"));
        assert_eq!(registry.len(), 5);

        let err = registry
            .insert(AttributeDefinition::new("Coins", DefinitionKind::Text, None))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::ColumnCollision { .. })));

        assert!(registry.remove("coins").is_some());
        assert!(registry.remove("coins").is_none());
        assert!(registry.by_column("info_coins").is_none());
    }

    #[test]
    fn rendered_definitions_parse_back() {
        let registry = DefinitionRegistry::from_toml(default_toml()).unwrap();
        let rendered = render_definitions(&registry.all());
        let reparsed = DefinitionRegistry::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.names(), registry.names());
        for def in registry.all() {
            let other = reparsed.get(def.name()).unwrap();
            assert_eq!(other.kind(), def.kind());
            assert_eq!(other.default_value(), def.default_value());
        }
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ATTRIBUTES_FILE_NAME);
        std::fs::write(&path, "[custom]\ntype = \"int\"\n").unwrap();
        write_default_if_missing(&path).unwrap();
        let registry = DefinitionRegistry::new();
        registry.load_file(&path).unwrap();
        assert_eq!(registry.names(), vec!["custom"]);
    }
}
