//! Per-identity attribute record
//!
//! A record maps attribute names to raw strings. An absent key means "use the
//! definition's default"; the repository fills those gaps on read. Typed
//! setters all funnel through `set`.

use crate::types::IdentityId;
use std::collections::HashMap;
use uuid::Uuid;

/// Mutable attribute values of one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAttributeRecord {
    id: IdentityId,
    display_name: String,
    values: HashMap<String, String>,
}

impl EntityAttributeRecord {
    /// Create an empty record
    pub fn new(id: IdentityId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            values: HashMap::new(),
        }
    }

    /// Create a record with initial values
    pub fn with_values(
        id: IdentityId,
        display_name: impl Into<String>,
        values: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            values,
        }
    }

    /// Owning identity
    pub fn id(&self) -> IdentityId {
        self.id
    }

    /// Last-seen display name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Replace the display name
    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    /// Raw value, if explicitly set
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Raw value or `default`
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Set a raw value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Remove a value, returning it if it was set
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    /// Whether a value is explicitly set
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Integer value, or `default` if unset or not an integer
    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Set an integer value
    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.set(name, value.to_string());
    }

    /// Add `delta` to an integer value, starting from `default` when unset
    ///
    /// Returns the new value, or None on overflow (record unchanged).
    pub fn add_int(&mut self, name: &str, delta: i64, default: i64) -> Option<i64> {
        let updated = self.get_int(name, default).checked_add(delta)?;
        self.set_int(name, updated);
        Some(updated)
    }

    /// Boolean value; only case-insensitive `true` reads as true
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(v) => v.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    /// Set a boolean value
    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.set(name, value.to_string());
    }

    /// Identifier value, or None if unset or malformed
    pub fn get_uuid(&self, name: &str) -> Option<Uuid> {
        self.get(name).and_then(|v| Uuid::parse_str(v).ok())
    }

    /// Set an identifier value; None removes it
    pub fn set_uuid(&mut self, name: impl Into<String>, value: Option<Uuid>) {
        let name = name.into();
        match value {
            Some(uuid) => self.set(name, uuid.hyphenated().to_string()),
            None => {
                self.values.remove(&name);
            }
        }
    }

    /// All explicitly set values
    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Number of explicitly set values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value is explicitly set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove every value
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
