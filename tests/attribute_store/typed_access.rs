//! Typed accessors and validation through the public facade

use crate::common::*;
use tessera::{AttributeType, Error, IdentityId, TypedValue, ValidationError};
use uuid::Uuid;

#[test]
fn invalid_values_are_rejected_without_change() {
    let t = TestStore::new();
    let id = IdentityId::new();
    assert!(t.set(id, "Steve", "rank", "vip"));

    assert!(!t.set(id, "Steve", "rank", "owner"));
    assert!(!t.set(id, "Steve", "coins", "1.5"));
    assert!(!t.set(id, "Steve", "partner", "not-a-uuid"));
    assert!(!t.set(id, "Steve", "fly", "yes"));
    assert!(!t.set(id, "Steve", "colors", "red,purple"));

    assert_eq!(t.get(id, "Steve", "rank").as_deref(), Some("vip"));
    assert!(matches!(
        t.try_set(id, "Steve", "rank", "owner"),
        Err(Error::Validation(ValidationError::InvalidValue { .. }))
    ));
}

#[test]
fn typed_reads_convert() {
    let t = TestStore::new();
    let id = IdentityId::new();
    let partner = Uuid::new_v4();
    t.set_uuid(id, "Steve", "partner", Some(partner));
    t.toggle(id, "Steve", "colors", "blue");

    assert_eq!(
        t.try_get_typed(id, "Steve", "partner").unwrap(),
        TypedValue::Identifier(partner)
    );
    assert_eq!(
        t.try_get_typed(id, "Steve", "colors").unwrap(),
        TypedValue::MultiEnum(vec!["blue".to_string()])
    );
    assert_eq!(t.get_bool(id, "Steve", "fly"), Some(false));
}

#[test]
fn boolean_attributes_toggle_through_set_bool() {
    let t = TestStore::new();
    let id = IdentityId::new();
    assert!(t.set_bool(id, "Steve", "fly", true));
    assert_eq!(t.get_bool(id, "Steve", "fly"), Some(true));
    assert!(!t.set_bool(id, "Steve", "coins", true));

    let t = t.reopen();
    assert_eq!(t.get_bool(id, "Steve", "fly"), Some(true));
}

#[test]
fn schema_introspection() {
    let t = TestStore::new();
    assert_eq!(t.type_of("rank"), Some(AttributeType::Ladder));
    assert_eq!(t.default_value("partner"), Some(Uuid::nil().hyphenated().to_string()));
    assert!(t.is_valid_value("colors", "green,red"));
    assert!(!t.is_valid_value("colors", "pink"));
    assert_eq!(
        t.definition("fly").unwrap().permission_node(),
        Some("tessera.fly")
    );
    let ladders: Vec<_> = t
        .by_type(AttributeType::Ladder)
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    assert_eq!(ladders, vec!["rank"]);
    assert_eq!(t.definitions().len(), 6);
}
