//! In-memory entity sets and the helper operations over them.
//!
//! Each entity set declares its key fields (from the service metadata). All
//! lookups compare only those key fields, so an update payload carrying
//! extra or changed non-key fields still finds the stored record.

use crate::error::{MockServerError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A single record: field name to JSON value.
pub type Entity = Map<String, Value>;

/// A named collection of entities with declared key fields.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    keys: Vec<String>,
    entities: Vec<Entity>,
}

impl EntitySet {
    pub fn new(keys: Vec<String>, entities: Vec<Entity>) -> Self {
        Self { keys, entities }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

/// Store of all simulated entity sets.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    sets: HashMap<String, EntitySet>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an entity set.
    pub fn declare(&mut self, name: impl Into<String>, set: EntitySet) {
        self.sets.insert(name.into(), set);
    }

    /// Names of all declared entity sets.
    pub fn entity_set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    /// Declared key fields of an entity set.
    pub fn entity_set_keys(&self, name: &str) -> Option<&[String]> {
        self.sets.get(name).map(|set| set.keys())
    }

    /// Current records of an entity set.
    pub fn entity_set_data(&self, name: &str) -> Option<&[Entity]> {
        self.sets.get(name).map(|set| set.entities())
    }

    /// Replace the records of an already declared entity set.
    pub fn set_entity_set_data(&mut self, name: &str, entities: Vec<Entity>) -> Result<()> {
        let set = self
            .sets
            .get_mut(name)
            .ok_or_else(|| MockServerError::UnknownEntitySet(name.to_string()))?;
        set.entities = entities;
        Ok(())
    }

    /// List entities whose fields strictly equal every filter value.
    ///
    /// Without filters the whole set is returned in stored order.
    pub fn list(&self, name: &str, filters: Option<&Entity>) -> Vec<&Entity> {
        let Some(entities) = self.entity_set_data(name) else {
            return Vec::new();
        };
        match filters {
            Some(filters) if !filters.is_empty() => entities
                .iter()
                .filter(|entity| {
                    filters
                        .iter()
                        .all(|(field, expected)| strict_eq(entity.get(field), Some(expected)))
                })
                .collect(),
            _ => entities.iter().collect(),
        }
    }

    /// Find an entity by its key values, in declared key order.
    ///
    /// Returns `None` when the number of values differs from the number of
    /// declared key fields.
    pub fn by_id(&self, name: &str, keys: &[Value]) -> Option<&Entity> {
        let key_fields = self.entity_set_keys(name)?;
        if key_fields.len() != keys.len() {
            return None;
        }
        let filters: Entity = key_fields.iter().cloned().zip(keys.iter().cloned()).collect();
        self.list(name, Some(&filters)).into_iter().next()
    }

    /// Append an entity to a set.
    pub fn add(&mut self, name: &str, entity: Entity) -> Result<()> {
        let mut entities = self
            .entity_set_data(name)
            .ok_or_else(|| MockServerError::UnknownEntitySet(name.to_string()))?
            .to_vec();
        entities.push(entity);
        self.set_entity_set_data(name, entities)
    }

    /// Replace the stored entity with the same key values.
    ///
    /// Returns `false` when no entity matches.
    pub fn update(&mut self, name: &str, entity: Entity) -> bool {
        let Some((mut entities, pos)) = self.list_and_pos(name, &entity) else {
            return false;
        };
        entities[pos] = entity;
        self.set_entity_set_data(name, entities).is_ok()
    }

    /// Remove the stored entity with the same key values.
    ///
    /// Returns `false` when no entity matches.
    pub fn remove(&mut self, name: &str, entity: &Entity) -> bool {
        let Some((mut entities, pos)) = self.list_and_pos(name, entity) else {
            return false;
        };
        entities.remove(pos);
        self.set_entity_set_data(name, entities).is_ok()
    }

    fn list_and_pos(&self, name: &str, entity: &Entity) -> Option<(Vec<Entity>, usize)> {
        let set = self.sets.get(name)?;
        let filters: Vec<(&str, Option<&Value>)> = set
            .keys
            .iter()
            .map(|field| (field.as_str(), entity.get(field)))
            .collect();
        let pos = index_of(&set.entities, &filters)?;
        Some((set.entities.clone(), pos))
    }
}

/// Position of the first entity matching all key filters.
fn index_of(entities: &[Entity], filters: &[(&str, Option<&Value>)]) -> Option<usize> {
    entities.iter().position(|entity| {
        filters
            .iter()
            .all(|(field, expected)| strict_eq(entity.get(*field), *expected))
    })
}

/// Strict equality on optional JSON values; numbers compare by value.
fn strict_eq(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: Value) -> Entity {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected object"),
        }
    }

    fn alert_store() -> EntityStore {
        let mut store = EntityStore::new();
        store.declare(
            "AlertSet",
            EntitySet::new(
                vec!["Alertguid".to_string()],
                vec![
                    entity(json!({"Alertguid": "A1", "Title": "First", "Status": "Active"})),
                    entity(json!({"Alertguid": "A2", "Title": "Second", "Status": "Closed"})),
                    entity(json!({"Alertguid": "A3", "Title": "Third", "Status": "Active"})),
                ],
            ),
        );
        store.declare(
            "ItemSet",
            EntitySet::new(
                vec!["Order".to_string(), "Line".to_string()],
                vec![
                    entity(json!({"Order": "O1", "Line": 1, "Qty": 3})),
                    entity(json!({"Order": "O1", "Line": 2, "Qty": 5})),
                ],
            ),
        );
        store
    }

    #[test]
    fn test_list_without_filters_returns_all_in_order() {
        let store = alert_store();
        let all = store.list("AlertSet", None);
        let ids: Vec<_> = all.iter().map(|e| e["Alertguid"].as_str().unwrap()).collect();
        assert_eq!(ids, ["A1", "A2", "A3"]);
        assert_eq!(store.list("AlertSet", Some(&Entity::new())).len(), 3);
    }

    #[test]
    fn test_list_with_filters() {
        let store = alert_store();
        let active = store.list("AlertSet", Some(&entity(json!({"Status": "Active"}))));
        assert_eq!(active.len(), 2);

        let none = store.list(
            "AlertSet",
            Some(&entity(json!({"Status": "Active", "Title": "Second"}))),
        );
        assert!(none.is_empty());
    }

    #[test]
    fn test_list_unknown_set_is_empty() {
        assert!(alert_store().list("Nope", None).is_empty());
    }

    #[test]
    fn test_by_id() {
        let store = alert_store();
        let found = store.by_id("AlertSet", &[json!("A2")]).unwrap();
        assert_eq!(found["Title"], "Second");
        assert!(store.by_id("AlertSet", &[json!("A9")]).is_none());
    }

    #[test]
    fn test_by_id_arity_mismatch() {
        let store = alert_store();
        assert!(store.by_id("AlertSet", &[json!("A1"), json!("extra")]).is_none());
        assert!(store.by_id("ItemSet", &[json!("O1")]).is_none());
        assert_eq!(
            store.by_id("ItemSet", &[json!("O1"), json!(2)]).unwrap()["Qty"],
            5
        );
    }

    #[test]
    fn test_by_id_numeric_keys_compare_by_value() {
        let store = alert_store();
        assert!(store.by_id("ItemSet", &[json!("O1"), json!(2.0)]).is_some());
    }

    #[test]
    fn test_add() {
        let mut store = alert_store();
        store
            .add("AlertSet", entity(json!({"Alertguid": "A4", "Title": "Fourth"})))
            .unwrap();
        assert_eq!(store.list("AlertSet", None).len(), 4);
        assert_eq!(store.list("AlertSet", None)[3]["Alertguid"], "A4");

        let err = store.add("Nope", Entity::new()).unwrap_err();
        assert!(matches!(err, MockServerError::UnknownEntitySet(_)));
    }

    #[test]
    fn test_update_then_by_id() {
        let mut store = alert_store();
        let updated = store.update(
            "AlertSet",
            entity(json!({"Alertguid": "A2", "Title": "Changed", "Extra": 1})),
        );
        assert!(updated);
        let found = store.by_id("AlertSet", &[json!("A2")]).unwrap();
        assert_eq!(found["Title"], "Changed");
        assert_eq!(found["Extra"], 1);
        assert!(found.get("Status").is_none());
        // Position is preserved
        assert_eq!(store.list("AlertSet", None)[1]["Alertguid"], "A2");
    }

    #[test]
    fn test_update_unknown_key_leaves_store_unchanged() {
        let mut store = alert_store();
        let before: Vec<Entity> = store.list("AlertSet", None).into_iter().cloned().collect();
        assert!(!store.update("AlertSet", entity(json!({"Alertguid": "ZZ", "Title": "x"}))));
        let after: Vec<Entity> = store.list("AlertSet", None).into_iter().cloned().collect();
        assert_eq!(before, after);
        assert!(!store.update("Nope", Entity::new()));
    }

    #[test]
    fn test_remove_then_by_id() {
        let mut store = alert_store();
        assert!(store.remove("AlertSet", &entity(json!({"Alertguid": "A1"}))));
        assert!(store.by_id("AlertSet", &[json!("A1")]).is_none());
        assert_eq!(store.list("AlertSet", None).len(), 2);
        assert!(!store.remove("AlertSet", &entity(json!({"Alertguid": "A1"}))));
    }

    #[test]
    fn test_composite_key_update() {
        let mut store = alert_store();
        assert!(store.update("ItemSet", entity(json!({"Order": "O1", "Line": 1, "Qty": 10}))));
        assert_eq!(
            store.by_id("ItemSet", &[json!("O1"), json!(1)]).unwrap()["Qty"],
            10
        );
        assert_eq!(
            store.by_id("ItemSet", &[json!("O1"), json!(2)]).unwrap()["Qty"],
            5
        );
    }
}
