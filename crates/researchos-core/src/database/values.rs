//! Attribute value operations.
//!
//! A value write stores the encoded payload once under its content hash and
//! queues an association of (entity, attribute) to that hash. A later write
//! to the same slot supersedes the earlier association instead of erasing it.

use super::Database;
use crate::action::{Action, PendingSlot};
use crate::formats::{decode_with_limit, encode_value};
use crate::store::{Association, Mutation};
use crate::primitives::PREFIX_LEN;
use crate::registry::EntityKind;
use crate::{ActionId, AttributeKey, ContentHash, EntityId, Lookup, RosError, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

impl Database {
    /// Queue `value` as the new active value of (entity, attribute).
    ///
    /// The entity must be committed or created by `action`. Variable-keyed
    /// data values go through [`Database::set_data_value`] so they always
    /// decode as [`Value`].
    pub fn set_value<T: Serialize + ?Sized>(
        &self,
        action: &mut Action,
        entity: &EntityId,
        attribute: &AttributeKey,
        value: &T,
    ) -> Result<ContentHash, RosError> {
        if is_data_key(attribute) {
            return Err(RosError::Validation(format!(
                "Attribute {} is a variable, its values must be written with set_data_value",
                attribute
            )));
        }
        self.queue_value(action, entity, attribute, value)
    }

    /// Queue a data value of `variable` on `entity`.
    pub fn set_data_value(
        &self,
        action: &mut Action,
        entity: &EntityId,
        variable: &AttributeKey,
        value: &Value,
    ) -> Result<ContentHash, RosError> {
        if !is_data_key(variable) {
            return Err(RosError::Validation(format!(
                "Attribute {} is not a variable",
                variable
            )));
        }
        self.queue_value(action, entity, variable, value)
    }

    fn queue_value<T: Serialize + ?Sized>(
        &self,
        action: &mut Action,
        entity: &EntityId,
        attribute: &AttributeKey,
        value: &T,
    ) -> Result<ContentHash, RosError> {
        if self.entity_kind(entity, Some(action))?.is_none() {
            return Err(RosError::Reference(format!(
                "Cannot set {} on unknown entity {}",
                attribute, entity
            )));
        }

        let (hash, payload) = encode_value(value)?;
        if payload.len() > self.config.max_value_size {
            return Err(RosError::Validation(format!(
                "Value for {} is {} bytes, limit is {}",
                attribute,
                payload.len(),
                self.config.max_value_size
            )));
        }

        if !action.pending_blob(&hash) && self.store().blob(&hash)?.is_none() {
            action.queue(Mutation::PutBlob { hash, payload });
        }
        action.queue(Mutation::Associate {
            entity: entity.clone(),
            attribute: attribute.clone(),
            hash,
        });
        Ok(hash)
    }

    /// Current value of (entity, attribute).
    pub fn lookup<T: DeserializeOwned>(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Lookup<T>, RosError> {
        let rows = self.store().associations(entity, attribute)?;
        match rows.iter().rev().find(|r| r.is_active()) {
            Some(row) => Ok(Lookup::Value(self.read_blob(&row.hash)?)),
            None => Ok(Lookup::NotAssociated),
        }
    }

    /// Current value of (entity, attribute), or a `NotAssociated` error.
    pub fn get<T: DeserializeOwned>(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<T, RosError> {
        self.lookup(entity, attribute)?
            .into_option()
            .ok_or_else(|| RosError::NotAssociated {
                entity: entity.clone(),
                attribute: attribute.clone(),
            })
    }

    /// Value of (entity, attribute) as it stood right after `action` committed.
    pub fn lookup_as_of<T: DeserializeOwned>(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
        action: &ActionId,
    ) -> Result<Lookup<T>, RosError> {
        let record = self
            .store()
            .action(action)?
            .ok_or_else(|| RosError::NotFound(format!("Action {} was never committed", action)))?;
        let rows = self.store().associations(entity, attribute)?;
        match rows.iter().rev().find(|r| r.active_at(record.seq)) {
            Some(row) => Ok(Lookup::Value(self.read_blob(&row.hash)?)),
            None => Ok(Lookup::NotAssociated),
        }
    }

    /// Value written to (entity, attribute) by `action`, active or not.
    pub fn value_for_action<T: DeserializeOwned>(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
        action: &ActionId,
    ) -> Result<Option<T>, RosError> {
        let rows = self.store().associations(entity, attribute)?;
        rows.iter()
            .find(|r| &r.action_id == action)
            .map(|row| self.read_blob(&row.hash))
            .transpose()
    }

    /// Every association ever written to (entity, attribute), oldest first.
    pub fn history(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Vec<Association>, RosError> {
        self.store().associations(entity, attribute)
    }

    /// Active attribute keys of an entity.
    pub fn attributes(&self, entity: &EntityId) -> Result<Vec<AttributeKey>, RosError> {
        Ok(self
            .store()
            .active_associations(entity)?
            .into_iter()
            .map(|r| r.attribute)
            .collect())
    }

    /// Queue deactivation of (entity, attribute).
    ///
    /// Built-in attributes cannot be deleted. The slot must be active once
    /// the pending queue is taken into account.
    pub fn delete_value(
        &self,
        action: &mut Action,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<(), RosError> {
        if attribute.is_builtin() {
            return Err(RosError::Validation(format!(
                "Attribute {} is built-in and cannot be deleted",
                attribute
            )));
        }
        let active = match action.pending_slot(entity, attribute) {
            Some(PendingSlot::Set(_)) => true,
            Some(PendingSlot::Deleted) => false,
            None => self.lookup_hash(entity, attribute)?.is_some(),
        };
        if !active {
            return Err(RosError::NotAssociated {
                entity: entity.clone(),
                attribute: attribute.clone(),
            });
        }
        action.queue(Mutation::Deactivate {
            entity: entity.clone(),
            attribute: attribute.clone(),
        });
        Ok(())
    }

    /// Number of distinct stored payloads.
    pub fn blob_count(&self) -> Result<usize, RosError> {
        self.store().blob_count()
    }

    fn lookup_hash(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Option<ContentHash>, RosError> {
        Ok(self
            .store()
            .associations(entity, attribute)?
            .into_iter()
            .rev()
            .find(Association::is_active)
            .map(|r| r.hash))
    }

    fn read_blob<T: DeserializeOwned>(&self, hash: &ContentHash) -> Result<T, RosError> {
        let payload = self
            .store()
            .blob(hash)?
            .ok_or_else(|| RosError::NotFound(format!("Value blob {} is missing", hash)))?;
        decode_with_limit(&payload, self.config.max_value_size)
    }
}

/// Data values are keyed by the id of their Variable.
fn is_data_key(attribute: &AttributeKey) -> bool {
    attribute.as_str().get(..PREFIX_LEN) == Some(EntityKind::Variable.prefix())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use crate::registry::EntityKind;
    use crate::{AttributeKey, Config, Database, EntityId, Lookup, RosError, Value};

    fn setup() -> (Database, EntityId) {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("setup").expect("action");
        let sb = db.create_entity(&mut action, EntityKind::Subject).expect("create");
        db.commit(action).expect("commit");
        (db, sb)
    }

    #[test]
    fn identical_values_share_one_blob() {
        let (mut db, sb) = setup();
        let mut action = db.begin_action("write").expect("action");
        db.set_data_value(&mut action, &sb, &AttributeKey::from("VRa"), &Value::Int(7))
            .expect("set");
        db.set_data_value(&mut action, &sb, &AttributeKey::from("VRb"), &Value::Int(7))
            .expect("set");
        db.commit(action).expect("commit");
        assert_eq!(db.blob_count().expect("count"), 1);

        let mut action = db.begin_action("again").expect("action");
        db.set_data_value(&mut action, &sb, &AttributeKey::from("VRc"), &Value::Int(7))
            .expect("set");
        // blob already stored, only the association is queued
        assert_eq!(action.len(), 1);
        db.commit(action).expect("commit");
        assert_eq!(db.blob_count().expect("count"), 1);
    }

    #[test]
    fn delete_then_lookup_is_not_associated() {
        let (mut db, sb) = setup();
        let attr = AttributeKey::from("VRage");

        let mut action = db.begin_action("write").expect("action");
        db.set_data_value(&mut action, &sb, &attr, &Value::Int(10)).expect("set");
        let written = action.id().clone();
        db.commit(action).expect("commit");

        let mut action = db.begin_action("delete").expect("action");
        db.delete_value(&mut action, &sb, &attr).expect("delete");
        assert!(matches!(
            db.delete_value(&mut action, &sb, &attr),
            Err(RosError::NotAssociated { .. })
        ));
        db.commit(action).expect("commit");

        assert_eq!(
            db.lookup::<Value>(&sb, &attr).expect("lookup"),
            Lookup::NotAssociated
        );
        assert_eq!(
            db.value_for_action::<Value>(&sb, &attr, &written)
                .expect("history"),
            Some(Value::Int(10))
        );
        assert!(db.get::<Value>(&sb, &attr).is_err());
    }

    #[test]
    fn null_is_a_value_not_absence() {
        let (mut db, sb) = setup();
        let attr = AttributeKey::from("VRnote");
        let mut action = db.begin_action("write").expect("action");
        db.set_data_value(&mut action, &sb, &attr, &Value::Null).expect("set");
        db.commit(action).expect("commit");
        assert_eq!(
            db.lookup::<Value>(&sb, &attr).expect("lookup"),
            Lookup::Value(Value::Null)
        );
    }

    #[test]
    fn builtin_attributes_cannot_be_deleted() {
        let (db, sb) = setup();
        let mut action = db.begin_action("delete").expect("action");
        assert!(matches!(
            db.delete_value(&mut action, &sb, &AttributeKey::from("name")),
            Err(RosError::Validation(_))
        ));
    }

    #[test]
    fn as_of_reads_earlier_state() {
        let (mut db, sb) = setup();
        let attr = AttributeKey::from("VRage");

        let mut first = db.begin_action("v1").expect("action");
        db.set_data_value(&mut first, &sb, &attr, &Value::Int(1)).expect("set");
        let first_id = first.id().clone();
        db.commit(first).expect("commit");

        let mut second = db.begin_action("v2").expect("action");
        db.set_data_value(&mut second, &sb, &attr, &Value::Int(2)).expect("set");
        db.commit(second).expect("commit");

        assert_eq!(
            db.lookup_as_of::<Value>(&sb, &attr, &first_id).expect("as of"),
            Lookup::Value(Value::Int(1))
        );
        assert_eq!(db.get::<Value>(&sb, &attr).expect("get"), Value::Int(2));
        let history = db.history(&sb, &attr).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|r| r.is_active()).count(), 1);
    }

    #[test]
    fn data_value_requires_known_entity() {
        let (db, _) = setup();
        let mut action = db.begin_action("write").expect("action");
        let result = db.set_data_value(
            &mut action,
            &EntityId::from("SBmissing"),
            &AttributeKey::from("VRage"),
            &Value::Int(1),
        );
        assert!(matches!(result, Err(RosError::Reference(_))));
    }

    #[test]
    fn variable_values_must_be_values() {
        let (mut db, sb) = setup();
        let attr = AttributeKey::from("VRage");
        let mut action = db.begin_action("write").expect("action");
        assert!(matches!(
            db.set_value(&mut action, &sb, &attr, &0i64),
            Err(RosError::Validation(_))
        ));
        assert!(action.is_empty());
        db.set_data_value(&mut action, &sb, &attr, &Value::Int(0))
            .expect("set");
        db.commit(action).expect("commit");
        assert_eq!(
            db.lookup::<Value>(&sb, &attr).expect("lookup"),
            Lookup::Value(Value::Int(0))
        );
    }

    #[test]
    fn data_values_need_a_variable_key() {
        let (db, sb) = setup();
        let mut action = db.begin_action("write").expect("action");
        assert!(matches!(
            db.set_data_value(&mut action, &sb, &AttributeKey::from("name"), &Value::Int(1)),
            Err(RosError::Validation(_))
        ));
    }
}
