//! # redb-backed Store
//!
//! A disk-backed [`Store`] using the redb embedded database.
//!
//! - ACID transactions: one Action is one write transaction
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Rows are postcard-encoded. Composite keys are redb tuples so that the
//! history of one (entity, attribute) slot is a contiguous key range.

use super::{
    Association, EdgeRecord, EntityRecord, Mutation, Relation, SchemaRecord, Store,
    entity_exists_error, missing_blob_error, missing_edge_error, missing_relation_error,
};
use crate::action::{Action, ActionRecord};
use crate::formats::{decode, encode};
use crate::{ActionId, AttributeKey, ContentHash, EntityId, RosError};
use redb::{
    Database, ReadOnlyTable, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use std::path::Path;

/// ActionId -> ActionRecord
const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// EntityId -> EntityRecord
const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// ContentHash -> payload
const BLOBS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("value_blobs");

/// (entity, attribute, seq) -> Association
const ASSOCIATIONS: TableDefinition<(&str, &str, u64), &[u8]> =
    TableDefinition::new("associations");

/// (dataset, seq) -> SchemaRecord
const SCHEMAS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("hierarchy_schema");

/// (dataset, parent, child) -> Relation
const RELATIONS: TableDefinition<(&str, &str, &str), &[u8]> =
    TableDefinition::new("hierarchy_relations");

/// EdgeId -> EdgeRecord
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("pipeline_edges");

/// Metadata: key string -> u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_SEQ_KEY: &str = "next_seq";

fn io_err(e: impl std::fmt::Display) -> RosError {
    RosError::IoError(e.to_string())
}

/// A disk-backed store using redb.
pub struct RedbStore {
    db: Database,
    /// Sequence number the next commit receives.
    next_seq: u64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RosError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(ACTIONS).map_err(io_err)?;
            let _ = write_txn.open_table(ENTITIES).map_err(io_err)?;
            let _ = write_txn.open_table(BLOBS).map_err(io_err)?;
            let _ = write_txn.open_table(ASSOCIATIONS).map_err(io_err)?;
            let _ = write_txn.open_table(SCHEMAS).map_err(io_err)?;
            let _ = write_txn.open_table(RELATIONS).map_err(io_err)?;
            let _ = write_txn.open_table(EDGES).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        let next_seq = {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(METADATA).map_err(io_err)?;
            table
                .get(NEXT_SEQ_KEY)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(1)
        };

        tracing::debug!(path = %path.as_ref().display(), next_seq, "opened redb store");
        Ok(Self { db, next_seq })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), RosError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    fn read_table<K, V>(
        &self,
        definition: TableDefinition<K, V>,
    ) -> Result<ReadOnlyTable<K, V>, RosError>
    where
        K: redb::Key + 'static,
        V: redb::Value + 'static,
    {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        read_txn.open_table(definition).map_err(io_err)
    }
}

// =============================================================================
// STORE TRAIT IMPLEMENTATION
// =============================================================================

impl Store for RedbStore {
    fn commit(&mut self, action: &Action) -> Result<ActionRecord, RosError> {
        let seq = self.next_seq;
        let record = action.record(seq);
        let action_id = action.id();

        // Dropping the transaction on any error below aborts it.
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut actions = write_txn.open_table(ACTIONS).map_err(io_err)?;
            let mut entities = write_txn.open_table(ENTITIES).map_err(io_err)?;
            let mut blobs = write_txn.open_table(BLOBS).map_err(io_err)?;
            let mut associations = write_txn.open_table(ASSOCIATIONS).map_err(io_err)?;
            let mut schemas = write_txn.open_table(SCHEMAS).map_err(io_err)?;
            let mut relations = write_txn.open_table(RELATIONS).map_err(io_err)?;
            let mut edges = write_txn.open_table(EDGES).map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;

            if actions.get(action_id.as_str()).map_err(io_err)?.is_some() {
                return Err(RosError::Validation(format!(
                    "Action {} is already committed",
                    action_id
                )));
            }

            for (position, mutation) in action.mutations().iter().enumerate() {
                match mutation {
                    Mutation::CreateEntity { id, kind } => {
                        if entities.get(id.as_str()).map_err(io_err)?.is_some() {
                            return Err(entity_exists_error(id));
                        }
                        let row = encode(&EntityRecord {
                            id: id.clone(),
                            kind: *kind,
                            action_id: action_id.clone(),
                            seq,
                            position: position as u32,
                        })?;
                        entities
                            .insert(id.as_str(), row.as_slice())
                            .map_err(io_err)?;
                    }
                    Mutation::PutBlob { hash, payload } => {
                        let key = hash.as_bytes().as_slice();
                        if blobs.get(key).map_err(io_err)?.is_none() {
                            blobs.insert(key, payload.as_slice()).map_err(io_err)?;
                        }
                    }
                    Mutation::Associate {
                        entity,
                        attribute,
                        hash,
                    } => {
                        if blobs
                            .get(hash.as_bytes().as_slice())
                            .map_err(io_err)?
                            .is_none()
                        {
                            return Err(missing_blob_error(hash));
                        }
                        let (e, a) = (entity.as_str(), attribute.as_str());
                        let mut superseded = Vec::new();
                        for entry in associations
                            .range((e, a, 0u64)..=(e, a, u64::MAX))
                            .map_err(io_err)?
                        {
                            let (_, value) = entry.map_err(io_err)?;
                            let row: Association = decode(value.value())?;
                            if row.is_active() && row.seq != seq {
                                superseded.push(row);
                            }
                        }
                        for mut row in superseded {
                            row.deactivated_at = Some(seq);
                            let bytes = encode(&row)?;
                            associations
                                .insert((e, a, row.seq), bytes.as_slice())
                                .map_err(io_err)?;
                        }
                        let bytes = encode(&Association {
                            entity: entity.clone(),
                            attribute: attribute.clone(),
                            action_id: action_id.clone(),
                            hash: *hash,
                            seq,
                            deactivated_at: None,
                        })?;
                        associations
                            .insert((e, a, seq), bytes.as_slice())
                            .map_err(io_err)?;
                    }
                    Mutation::Deactivate { entity, attribute } => {
                        let (e, a) = (entity.as_str(), attribute.as_str());
                        let mut active = Vec::new();
                        for entry in associations
                            .range((e, a, 0u64)..=(e, a, u64::MAX))
                            .map_err(io_err)?
                        {
                            let (_, value) = entry.map_err(io_err)?;
                            let row: Association = decode(value.value())?;
                            if row.is_active() {
                                active.push(row);
                            }
                        }
                        if active.is_empty() {
                            return Err(RosError::NotAssociated {
                                entity: entity.clone(),
                                attribute: attribute.clone(),
                            });
                        }
                        for mut row in active {
                            row.deactivated_at = Some(seq);
                            let bytes = encode(&row)?;
                            associations
                                .insert((e, a, row.seq), bytes.as_slice())
                                .map_err(io_err)?;
                        }
                    }
                    Mutation::SetSchema {
                        dataset,
                        schema_json,
                    } => {
                        let bytes = encode(&SchemaRecord {
                            dataset: dataset.clone(),
                            schema_json: schema_json.clone(),
                            action_id: action_id.clone(),
                            seq,
                        })?;
                        schemas
                            .insert((dataset.as_str(), seq), bytes.as_slice())
                            .map_err(io_err)?;
                    }
                    Mutation::Relate {
                        dataset,
                        parent,
                        child,
                    } => {
                        let bytes = encode(&Relation {
                            dataset: dataset.clone(),
                            parent: parent.clone(),
                            child: child.clone(),
                            action_id: action_id.clone(),
                            is_active: true,
                        })?;
                        relations
                            .insert(
                                (dataset.as_str(), parent.as_str(), child.as_str()),
                                bytes.as_slice(),
                            )
                            .map_err(io_err)?;
                    }
                    Mutation::Unrelate {
                        dataset,
                        parent,
                        child,
                    } => {
                        let key = (dataset.as_str(), parent.as_str(), child.as_str());
                        let existing: Option<Relation> = relations
                            .get(key)
                            .map_err(io_err)?
                            .map(|v| decode(v.value()))
                            .transpose()?;
                        let mut row = existing
                            .filter(|r| r.is_active)
                            .ok_or_else(|| missing_relation_error(parent, child))?;
                        row.is_active = false;
                        let bytes = encode(&row)?;
                        relations.insert(key, bytes.as_slice()).map_err(io_err)?;
                    }
                    Mutation::AddEdge {
                        id,
                        source_object_id,
                        source_port,
                        target_object_id,
                        target_port,
                    } => {
                        let bytes = encode(&EdgeRecord {
                            id: id.clone(),
                            source_object_id: source_object_id.clone(),
                            source_port: source_port.clone(),
                            target_object_id: target_object_id.clone(),
                            target_port: target_port.clone(),
                            action_id: action_id.clone(),
                            is_active: true,
                        })?;
                        edges.insert(id.as_str(), bytes.as_slice()).map_err(io_err)?;
                    }
                    Mutation::DeactivateEdge { id } => {
                        let existing: Option<EdgeRecord> = edges
                            .get(id.as_str())
                            .map_err(io_err)?
                            .map(|v| decode(v.value()))
                            .transpose()?;
                        let mut row = existing
                            .filter(|r| r.is_active)
                            .ok_or_else(|| missing_edge_error(id))?;
                        row.is_active = false;
                        let bytes = encode(&row)?;
                        edges.insert(id.as_str(), bytes.as_slice()).map_err(io_err)?;
                    }
                }
            }

            let bytes = encode(&record)?;
            actions
                .insert(action_id.as_str(), bytes.as_slice())
                .map_err(io_err)?;
            meta.insert(NEXT_SEQ_KEY, seq.saturating_add(1))
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        // Update in-memory state only after successful commit.
        self.next_seq = seq.saturating_add(1);
        Ok(record)
    }

    fn action(&self, id: &ActionId) -> Result<Option<ActionRecord>, RosError> {
        let table = self.read_table(ACTIONS)?;
        table
            .get(id.as_str())
            .map_err(io_err)?
            .map(|v| decode(v.value()))
            .transpose()
    }

    fn actions(&self) -> Result<Vec<ActionRecord>, RosError> {
        let table = self.read_table(ACTIONS)?;
        let mut actions = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            actions.push(decode::<ActionRecord>(value.value())?);
        }
        actions.sort_by_key(|a| a.seq);
        Ok(actions)
    }

    fn entity(&self, id: &EntityId) -> Result<Option<EntityRecord>, RosError> {
        let table = self.read_table(ENTITIES)?;
        table
            .get(id.as_str())
            .map_err(io_err)?
            .map(|v| decode(v.value()))
            .transpose()
    }

    fn entities(&self) -> Result<Vec<EntityRecord>, RosError> {
        let table = self.read_table(ENTITIES)?;
        let mut entities = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            entities.push(decode::<EntityRecord>(value.value())?);
        }
        entities.sort_by_key(EntityRecord::creation_order);
        Ok(entities)
    }

    fn blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, RosError> {
        let table = self.read_table(BLOBS)?;
        Ok(table
            .get(hash.as_bytes().as_slice())
            .map_err(io_err)?
            .map(|v| v.value().to_vec()))
    }

    fn blob_count(&self) -> Result<usize, RosError> {
        let table = self.read_table(BLOBS)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn associations(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Vec<Association>, RosError> {
        let table = self.read_table(ASSOCIATIONS)?;
        let (e, a) = (entity.as_str(), attribute.as_str());
        let mut rows = Vec::new();
        for entry in table.range((e, a, 0u64)..=(e, a, u64::MAX)).map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            rows.push(decode::<Association>(value.value())?);
        }
        Ok(rows)
    }

    fn active_associations(&self, entity: &EntityId) -> Result<Vec<Association>, RosError> {
        let table = self.read_table(ASSOCIATIONS)?;
        let e = entity.as_str();
        let mut rows = Vec::new();
        for entry in table.range((e, "", 0u64)..).map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            if key.value().0 != e {
                break;
            }
            let row: Association = decode(value.value())?;
            if row.is_active() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn schemas(&self, dataset: &EntityId) -> Result<Vec<SchemaRecord>, RosError> {
        let table = self.read_table(SCHEMAS)?;
        let d = dataset.as_str();
        let mut rows = Vec::new();
        for entry in table.range((d, 0u64)..=(d, u64::MAX)).map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            rows.push(decode::<SchemaRecord>(value.value())?);
        }
        Ok(rows)
    }

    fn relations(&self, dataset: &EntityId) -> Result<Vec<Relation>, RosError> {
        let table = self.read_table(RELATIONS)?;
        let d = dataset.as_str();
        let mut rows = Vec::new();
        for entry in table.range((d, "", "")..).map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            if key.value().0 != d {
                break;
            }
            rows.push(decode::<Relation>(value.value())?);
        }
        Ok(rows)
    }

    fn pipeline_edges(&self) -> Result<Vec<EdgeRecord>, RosError> {
        let table = self.read_table(EDGES)?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            rows.push(decode::<EdgeRecord>(value.value())?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::formats::encode_value;
    use crate::registry::EntityKind;
    use crate::Value;
    use tempfile::tempdir;

    fn action(id: &str) -> Action {
        Action::new(ActionId(id.into()), id)
    }

    #[test]
    fn commit_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ros.redb");
        let sb = EntityId::from("SB1");
        let attr = AttributeKey::from("VRage");

        {
            let mut store = RedbStore::open(&path).expect("open");
            let mut a = action("AC1");
            a.queue(Mutation::CreateEntity {
                id: sb.clone(),
                kind: EntityKind::Subject,
            });
            let (hash, payload) = encode_value(&Value::Int(10)).expect("encode");
            a.queue(Mutation::PutBlob { hash, payload });
            a.queue(Mutation::Associate {
                entity: sb.clone(),
                attribute: attr.clone(),
                hash,
            });
            let record = store.commit(&a).expect("commit");
            assert_eq!(record.seq, 1);
        }

        let store = RedbStore::open(&path).expect("reopen");
        assert_eq!(store.next_seq, 2);
        assert_eq!(
            store.entity(&sb).expect("read").map(|r| r.kind),
            Some(EntityKind::Subject)
        );
        assert_eq!(store.blob_count().expect("count"), 1);
        let rows = store.associations(&sb, &attr).expect("read");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_active());
        assert_eq!(store.actions().expect("read").len(), 1);
    }

    #[test]
    fn failed_commit_is_rolled_back() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("ros.redb")).expect("open");

        let mut a = action("AC1");
        let (hash, payload) = encode_value(&Value::from("x")).expect("encode");
        a.queue(Mutation::PutBlob { hash, payload });
        a.queue(Mutation::Deactivate {
            entity: EntityId::from("SB1"),
            attribute: AttributeKey::from("VRage"),
        });
        assert!(store.commit(&a).is_err());

        assert_eq!(store.blob_count().expect("count"), 0);
        assert!(store.actions().expect("read").is_empty());
        assert_eq!(store.next_seq, 1);
    }

    #[test]
    fn active_associations_stay_within_entity() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("ros.redb")).expect("open");

        let mut a = action("AC1");
        let (hash, payload) = encode_value(&Value::Int(1)).expect("encode");
        a.queue(Mutation::PutBlob { hash, payload });
        for entity in ["SB1", "SB2"] {
            for attr in ["VRa", "VRb"] {
                a.queue(Mutation::Associate {
                    entity: EntityId::from(entity),
                    attribute: AttributeKey::from(attr),
                    hash,
                });
            }
        }
        store.commit(&a).expect("commit");

        let rows = store
            .active_associations(&EntityId::from("SB1"))
            .expect("read");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.entity.as_str() == "SB1"));
    }

    #[test]
    fn compact_and_reopen_keeps_edges() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ros.redb");
        let edge = crate::EdgeId("ED1".into());

        {
            let mut store = RedbStore::open(&path).expect("open");
            let mut a = action("AC1");
            a.queue(Mutation::AddEdge {
                id: edge.clone(),
                source_object_id: EntityId::from("PR1"),
                source_port: "out".into(),
                target_object_id: EntityId::from("PR2"),
                target_port: "in".into(),
            });
            store.commit(&a).expect("commit");

            let mut b = action("AC2");
            b.queue(Mutation::DeactivateEdge { id: edge.clone() });
            store.commit(&b).expect("commit");
            store.compact().expect("compact");
        }

        let mut store = RedbStore::open(&path).expect("reopen");
        let rows = store.pipeline_edges().expect("edges");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);

        let mut c = action("AC3");
        c.queue(Mutation::DeactivateEdge { id: edge });
        assert!(matches!(store.commit(&c), Err(RosError::NotFound(_))));
        assert_eq!(store.next_seq, 3);
    }
}
