//! # In-Memory Store
//!
//! BTreeMap-backed [`Store`] used for tests, scratch sessions, and as the
//! reference behavior for the redb backend.
//!
//! Each applied mutation records how to undo itself. A failed commit replays
//! that journal backwards, so it leaves nothing behind and costs no more than
//! the Action it rejects.

use super::{
    Association, EdgeRecord, EntityRecord, Mutation, Relation, SchemaRecord, Store,
    entity_exists_error, missing_blob_error, missing_edge_error, missing_relation_error,
};
use crate::action::{Action, ActionRecord};
use crate::{ActionId, AttributeKey, ContentHash, EdgeId, EntityId, RosError};
use std::collections::BTreeMap;

type AssociationKey = (EntityId, AttributeKey, u64);
type RelationKey = (EntityId, EntityId, EntityId);
type SchemaKey = (EntityId, u64);

/// Prior content of one key touched by an in-flight commit.
#[derive(Debug)]
enum Undo {
    Entity(EntityId),
    Blob(ContentHash),
    Association(AssociationKey, Option<Association>),
    Schema(SchemaKey, Option<SchemaRecord>),
    Relation(RelationKey, Option<Relation>),
    Edge(EdgeId, Option<EdgeRecord>),
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, prior: Option<V>) {
    match prior {
        Some(row) => {
            map.insert(key, row);
        }
        None => {
            map.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    next_seq: u64,
    actions: BTreeMap<ActionId, ActionRecord>,
    entities: BTreeMap<EntityId, EntityRecord>,
    blobs: BTreeMap<ContentHash, Vec<u8>>,
    associations: BTreeMap<AssociationKey, Association>,
    schemas: BTreeMap<SchemaKey, SchemaRecord>,
    relations: BTreeMap<RelationKey, Relation>,
    edges: BTreeMap<EdgeId, EdgeRecord>,
}

impl State {
    fn apply(
        &mut self,
        action: &ActionId,
        seq: u64,
        position: u32,
        mutation: &Mutation,
        journal: &mut Vec<Undo>,
    ) -> Result<(), RosError> {
        match mutation {
            Mutation::CreateEntity { id, kind } => {
                if self.entities.contains_key(id) {
                    return Err(entity_exists_error(id));
                }
                self.entities.insert(
                    id.clone(),
                    EntityRecord {
                        id: id.clone(),
                        kind: *kind,
                        action_id: action.clone(),
                        seq,
                        position,
                    },
                );
                journal.push(Undo::Entity(id.clone()));
            }
            Mutation::PutBlob { hash, payload } => {
                if !self.blobs.contains_key(hash) {
                    self.blobs.insert(*hash, payload.clone());
                    journal.push(Undo::Blob(*hash));
                }
            }
            Mutation::Associate {
                entity,
                attribute,
                hash,
            } => {
                if !self.blobs.contains_key(hash) {
                    return Err(missing_blob_error(hash));
                }
                for (key, row) in self.slot_mut(entity, attribute) {
                    if row.is_active() && row.seq != seq {
                        journal.push(Undo::Association(key.clone(), Some(row.clone())));
                        row.deactivated_at = Some(seq);
                    }
                }
                let key = (entity.clone(), attribute.clone(), seq);
                let prior = self.associations.insert(
                    key.clone(),
                    Association {
                        entity: entity.clone(),
                        attribute: attribute.clone(),
                        action_id: action.clone(),
                        hash: *hash,
                        seq,
                        deactivated_at: None,
                    },
                );
                journal.push(Undo::Association(key, prior));
            }
            Mutation::Deactivate { entity, attribute } => {
                let mut found = false;
                for (key, row) in self.slot_mut(entity, attribute) {
                    if row.is_active() {
                        journal.push(Undo::Association(key.clone(), Some(row.clone())));
                        row.deactivated_at = Some(seq);
                        found = true;
                    }
                }
                if !found {
                    return Err(RosError::NotAssociated {
                        entity: entity.clone(),
                        attribute: attribute.clone(),
                    });
                }
            }
            Mutation::SetSchema {
                dataset,
                schema_json,
            } => {
                let key = (dataset.clone(), seq);
                let prior = self.schemas.insert(
                    key.clone(),
                    SchemaRecord {
                        dataset: dataset.clone(),
                        schema_json: schema_json.clone(),
                        action_id: action.clone(),
                        seq,
                    },
                );
                journal.push(Undo::Schema(key, prior));
            }
            Mutation::Relate {
                dataset,
                parent,
                child,
            } => {
                let key = (dataset.clone(), parent.clone(), child.clone());
                let prior = self.relations.insert(
                    key.clone(),
                    Relation {
                        dataset: dataset.clone(),
                        parent: parent.clone(),
                        child: child.clone(),
                        action_id: action.clone(),
                        is_active: true,
                    },
                );
                journal.push(Undo::Relation(key, prior));
            }
            Mutation::Unrelate {
                dataset,
                parent,
                child,
            } => {
                let key = (dataset.clone(), parent.clone(), child.clone());
                let row = self
                    .relations
                    .get_mut(&key)
                    .filter(|r| r.is_active)
                    .ok_or_else(|| missing_relation_error(parent, child))?;
                journal.push(Undo::Relation(key, Some(row.clone())));
                row.is_active = false;
            }
            Mutation::AddEdge {
                id,
                source_object_id,
                source_port,
                target_object_id,
                target_port,
            } => {
                let prior = self.edges.insert(
                    id.clone(),
                    EdgeRecord {
                        id: id.clone(),
                        source_object_id: source_object_id.clone(),
                        source_port: source_port.clone(),
                        target_object_id: target_object_id.clone(),
                        target_port: target_port.clone(),
                        action_id: action.clone(),
                        is_active: true,
                    },
                );
                journal.push(Undo::Edge(id.clone(), prior));
            }
            Mutation::DeactivateEdge { id } => {
                let row = self
                    .edges
                    .get_mut(id)
                    .filter(|r| r.is_active)
                    .ok_or_else(|| missing_edge_error(id))?;
                journal.push(Undo::Edge(id.clone(), Some(row.clone())));
                row.is_active = false;
            }
        }
        Ok(())
    }

    /// Revert journaled changes, newest first.
    fn rollback(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Entity(id) => {
                    self.entities.remove(&id);
                }
                Undo::Blob(hash) => {
                    self.blobs.remove(&hash);
                }
                Undo::Association(key, prior) => restore(&mut self.associations, key, prior),
                Undo::Schema(key, prior) => restore(&mut self.schemas, key, prior),
                Undo::Relation(key, prior) => restore(&mut self.relations, key, prior),
                Undo::Edge(id, prior) => restore(&mut self.edges, id, prior),
            }
        }
    }

    fn slot_mut<'a>(
        &'a mut self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> impl Iterator<Item = (&'a AssociationKey, &'a mut Association)> + 'a {
        let lo = (entity.clone(), attribute.clone(), 0);
        let hi = (entity.clone(), attribute.clone(), u64::MAX);
        self.associations.range_mut(lo..=hi)
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: State,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State {
                next_seq: 1,
                ..State::default()
            },
        }
    }
}

impl Store for MemoryStore {
    fn commit(&mut self, action: &Action) -> Result<ActionRecord, RosError> {
        if self.state.actions.contains_key(action.id()) {
            return Err(RosError::Validation(format!(
                "Action {} is already committed",
                action.id()
            )));
        }

        let seq = self.state.next_seq;
        let mut journal = Vec::new();
        for (position, mutation) in action.mutations().iter().enumerate() {
            if let Err(e) =
                self.state
                    .apply(action.id(), seq, position as u32, mutation, &mut journal)
            {
                self.state.rollback(journal);
                return Err(e);
            }
        }

        let record = action.record(seq);
        self.state.actions.insert(record.id.clone(), record.clone());
        self.state.next_seq = seq.saturating_add(1);
        Ok(record)
    }

    fn action(&self, id: &ActionId) -> Result<Option<ActionRecord>, RosError> {
        Ok(self.state.actions.get(id).cloned())
    }

    fn actions(&self) -> Result<Vec<ActionRecord>, RosError> {
        let mut actions: Vec<ActionRecord> = self.state.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.seq);
        Ok(actions)
    }

    fn entity(&self, id: &EntityId) -> Result<Option<EntityRecord>, RosError> {
        Ok(self.state.entities.get(id).cloned())
    }

    fn entities(&self) -> Result<Vec<EntityRecord>, RosError> {
        let mut entities: Vec<EntityRecord> = self.state.entities.values().cloned().collect();
        entities.sort_by_key(EntityRecord::creation_order);
        Ok(entities)
    }

    fn blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, RosError> {
        Ok(self.state.blobs.get(hash).cloned())
    }

    fn blob_count(&self) -> Result<usize, RosError> {
        Ok(self.state.blobs.len())
    }

    fn associations(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Vec<Association>, RosError> {
        let lo = (entity.clone(), attribute.clone(), 0);
        let hi = (entity.clone(), attribute.clone(), u64::MAX);
        Ok(self
            .state
            .associations
            .range(lo..=hi)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn active_associations(&self, entity: &EntityId) -> Result<Vec<Association>, RosError> {
        let lo = (entity.clone(), AttributeKey::new(""), 0);
        Ok(self
            .state
            .associations
            .range(lo..)
            .take_while(|((e, _, _), _)| e == entity)
            .filter(|(_, row)| row.is_active())
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn schemas(&self, dataset: &EntityId) -> Result<Vec<SchemaRecord>, RosError> {
        let lo = (dataset.clone(), 0);
        let hi = (dataset.clone(), u64::MAX);
        Ok(self
            .state
            .schemas
            .range(lo..=hi)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn relations(&self, dataset: &EntityId) -> Result<Vec<Relation>, RosError> {
        Ok(self
            .state
            .relations
            .values()
            .filter(|r| &r.dataset == dataset)
            .cloned()
            .collect())
    }

    fn pipeline_edges(&self) -> Result<Vec<EdgeRecord>, RosError> {
        Ok(self.state.edges.values().cloned().collect())
    }
}
