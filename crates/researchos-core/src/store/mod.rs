//! # Store
//!
//! The persisted schema the engine needs from its storage collaborator.
//!
//! | Table                 | Row                                                   |
//! |-----------------------|-------------------------------------------------------|
//! | `actions`             | [`ActionRecord`]                                      |
//! | `entities`            | [`EntityRecord`]                                      |
//! | `value_blobs`         | content hash -> payload                               |
//! | `associations`        | [`Association`] (entity, attribute, commit seq)       |
//! | `hierarchy_schema`    | [`SchemaRecord`] (dataset, commit seq)                |
//! | `hierarchy_relations` | [`Relation`] (dataset, parent, child)                 |
//! | `pipeline_edges`      | [`EdgeRecord`]                                        |
//!
//! Two backends implement [`Store`]: [`MemoryStore`] (BTreeMap, in-process)
//! and [`RedbStore`] (redb, ACID on disk). Both apply an Action's queue as a
//! single unit: either every mutation lands or none does.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::action::{Action, ActionRecord};
use crate::registry::EntityKind;
use crate::{ActionId, AttributeKey, ContentHash, EdgeId, EntityId, RosError};
use serde::{Deserialize, Serialize};

// =============================================================================
// MUTATIONS
// =============================================================================

/// One queued change. Mutations only take effect when their Action commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Register a new entity id. Fails the commit if the id already exists.
    CreateEntity { id: EntityId, kind: EntityKind },
    /// Store a value payload under its content hash (idempotent).
    PutBlob { hash: ContentHash, payload: Vec<u8> },
    /// Make `hash` the active value of (entity, attribute), deactivating the prior one.
    Associate {
        entity: EntityId,
        attribute: AttributeKey,
        hash: ContentHash,
    },
    /// Deactivate the active association of (entity, attribute).
    Deactivate {
        entity: EntityId,
        attribute: AttributeKey,
    },
    /// Record a new hierarchy schema (JSON array of prefixes) for a dataset.
    SetSchema {
        dataset: EntityId,
        schema_json: String,
    },
    /// Record a parent -> child hierarchy relation within a dataset.
    Relate {
        dataset: EntityId,
        parent: EntityId,
        child: EntityId,
    },
    /// Soft-delete a hierarchy relation.
    Unrelate {
        dataset: EntityId,
        parent: EntityId,
        child: EntityId,
    },
    /// Record a pipeline edge from an outlet to an inlet.
    AddEdge {
        id: EdgeId,
        source_object_id: EntityId,
        source_port: String,
        target_object_id: EntityId,
        target_port: String,
    },
    /// Soft-delete an active pipeline edge.
    DeactivateEdge { id: EdgeId },
}

// =============================================================================
// ROWS
// =============================================================================

/// A registered entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Action that created the entity.
    pub action_id: ActionId,
    /// Commit sequence of that Action.
    pub seq: u64,
    /// Position of the creating mutation within its Action's queue.
    pub position: u32,
}

impl EntityRecord {
    /// Total creation order across all commits.
    #[must_use]
    pub fn creation_order(&self) -> (u64, u32) {
        (self.seq, self.position)
    }
}

/// One (entity, attribute) -> value binding written by one Action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub entity: EntityId,
    pub attribute: AttributeKey,
    pub action_id: ActionId,
    pub hash: ContentHash,
    /// Commit sequence of the writing Action.
    pub seq: u64,
    /// Commit sequence of the Action that superseded or deleted this row.
    pub deactivated_at: Option<u64>,
}

impl Association {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }

    /// Whether this row was the active one immediately after commit `seq`.
    #[must_use]
    pub fn active_at(&self, seq: u64) -> bool {
        self.seq <= seq && self.deactivated_at.is_none_or(|d| d > seq)
    }
}

/// One schema version of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub dataset: EntityId,
    /// Ordered JSON array of type prefixes, e.g. `["DS","SB","TR"]`.
    pub schema_json: String,
    pub action_id: ActionId,
    pub seq: u64,
}

/// A parent -> child membership edge in a dataset's hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub dataset: EntityId,
    pub parent: EntityId,
    pub child: EntityId,
    pub action_id: ActionId,
    pub is_active: bool,
}

/// A pipeline edge row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub source_object_id: EntityId,
    pub source_port: String,
    pub target_object_id: EntityId,
    pub target_port: String,
    pub action_id: ActionId,
    pub is_active: bool,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage operations required by the engine.
///
/// Reads only ever observe committed Actions. `commit` is all-or-nothing.
pub trait Store {
    /// Apply every queued mutation of `action` atomically and record the Action.
    ///
    /// Returns the committed Action row with its assigned sequence number.
    fn commit(&mut self, action: &Action) -> Result<ActionRecord, RosError>;

    /// Look up a committed Action.
    fn action(&self, id: &ActionId) -> Result<Option<ActionRecord>, RosError>;

    /// All committed Actions in commit order.
    fn actions(&self) -> Result<Vec<ActionRecord>, RosError>;

    /// Look up an entity row.
    fn entity(&self, id: &EntityId) -> Result<Option<EntityRecord>, RosError>;

    /// All entity rows in creation order.
    fn entities(&self) -> Result<Vec<EntityRecord>, RosError>;

    /// Fetch a value payload by hash. Side-effect free.
    fn blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, RosError>;

    /// Number of distinct stored payloads.
    fn blob_count(&self) -> Result<usize, RosError>;

    /// Full history of (entity, attribute) in commit order.
    fn associations(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Vec<Association>, RosError>;

    /// Every active association of an entity, ordered by attribute key.
    fn active_associations(&self, entity: &EntityId) -> Result<Vec<Association>, RosError>;

    /// Schema versions of a dataset in commit order.
    fn schemas(&self, dataset: &EntityId) -> Result<Vec<SchemaRecord>, RosError>;

    /// Every hierarchy relation of a dataset, active or not.
    fn relations(&self, dataset: &EntityId) -> Result<Vec<Relation>, RosError>;

    /// Every pipeline edge, active or not, ordered by edge id.
    fn pipeline_edges(&self) -> Result<Vec<EdgeRecord>, RosError>;
}

fn entity_exists_error(id: &EntityId) -> RosError {
    RosError::Validation(format!("Entity {} already exists", id))
}

fn missing_blob_error(hash: &ContentHash) -> RosError {
    RosError::Reference(format!("Value blob {} was never stored", hash))
}

fn missing_relation_error(parent: &EntityId, child: &EntityId) -> RosError {
    RosError::NotFound(format!("No active relation {} -> {}", parent, child))
}

fn missing_edge_error(id: &EdgeId) -> RosError {
    RosError::NotFound(format!("No active pipeline edge {}", id))
}
