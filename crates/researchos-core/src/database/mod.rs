//! # Database Session
//!
//! The entry point for every read and write.
//!
//! A `Database` owns one storage backend and the engine [`Config`]. Writes go
//! through an [`Action`]: open one with [`Database::begin_action`], queue
//! mutations on it (directly or through the entity and value helpers), then
//! hand it back to [`Database::commit`]. Commit takes `&mut self`, so the
//! borrow checker serializes writers while any number of `&Database` readers
//! query the last committed state.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile)
//! - `Persistent`: [`RedbStore`] (disk-backed ACID storage)

mod values;

use crate::action::Action;
use crate::config::Config;
use crate::primitives::ACTION_PREFIX;
use crate::registry::{self, EntityKind};
use crate::store::{EntityRecord, MemoryStore, Mutation, RedbStore, Relation, Store};
use crate::{ActionId, EntityId, RosError};
use std::path::Path;
use uuid::Uuid;

/// Storage backend for a Database.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// A handle to one research database.
#[derive(Debug, Default)]
pub struct Database {
    backend: StorageBackend,
    config: Config,
}

impl Database {
    /// Create an empty in-memory database.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self {
            backend: StorageBackend::InMemory(MemoryStore::new()),
            config,
        }
    }

    /// Open or create a redb-backed database at `path`.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self, RosError> {
        let store = RedbStore::open(path)?;
        Ok(Self {
            backend: StorageBackend::Persistent(store),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Read access to the committed state.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        match &self.backend {
            StorageBackend::InMemory(s) => s,
            StorageBackend::Persistent(s) => s,
        }
    }

    /// Reclaim free space in the database file.
    ///
    /// Returns `false` for the in-memory backend, which has no file.
    pub fn compact(&mut self) -> Result<bool, RosError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(false),
            StorageBackend::Persistent(s) => {
                s.compact()?;
                tracing::info!("compacted database");
                Ok(true)
            }
        }
    }

    fn store_mut(&mut self) -> &mut dyn Store {
        match &mut self.backend {
            StorageBackend::InMemory(s) => s,
            StorageBackend::Persistent(s) => s,
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Open a new unit of work.
    pub fn begin_action(&self, name: &str) -> Result<Action, RosError> {
        let store = self.store();
        let id = generate_id_with(
            ACTION_PREFIX,
            self.config.max_id_attempts,
            |candidate| Ok(store.action(&ActionId(candidate.to_string()))?.is_some()),
            random_suffix,
        )?;
        Ok(Action::new(ActionId(id), name))
    }

    /// Apply every queued mutation of `action` as one unit.
    ///
    /// Returns `false` without touching storage when the queue is empty.
    pub fn commit(&mut self, action: Action) -> Result<bool, RosError> {
        if action.is_empty() {
            tracing::debug!(action = %action.id(), name = action.name(), "empty action, nothing to commit");
            return Ok(false);
        }
        let record = self.store_mut().commit(&action)?;
        tracing::info!(
            action = %record.id,
            name = %record.name,
            seq = record.seq,
            mutations = action.len(),
            "committed action"
        );
        Ok(true)
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// Generate an unused identifier for `kind`.
    ///
    /// A candidate is rejected if it is already committed or already created
    /// by `action`.
    pub fn generate_id(&self, kind: EntityKind, action: &Action) -> Result<EntityId, RosError> {
        let store = self.store();
        let id = generate_id_with(
            kind.prefix(),
            self.config.max_id_attempts,
            |candidate| {
                let id = EntityId::from(candidate);
                Ok(action.pending_entity(&id).is_some() || store.entity(&id)?.is_some())
            },
            random_suffix,
        )?;
        Ok(EntityId(id))
    }

    /// Generate an id for `kind` and queue its creation.
    pub fn create_entity(&self, action: &mut Action, kind: EntityKind) -> Result<EntityId, RosError> {
        let id = self.generate_id(kind, action)?;
        action.queue(Mutation::CreateEntity {
            id: id.clone(),
            kind,
        });
        Ok(id)
    }

    /// Kind of an entity that is committed, or created by `pending`.
    pub fn entity_kind(
        &self,
        id: &EntityId,
        pending: Option<&Action>,
    ) -> Result<Option<EntityKind>, RosError> {
        if let Some(kind) = pending.and_then(|a| a.pending_entity(id)) {
            return Ok(Some(kind));
        }
        Ok(self.store().entity(id)?.map(|r| r.kind))
    }

    /// Whether `id` is a committed entity.
    pub fn contains_entity(&self, id: &EntityId) -> Result<bool, RosError> {
        Ok(self.store().entity(id)?.is_some())
    }

    /// Committed entity row, or `NotFound`.
    pub fn entity_record(&self, id: &EntityId) -> Result<EntityRecord, RosError> {
        self.store()
            .entity(id)?
            .ok_or_else(|| RosError::NotFound(format!("Entity {} does not exist", id)))
    }

    /// Committed entities of one kind in creation order.
    pub fn entities_of_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, RosError> {
        Ok(self
            .store()
            .entities()?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }

    // =========================================================================
    // HIERARCHY RELATIONS
    // =========================================================================

    /// Queue a parent -> child relation in a dataset hierarchy.
    ///
    /// Only identities are checked here; schema order is enforced when the
    /// address graph is built.
    pub fn relate(
        &self,
        action: &mut Action,
        dataset: &EntityId,
        parent: &EntityId,
        child: &EntityId,
    ) -> Result<(), RosError> {
        registry::expect_kind(dataset, EntityKind::Dataset)?;
        for id in [dataset, parent, child] {
            let kind = self.entity_kind(id, Some(action))?.ok_or_else(|| {
                RosError::Reference(format!("Entity {} does not exist", id))
            })?;
            if !kind.is_data_object() {
                return Err(RosError::Reference(format!(
                    "{} is a {}, not a data object",
                    id, kind
                )));
            }
        }
        action.queue(Mutation::Relate {
            dataset: dataset.clone(),
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    /// Queue a soft delete of a hierarchy relation.
    pub fn unrelate(
        &self,
        action: &mut Action,
        dataset: &EntityId,
        parent: &EntityId,
        child: &EntityId,
    ) -> Result<(), RosError> {
        action.queue(Mutation::Unrelate {
            dataset: dataset.clone(),
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    /// Active hierarchy relations of a dataset.
    pub fn relations(&self, dataset: &EntityId) -> Result<Vec<Relation>, RosError> {
        Ok(self
            .store()
            .relations(dataset)?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }
}

// =============================================================================
// IDENTIFIER GENERATION
// =============================================================================

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Produce `prefix + suffix()` until `taken` reports a free candidate.
///
/// Gives up with `IdExhausted` after `max_attempts` collisions.
pub fn generate_id_with<T, S>(
    prefix: &str,
    max_attempts: u32,
    mut taken: T,
    mut suffix: S,
) -> Result<String, RosError>
where
    T: FnMut(&str) -> Result<bool, RosError>,
    S: FnMut() -> String,
{
    for attempt in 1..=max_attempts {
        let candidate = format!("{}{}", prefix, suffix());
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        tracing::warn!(prefix, attempt, "identifier collision, retrying");
    }
    Err(RosError::IdExhausted {
        prefix: prefix.to_string(),
        attempts: max_attempts,
    })
}

// =============================================================================
// TESTS
// =============================================================================
