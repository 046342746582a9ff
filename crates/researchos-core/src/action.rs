//! # Actions
//!
//! An [`Action`] is a named, timestamped unit of work. Mutations are queued
//! on it and only become visible when [`crate::Database::commit`] succeeds.
//! Committing writes the Action row and every queued mutation in one
//! storage transaction.
//!
//! The queue is also consulted while it is being built: identifier
//! generation, blob dedupe, and deletion checks all look at the pending
//! mutations as well as the committed store.

use crate::registry::EntityKind;
use crate::store::Mutation;
use crate::{ActionId, AttributeKey, ContentHash, EntityId, RosError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Committed Action row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub name: String,
    pub created_at: OffsetDateTime,
    /// Monotonic commit sequence, starting at 1.
    pub seq: u64,
}

impl ActionRecord {
    /// Creation time as an RFC 3339 string.
    pub fn timestamp(&self) -> Result<String, RosError> {
        self.created_at
            .format(&Rfc3339)
            .map_err(|e| RosError::SerializationError(e.to_string()))
    }
}

/// What the pending queue says about one (entity, attribute) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSlot {
    /// The last queued mutation for the slot associates this hash.
    Set(ContentHash),
    /// The last queued mutation for the slot deactivates it.
    Deleted,
}

/// An open unit of work.
#[derive(Debug)]
pub struct Action {
    id: ActionId,
    name: String,
    created_at: OffsetDateTime,
    queue: Vec<Mutation>,
}

impl Action {
    pub(crate) fn new(id: ActionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: OffsetDateTime::now_utc(),
            queue: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Append a mutation to the queue.
    pub fn queue(&mut self, mutation: Mutation) {
        self.queue.push(mutation);
    }

    /// Queued mutations in insertion order.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.queue
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Row to persist for this Action once it is assigned a sequence number.
    #[must_use]
    pub fn record(&self, seq: u64) -> ActionRecord {
        ActionRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            seq,
        }
    }

    // =========================================================================
    // PENDING STATE
    // =========================================================================

    /// Kind of an entity created by this Action, if any.
    #[must_use]
    pub fn pending_entity(&self, id: &EntityId) -> Option<EntityKind> {
        self.queue.iter().find_map(|m| match m {
            Mutation::CreateEntity { id: created, kind } if created == id => Some(*kind),
            _ => None,
        })
    }

    /// Whether this Action already queues a payload for `hash`.
    #[must_use]
    pub fn pending_blob(&self, hash: &ContentHash) -> bool {
        self.queue
            .iter()
            .any(|m| matches!(m, Mutation::PutBlob { hash: h, .. } if h == hash))
    }

    /// Latest queued state of an attribute slot, or `None` if untouched.
    #[must_use]
    pub fn pending_slot(&self, entity: &EntityId, attribute: &AttributeKey) -> Option<PendingSlot> {
        self.queue.iter().rev().find_map(|m| match m {
            Mutation::Associate {
                entity: e,
                attribute: a,
                hash,
            } if e == entity && a == attribute => Some(PendingSlot::Set(*hash)),
            Mutation::Deactivate {
                entity: e,
                attribute: a,
            } if e == entity && a == attribute => Some(PendingSlot::Deleted),
            _ => None,
        })
    }
}
