//! # Object Registry
//!
//! Maps identifier prefixes to entity kinds and caches loaded entities.
//!
//! The prefix table is a compile-time constant. Every kind has exactly one
//! prefix; `AC` (actions) and `ED` (pipeline edges) are reserved for
//! non-entity identifiers and never resolve.
//!
//! [`ObjectRegistry`] is an id-keyed arena: an entity is loaded from the
//! store at most once, and later lookups return the same instance.

use crate::database::Database;
use crate::entity::Entity;
use crate::{EntityId, RosError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// The closed set of research entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Project,
    Dataset,
    Subject,
    Visit,
    Trial,
    Phase,
    Variable,
    Process,
    Logsheet,
    Subset,
}

/// (kind, prefix, type name)
const KIND_TABLE: &[(EntityKind, &str, &str)] = &[
    (EntityKind::User, "US", "User"),
    (EntityKind::Project, "PJ", "Project"),
    (EntityKind::Dataset, "DS", "Dataset"),
    (EntityKind::Subject, "SB", "Subject"),
    (EntityKind::Visit, "VS", "Visit"),
    (EntityKind::Trial, "TR", "Trial"),
    (EntityKind::Phase, "PH", "Phase"),
    (EntityKind::Variable, "VR", "Variable"),
    (EntityKind::Process, "PR", "Process"),
    (EntityKind::Logsheet, "LG", "Logsheet"),
    (EntityKind::Subset, "SS", "Subset"),
];

impl EntityKind {
    /// Every kind in prefix-table order.
    pub const ALL: [EntityKind; 11] = [
        EntityKind::User,
        EntityKind::Project,
        EntityKind::Dataset,
        EntityKind::Subject,
        EntityKind::Visit,
        EntityKind::Trial,
        EntityKind::Phase,
        EntityKind::Variable,
        EntityKind::Process,
        EntityKind::Logsheet,
        EntityKind::Subset,
    ];

    // KIND_TABLE rows follow declaration order, so the discriminant is the row index.
    fn row(self) -> (EntityKind, &'static str, &'static str) {
        KIND_TABLE[self as usize]
    }

    /// Two-character identifier prefix.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        self.row().1
    }

    /// Type name as written in package configuration (`"Trial"`, ...).
    #[must_use]
    pub fn name(self) -> &'static str {
        self.row().2
    }

    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, p, _)| *p == prefix)
            .map(|(k, _, _)| *k)
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, _, n)| *n == name)
            .map(|(k, _, _)| *k)
    }

    /// Dataset or a level that can appear in a dataset hierarchy.
    #[must_use]
    pub fn is_data_object(self) -> bool {
        matches!(
            self,
            Self::Dataset | Self::Subject | Self::Visit | Self::Trial | Self::Phase
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of an identifier, derived from its prefix.
pub fn resolve(id: &EntityId) -> Result<EntityKind, RosError> {
    id.prefix()
        .and_then(EntityKind::from_prefix)
        .ok_or_else(|| RosError::Reference(format!("Unknown identifier prefix in {}", id)))
}

/// Resolve and require a specific kind.
pub fn expect_kind(id: &EntityId, expected: EntityKind) -> Result<(), RosError> {
    let kind = resolve(id)?;
    if kind != expected {
        return Err(RosError::Reference(format!(
            "{} is a {}, expected a {}",
            id, kind, expected
        )));
    }
    Ok(())
}

// =============================================================================
// OBJECT REGISTRY
// =============================================================================

/// Id-keyed arena of loaded entities.
///
/// Entities are stored once; callers get `&Entity` handles borrowed from the
/// arena. Relationships between entities are expressed by id, never by
/// owning references.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<EntityId, Entity>,
}

impl ObjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind of an identifier. Pure prefix lookup; no storage access.
    pub fn resolve(&self, id: &EntityId) -> Result<EntityKind, RosError> {
        resolve(id)
    }

    /// Load an entity on first request, return the cached instance after.
    pub fn instantiate(&mut self, db: &Database, id: &EntityId) -> Result<&Entity, RosError> {
        if !self.objects.contains_key(id) {
            let entity = Entity::load(db, id)?;
            tracing::trace!(id = %id, kind = %entity.kind(), "instantiated entity");
            self.objects.insert(id.clone(), entity);
        }
        self.objects
            .get(id)
            .ok_or_else(|| RosError::NotFound(format!("Entity {} not in registry", id)))
    }

    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.objects.get(id)
    }

    #[must_use]
    pub fn kind_of(&self, id: &EntityId) -> Option<EntityKind> {
        self.objects.get(id).map(Entity::kind)
    }

    /// Cached entities of one kind, ordered by id.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.objects.values().filter(move |e| e.kind() == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
