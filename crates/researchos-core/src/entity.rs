//! # Research Entities
//!
//! Every entity kind provides the same two construction paths:
//! - `new(db, action, ...)`: generate an id, queue its creation and its
//!   built-in attributes on an open Action
//! - `load(db, id)`: rebuild the entity from committed attributes
//!
//! Both paths yield identical state for the same id once the creating
//! Action has committed.
//!
//! [`Entity`] is the closed union over all kinds; [`Entity::load`]
//! dispatches on the id prefix through the static kind table.

use crate::action::Action;
use crate::database::Database;
use crate::pipeline::{Logsheet, Process};
use crate::primitives::NAME_ATTR;
use crate::registry::{self, EntityKind};
use crate::store::Mutation;
use crate::subset::Subset;
use crate::{AttributeKey, EntityId, RosError};

// =============================================================================
// RESEARCH OBJECT CAPABILITY
// =============================================================================

/// Capability shared by every concrete entity type.
pub trait ResearchObject: Sized {
    /// Whether this type represents entities of `kind`.
    fn accepts(kind: EntityKind) -> bool;

    fn id(&self) -> &EntityId;

    fn kind(&self) -> EntityKind;

    fn name(&self) -> &str;

    /// Rehydrate from committed state.
    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError>;
}

/// Queue creation of a `kind` entity with its name.
pub(crate) fn create(
    db: &Database,
    action: &mut Action,
    kind: EntityKind,
    name: &str,
) -> Result<EntityId, RosError> {
    let id = db.create_entity(action, kind)?;
    db.set_value(action, &id, &AttributeKey::from(NAME_ATTR), name)?;
    Ok(id)
}

/// Check the committed kind of `id` against `T` and read its name.
pub(crate) fn load_header<T: ResearchObject>(
    db: &Database,
    id: &EntityId,
) -> Result<(EntityKind, String), RosError> {
    let record = db.entity_record(id)?;
    if !T::accepts(record.kind) {
        return Err(RosError::Reference(format!(
            "{} is a {}, which this type cannot represent",
            id, record.kind
        )));
    }
    let name: String = db.get(id, &AttributeKey::from(NAME_ATTR))?;
    Ok((record.kind, name))
}

// =============================================================================
// BASIC OBJECTS
// =============================================================================

/// Users and projects carry nothing beyond their name.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicObject {
    id: EntityId,
    kind: EntityKind,
    name: String,
}

impl BasicObject {
    pub fn new(
        db: &Database,
        action: &mut Action,
        kind: EntityKind,
        name: &str,
    ) -> Result<Self, RosError> {
        if !Self::accepts(kind) {
            return Err(RosError::Validation(format!(
                "{} is not a basic object kind",
                kind
            )));
        }
        let id = create(db, action, kind, name)?;
        Ok(Self {
            id,
            kind,
            name: name.to_string(),
        })
    }
}

impl ResearchObject for BasicObject {
    fn accepts(kind: EntityKind) -> bool {
        matches!(kind, EntityKind::User | EntityKind::Project)
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (kind, name) = load_header::<Self>(db, id)?;
        Ok(Self {
            id: id.clone(),
            kind,
            name,
        })
    }
}

// =============================================================================
// DATASET
// =============================================================================

/// Root of a data hierarchy.
///
/// The schema lists the kind at each depth, starting with `Dataset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    id: EntityId,
    name: String,
    schema: Vec<EntityKind>,
}

/// Check the shape of a dataset schema.
///
/// `[]` is accepted and clears the schema.
pub fn validate_schema(schema: &[EntityKind]) -> Result<(), RosError> {
    if schema.is_empty() {
        return Ok(());
    }
    if schema.len() < 2 {
        return Err(RosError::Validation(
            "Schema must include the Dataset and at least one more level".to_string(),
        ));
    }
    if schema[0] != EntityKind::Dataset {
        return Err(RosError::Validation(
            "Schema must start with Dataset".to_string(),
        ));
    }
    for (i, kind) in schema.iter().enumerate() {
        if matches!(kind, EntityKind::User | EntityKind::Variable) {
            return Err(RosError::Validation(format!(
                "{} cannot be a schema level",
                kind
            )));
        }
        if !kind.is_data_object() {
            return Err(RosError::Validation(format!(
                "{} is not a data object kind",
                kind
            )));
        }
        if schema[..i].contains(kind) {
            return Err(RosError::Validation(format!(
                "{} appears more than once in the schema",
                kind
            )));
        }
    }
    Ok(())
}

/// Decode the stored JSON array of prefixes.
pub fn parse_schema_json(json: &str) -> Result<Vec<EntityKind>, RosError> {
    let prefixes: Vec<String> =
        serde_json::from_str(json).map_err(|e| RosError::SerializationError(e.to_string()))?;
    prefixes
        .iter()
        .map(|p| {
            EntityKind::from_prefix(p).ok_or_else(|| {
                RosError::SerializationError(format!("Unknown prefix {} in stored schema", p))
            })
        })
        .collect()
}

fn schema_json(schema: &[EntityKind]) -> Result<String, RosError> {
    let prefixes: Vec<&str> = schema.iter().map(|k| k.prefix()).collect();
    serde_json::to_string(&prefixes).map_err(|e| RosError::SerializationError(e.to_string()))
}

impl Dataset {
    pub fn new(db: &Database, action: &mut Action, name: &str) -> Result<Self, RosError> {
        let id = create(db, action, EntityKind::Dataset, name)?;
        Ok(Self {
            id,
            name: name.to_string(),
            schema: Vec::new(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &[EntityKind] {
        &self.schema
    }

    /// Depth of `kind` in this dataset's hierarchy.
    #[must_use]
    pub fn schema_position(&self, kind: EntityKind) -> Option<usize> {
        self.schema.iter().position(|k| *k == kind)
    }

    /// Validate and queue a new schema version.
    pub fn set_schema(&mut self, action: &mut Action, schema: &[EntityKind]) -> Result<(), RosError> {
        validate_schema(schema)?;
        action.queue(Mutation::SetSchema {
            dataset: self.id.clone(),
            schema_json: schema_json(schema)?,
        });
        self.schema = schema.to_vec();
        Ok(())
    }

    /// Latest committed schema of a dataset; empty if none was ever set.
    pub fn load_schema(db: &Database, id: &EntityId) -> Result<Vec<EntityKind>, RosError> {
        match db.store().schemas(id)?.last() {
            Some(row) => parse_schema_json(&row.schema_json),
            None => Ok(Vec::new()),
        }
    }
}

impl ResearchObject for Dataset {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Dataset
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Dataset
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (_, name) = load_header::<Self>(db, id)?;
        Ok(Self {
            id: id.clone(),
            name,
            schema: Self::load_schema(db, id)?,
        })
    }
}

// =============================================================================
// DATA OBJECTS
// =============================================================================

/// A Subject, Visit, Trial, or Phase inside a dataset hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    id: EntityId,
    kind: EntityKind,
    name: String,
}

impl DataObject {
    pub fn new(
        db: &Database,
        action: &mut Action,
        kind: EntityKind,
        name: &str,
    ) -> Result<Self, RosError> {
        if !Self::accepts(kind) {
            return Err(RosError::Validation(format!(
                "{} is not a data object level",
                kind
            )));
        }
        let id = create(db, action, kind, name)?;
        Ok(Self {
            id,
            kind,
            name: name.to_string(),
        })
    }
}

impl ResearchObject for DataObject {
    fn accepts(kind: EntityKind) -> bool {
        kind.is_data_object() && kind != EntityKind::Dataset
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (kind, name) = load_header::<Self>(db, id)?;
        Ok(Self {
            id: id.clone(),
            kind,
            name,
        })
    }
}

// =============================================================================
// VARIABLE
// =============================================================================

/// A named data slot. Its id is the attribute key under which data objects
/// store their value for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: EntityId,
    name: String,
}

impl Variable {
    pub fn new(db: &Database, action: &mut Action, name: &str) -> Result<Self, RosError> {
        let id = create(db, action, EntityKind::Variable, name)?;
        Ok(Self {
            id,
            name: name.to_string(),
        })
    }

    /// Attribute key that data objects use for this variable.
    #[must_use]
    pub fn key(&self) -> AttributeKey {
        AttributeKey::from(&self.id)
    }
}

impl ResearchObject for Variable {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Variable
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Variable
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (_, name) = load_header::<Self>(db, id)?;
        Ok(Self {
            id: id.clone(),
            name,
        })
    }
}

// =============================================================================
// ENTITY UNION
// =============================================================================

/// Any loaded research entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Basic(BasicObject),
    Dataset(Dataset),
    DataObject(DataObject),
    Variable(Variable),
    Process(Process),
    Logsheet(Logsheet),
    Subset(Subset),
}

impl Entity {
    /// Load any entity, dispatching on its id prefix.
    pub fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        Ok(match registry::resolve(id)? {
            EntityKind::User | EntityKind::Project => Self::Basic(BasicObject::load(db, id)?),
            EntityKind::Dataset => Self::Dataset(Dataset::load(db, id)?),
            EntityKind::Subject | EntityKind::Visit | EntityKind::Trial | EntityKind::Phase => {
                Self::DataObject(DataObject::load(db, id)?)
            }
            EntityKind::Variable => Self::Variable(Variable::load(db, id)?),
            EntityKind::Process => Self::Process(Process::load(db, id)?),
            EntityKind::Logsheet => Self::Logsheet(Logsheet::load(db, id)?),
            EntityKind::Subset => Self::Subset(Subset::load(db, id)?),
        })
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Basic(e) => e.id(),
            Self::Dataset(e) => e.id(),
            Self::DataObject(e) => e.id(),
            Self::Variable(e) => e.id(),
            Self::Process(e) => e.id(),
            Self::Logsheet(e) => e.id(),
            Self::Subset(e) => e.id(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Basic(e) => e.kind(),
            Self::Dataset(e) => e.kind(),
            Self::DataObject(e) => e.kind(),
            Self::Variable(e) => e.kind(),
            Self::Process(e) => e.kind(),
            Self::Logsheet(e) => e.kind(),
            Self::Subset(e) => e.kind(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Basic(e) => e.name(),
            Self::Dataset(e) => e.name(),
            Self::DataObject(e) => e.name(),
            Self::Variable(e) => e.name(),
            Self::Process(e) => e.name(),
            Self::Logsheet(e) => e.name(),
            Self::Subset(e) => e.name(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn schema_shapes() {
        let (ds, sb, tr) = (EntityKind::Dataset, EntityKind::Subject, EntityKind::Trial);
        assert!(validate_schema(&[]).is_ok());
        assert!(validate_schema(&[ds, sb, tr]).is_ok());
        assert!(validate_schema(&[ds]).is_err());
        assert!(validate_schema(&[sb, tr]).is_err());
        assert!(validate_schema(&[ds, EntityKind::Variable]).is_err());
        assert!(validate_schema(&[ds, EntityKind::User, sb]).is_err());
        assert!(validate_schema(&[ds, sb, sb]).is_err());
        assert!(validate_schema(&[ds, EntityKind::Process]).is_err());
    }

    #[test]
    fn new_and_load_agree() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("create").expect("action");
        let mut ds = Dataset::new(&db, &mut action, "gait").expect("dataset");
        ds.set_schema(
            &mut action,
            &[EntityKind::Dataset, EntityKind::Subject, EntityKind::Trial],
        )
        .expect("schema");
        let sb = DataObject::new(&db, &mut action, EntityKind::Subject, "S01").expect("subject");
        let var = Variable::new(&db, &mut action, "age").expect("variable");
        let user = BasicObject::new(&db, &mut action, EntityKind::User, "mt").expect("user");
        db.commit(action).expect("commit");

        assert_eq!(Dataset::load(&db, ds.id()).expect("load"), ds);
        assert_eq!(DataObject::load(&db, sb.id()).expect("load"), sb);
        assert_eq!(Variable::load(&db, var.id()).expect("load"), var);
        assert_eq!(BasicObject::load(&db, user.id()).expect("load"), user);
        assert_eq!(
            Entity::load(&db, ds.id()).expect("load"),
            Entity::Dataset(ds)
        );
    }

    #[test]
    fn latest_schema_wins_and_empty_resets() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("create").expect("action");
        let mut ds = Dataset::new(&db, &mut action, "gait").expect("dataset");
        ds.set_schema(&mut action, &[EntityKind::Dataset, EntityKind::Subject])
            .expect("schema");
        db.commit(action).expect("commit");

        let mut action = db.begin_action("reset").expect("action");
        ds.set_schema(&mut action, &[]).expect("reset");
        db.commit(action).expect("commit");

        assert!(Dataset::load_schema(&db, ds.id()).expect("schema").is_empty());
        assert_eq!(db.store().schemas(ds.id()).expect("rows").len(), 2);
    }

    #[test]
    fn load_with_wrong_type_fails() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("create").expect("action");
        let var = Variable::new(&db, &mut action, "age").expect("variable");
        db.commit(action).expect("commit");
        assert!(matches!(
            Dataset::load(&db, var.id()),
            Err(RosError::Reference(_))
        ));

        let mut action = db.begin_action("bad level").expect("action");
        assert!(matches!(
            DataObject::new(&db, &mut action, EntityKind::Dataset, "d"),
            Err(RosError::Validation(_))
        ));
    }
}
