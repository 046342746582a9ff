//! # Subset Conditions
//!
//! A subset is a saved boolean query over one dataset's address graph.
//!
//! ## Wire Form
//!
//! ```json
//! {"and": [["VRage", ">=", 5], {"or": [["VRside", "==", "L"], ["VRside", "is", null]]}]}
//! ```
//!
//! - A leaf is `[variable_id, operator, literal]`.
//! - An interior node is an object with exactly one key, `and` or `or`,
//!   whose value is a list of children.
//! - `{}` at the top level means "no conditions" and matches every node.
//!
//! The tree is validated once while parsing into [`Condition`]; evaluation
//! never sees a malformed tree.
//!
//! ## Evaluation
//!
//! Nodes are visited in topological order. When a node has no active
//! association for a leaf's variable, the leaf is evaluated against the
//! nearest ancestor that has one (ties broken by id). A node that matches
//! brings all of its ancestors into the result.

use crate::action::Action;
use crate::address::AddressGraph;
use crate::database::Database;
use crate::entity::{self, ResearchObject};
use crate::primitives::{CONDITIONS_ATTR, DATASET_ATTR};
use crate::registry::{self, EntityKind};
use crate::{AttributeKey, EntityId, Lookup, RosError, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// ATTRIBUTE SOURCE
// =============================================================================

/// Read access the parser and evaluator need.
///
/// [`Database`] is the production implementation; tests substitute maps.
pub trait AttributeSource {
    /// Active value of (entity, attribute), or `NotAssociated`.
    fn lookup_value(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Lookup<Value>, RosError>;

    /// Whether `id` names an existing Variable.
    fn variable_exists(&self, id: &EntityId) -> Result<bool, RosError>;
}

impl AttributeSource for Database {
    fn lookup_value(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Lookup<Value>, RosError> {
        self.lookup(entity, attribute)
    }

    fn variable_exists(&self, id: &EntityId) -> Result<bool, RosError> {
        Ok(self.entity_kind(id, None)? == Some(EntityKind::Variable))
    }
}

// =============================================================================
// OPERATORS
// =============================================================================

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    In,
    NotIn,
    Is,
    IsNot,
    Contains,
    NotContains,
}

impl Operator {
    /// Parse the wire spelling. `=` is accepted for `==`.
    pub fn parse(s: &str) -> Result<Self, RosError> {
        Ok(match s {
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "==" | "=" => Self::Eq,
            "!=" => Self::Ne,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "is" => Self::Is,
            "is not" => Self::IsNot,
            "contains" => Self::Contains,
            "not contains" => Self::NotContains,
            other => {
                return Err(RosError::Validation(format!("Unknown operator {:?}", other)));
            }
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::Contains => "contains",
            Self::NotContains => "not contains",
        }
    }

    /// Operators that only accept integer literals.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Ge | Self::Le)
    }

    /// Apply the operator to a stored value and a literal.
    #[must_use]
    pub fn apply(self, stored: &Value, literal: &Value) -> bool {
        match self {
            Self::Gt | Self::Lt | Self::Ge | Self::Le => {
                let Value::Int(n) = literal else {
                    return false;
                };
                match stored.compare_int(*n) {
                    Some(ord) => match self {
                        Self::Gt => ord == Ordering::Greater,
                        Self::Lt => ord == Ordering::Less,
                        Self::Ge => ord != Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            }
            Self::Eq => stored.loose_eq(literal),
            Self::Ne => !stored.loose_eq(literal),
            Self::Is => stored == literal,
            Self::IsNot => stored != literal,
            Self::In => !literal.is_null() && literal.contains(stored),
            Self::NotIn => literal.is_null() || !literal.contains(stored),
            Self::Contains => !stored.is_null() && stored.contains(literal),
            Self::NotContains => {
                if stored.is_null() {
                    !literal.is_null()
                } else {
                    !stored.contains(literal)
                }
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CONDITION TREE
// =============================================================================

/// A validated condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// No conditions: every node matches.
    All,
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Leaf {
        variable: EntityId,
        operator: Operator,
        value: Value,
    },
}

impl Condition {
    /// Parse and validate the wire form.
    pub fn parse(raw: &serde_json::Value, source: &impl AttributeSource) -> Result<Self, RosError> {
        if matches!(raw, serde_json::Value::Object(map) if map.is_empty()) {
            return Ok(Self::All);
        }
        Self::parse_node(raw, source)
    }

    fn parse_node(raw: &serde_json::Value, source: &impl AttributeSource) -> Result<Self, RosError> {
        match raw {
            serde_json::Value::Object(map) => {
                let mut entries = map.iter();
                let (key, children) = match (entries.next(), entries.next()) {
                    (Some(entry), None) => entry,
                    _ => {
                        return Err(RosError::Validation(
                            "Condition object must have exactly one key, \"and\" or \"or\""
                                .to_string(),
                        ));
                    }
                };
                let children = children.as_array().ok_or_else(|| {
                    RosError::Validation(format!("Value of \"{}\" must be a list", key))
                })?;
                let parsed = children
                    .iter()
                    .map(|c| Self::parse_node(c, source))
                    .collect::<Result<Vec<_>, _>>()?;
                match key.as_str() {
                    "and" => Ok(Self::And(parsed)),
                    "or" => Ok(Self::Or(parsed)),
                    other => Err(RosError::Validation(format!(
                        "Condition key must be \"and\" or \"or\", got {:?}",
                        other
                    ))),
                }
            }
            serde_json::Value::Array(items) => {
                let [variable, operator, literal] = items.as_slice() else {
                    return Err(RosError::Validation(format!(
                        "Condition leaf must have 3 elements, got {}",
                        items.len()
                    )));
                };
                let variable = variable.as_str().ok_or_else(|| {
                    RosError::Validation("Condition variable must be a string id".to_string())
                })?;
                let variable = EntityId::from(variable);
                if registry::resolve(&variable).ok() != Some(EntityKind::Variable) {
                    return Err(RosError::Validation(format!(
                        "{} is not a variable id",
                        variable
                    )));
                }
                if !source.variable_exists(&variable)? {
                    return Err(RosError::Reference(format!(
                        "Variable {} does not exist",
                        variable
                    )));
                }
                let operator = operator.as_str().ok_or_else(|| {
                    RosError::Validation("Condition operator must be a string".to_string())
                })?;
                let operator = Operator::parse(operator)?;
                let value = Value::try_from(literal)?;
                if operator.is_numeric() && !matches!(value, Value::Int(_)) {
                    return Err(RosError::Validation(format!(
                        "Operator {} requires an integer literal",
                        operator
                    )));
                }
                Ok(Self::Leaf {
                    variable,
                    operator,
                    value,
                })
            }
            other => Err(RosError::Validation(format!(
                "Condition must be a list or an object, got {}",
                other
            ))),
        }
    }

    /// Render back to the wire form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::All => serde_json::json!({}),
            Self::And(children) => {
                serde_json::json!({ "and": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            Self::Or(children) => {
                serde_json::json!({ "or": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            Self::Leaf {
                variable,
                operator,
                value,
            } => serde_json::json!([
                variable.as_str(),
                operator.as_str(),
                serde_json::Value::from(value)
            ]),
        }
    }

    /// Whether `node` satisfies this tree.
    pub fn matches(
        &self,
        node: &EntityId,
        graph: &AddressGraph,
        source: &impl AttributeSource,
    ) -> Result<bool, RosError> {
        match self {
            Self::All => Ok(true),
            Self::And(children) => {
                for child in children {
                    if !child.matches(node, graph, source)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.matches(node, graph, source)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Leaf {
                variable,
                operator,
                value,
            } => {
                let key = AttributeKey::from(variable);
                if let Lookup::Value(stored) = source.lookup_value(node, &key)? {
                    return Ok(operator.apply(&stored, value));
                }
                for ancestor in graph.ancestors(node) {
                    if let Lookup::Value(stored) = source.lookup_value(&ancestor, &key)? {
                        return Ok(operator.apply(&stored, value));
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Every node that satisfies `condition`, plus all of its ancestors.
pub fn evaluate(
    condition: &Condition,
    graph: &AddressGraph,
    source: &impl AttributeSource,
) -> Result<BTreeSet<EntityId>, RosError> {
    let mut result = BTreeSet::new();
    for node in graph.topological_order() {
        if !condition.matches(node, graph, source)? {
            continue;
        }
        result.insert(node.clone());
        result.extend(graph.ancestors(node));
    }
    Ok(result)
}

// =============================================================================
// SUBSET ENTITY
// =============================================================================

/// A named, persisted condition tree over one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
    id: EntityId,
    name: String,
    dataset: EntityId,
    conditions: Condition,
}

impl Subset {
    /// Validate `raw_conditions` and queue a new subset.
    pub fn new(
        db: &Database,
        action: &mut Action,
        name: &str,
        dataset: &EntityId,
        raw_conditions: &serde_json::Value,
    ) -> Result<Self, RosError> {
        if db.entity_kind(dataset, Some(action))? != Some(EntityKind::Dataset) {
            return Err(RosError::Reference(format!(
                "{} is not an existing dataset",
                dataset
            )));
        }
        let conditions = Condition::parse(raw_conditions, db)?;
        let id = entity::create(db, action, EntityKind::Subset, name)?;
        db.set_value(action, &id, &AttributeKey::from(DATASET_ATTR), dataset)?;
        db.set_value(action, &id, &AttributeKey::from(CONDITIONS_ATTR), &conditions)?;
        Ok(Self {
            id,
            name: name.to_string(),
            dataset: dataset.clone(),
            conditions,
        })
    }

    #[must_use]
    pub fn dataset(&self) -> &EntityId {
        &self.dataset
    }

    #[must_use]
    pub fn conditions(&self) -> &Condition {
        &self.conditions
    }

    /// Ids of every data object in the subset.
    pub fn members(&self, db: &Database) -> Result<BTreeSet<EntityId>, RosError> {
        let graph = AddressGraph::build(db, &self.dataset)?;
        evaluate(&self.conditions, &graph, db)
    }

    /// The dataset's address graph restricted to this subset.
    pub fn resolve(&self, db: &Database) -> Result<AddressGraph, RosError> {
        let graph = AddressGraph::build(db, &self.dataset)?;
        let members = evaluate(&self.conditions, &graph, db)?;
        tracing::info!(
            subset = %self.id,
            dataset = %self.dataset,
            matched = members.len(),
            of = graph.node_count(),
            "resolved subset"
        );
        Ok(graph.subgraph(&members))
    }
}

impl ResearchObject for Subset {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Subset
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Subset
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (_, name) = entity::load_header::<Self>(db, id)?;
        Ok(Self {
            id: id.clone(),
            name,
            dataset: db.get(id, &AttributeKey::from(DATASET_ATTR))?,
            conditions: db.get(id, &AttributeKey::from(CONDITIONS_ATTR))?,
        })
    }
}
