//! # Pipeline Graph
//!
//! Processing steps (Processes and Logsheets) and the dataflow edges
//! between them.
//!
//! A Process declares named inputs and outputs. Each port is a versioned
//! attribute on the step (`in:<name>` holds a [`Binding`], `out:<name>`
//! holds the produced Variable id), so the history of what was bound to a
//! port, and by which Action, is kept like any other value.
//!
//! [`link_step`] turns bindings into persisted [`Edge`]s; [`build_pipeline_graph`]
//! projects every active edge into a [`PipelineGraph`].

use crate::action::Action;
use crate::database::{Database, generate_id_with};
use crate::entity::{self, Entity, ResearchObject};
use crate::primitives::{EDGE_PREFIX, HEADERS_ATTR, INPUT_PORT_PREFIX, OUTPUT_PORT_PREFIX};
use crate::registry::{EntityKind, ObjectRegistry};
use crate::store::{EdgeRecord, Mutation};
use crate::{ActionId, AttributeKey, EdgeId, EntityId, RosError, Value};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

// =============================================================================
// PORTS AND EDGES
// =============================================================================

/// Where a step's input comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Binding {
    /// A literal value; never linked.
    Constant(Value),
    /// The value of a Variable, optionally pinned to the step producing it.
    Variable {
        variable: EntityId,
        source: Option<EntityId>,
    },
    /// A column of a Logsheet.
    LogsheetColumn { logsheet: EntityId, column: String },
}

/// A named output connection point on a step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outlet {
    pub parent: EntityId,
    pub name: String,
}

/// A named input connection point on a step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Inlet {
    pub parent: EntityId,
    pub name: String,
}

/// A realized binding from an outlet to an inlet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub outlet: Outlet,
    pub inlet: Inlet,
    pub action_id: ActionId,
}

impl From<EdgeRecord> for Edge {
    fn from(row: EdgeRecord) -> Self {
        Self {
            id: row.id,
            outlet: Outlet {
                parent: row.source_object_id,
                name: row.source_port,
            },
            inlet: Inlet {
                parent: row.target_object_id,
                name: row.target_port,
            },
            action_id: row.action_id,
        }
    }
}

fn port_key(prefix: &str, name: &str) -> AttributeKey {
    AttributeKey::new(format!("{}{}", prefix, name))
}

/// A step created by `action` or already committed, of the expected kind.
fn expect_entity(
    db: &Database,
    action: &Action,
    id: &EntityId,
    expected: &[EntityKind],
) -> Result<EntityKind, RosError> {
    match db.entity_kind(id, Some(action))? {
        Some(kind) if expected.contains(&kind) => Ok(kind),
        Some(kind) => Err(RosError::Reference(format!(
            "{} is a {}, expected one of {:?}",
            id, kind, expected
        ))),
        None => Err(RosError::Reference(format!("{} does not exist", id))),
    }
}

// =============================================================================
// PROCESS
// =============================================================================

/// A processing step with named inputs and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    id: EntityId,
    name: String,
    inputs: BTreeMap<String, Binding>,
    outputs: BTreeMap<String, EntityId>,
}

impl Process {
    pub fn new(db: &Database, action: &mut Action, name: &str) -> Result<Self, RosError> {
        let id = entity::create(db, action, EntityKind::Process, name)?;
        Ok(Self {
            id,
            name: name.to_string(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, Binding> {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, EntityId> {
        &self.outputs
    }

    /// Bind an input port. Referenced entities must exist.
    pub fn set_input(
        &mut self,
        db: &Database,
        action: &mut Action,
        name: &str,
        binding: Binding,
    ) -> Result<(), RosError> {
        match &binding {
            Binding::Constant(_) => {}
            Binding::Variable { variable, source } => {
                expect_entity(db, action, variable, &[EntityKind::Variable])?;
                if let Some(source) = source {
                    expect_entity(
                        db,
                        action,
                        source,
                        &[EntityKind::Process, EntityKind::Logsheet],
                    )?;
                }
            }
            Binding::LogsheetColumn { logsheet, .. } => {
                expect_entity(db, action, logsheet, &[EntityKind::Logsheet])?;
            }
        }
        db.set_value(action, &self.id, &port_key(INPUT_PORT_PREFIX, name), &binding)?;
        self.inputs.insert(name.to_string(), binding);
        Ok(())
    }

    /// Unbind an input port.
    pub fn remove_input(
        &mut self,
        db: &Database,
        action: &mut Action,
        name: &str,
    ) -> Result<(), RosError> {
        db.delete_value(action, &self.id, &port_key(INPUT_PORT_PREFIX, name))?;
        self.inputs.remove(name);
        Ok(())
    }

    /// Declare that output `name` produces `variable`.
    pub fn set_output(
        &mut self,
        db: &Database,
        action: &mut Action,
        name: &str,
        variable: &EntityId,
    ) -> Result<(), RosError> {
        expect_entity(db, action, variable, &[EntityKind::Variable])?;
        db.set_value(action, &self.id, &port_key(OUTPUT_PORT_PREFIX, name), variable)?;
        self.outputs.insert(name.to_string(), variable.clone());
        Ok(())
    }
}

impl ResearchObject for Process {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Process
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Process
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (_, name) = entity::load_header::<Self>(db, id)?;
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        for attribute in db.attributes(id)? {
            if let Some(port) = attribute.as_str().strip_prefix(INPUT_PORT_PREFIX) {
                inputs.insert(port.to_string(), db.get(id, &attribute)?);
            } else if let Some(port) = attribute.as_str().strip_prefix(OUTPUT_PORT_PREFIX) {
                outputs.insert(port.to_string(), db.get(id, &attribute)?);
            }
        }
        Ok(Self {
            id: id.clone(),
            name,
            inputs,
            outputs,
        })
    }
}

// =============================================================================
// LOGSHEET
// =============================================================================

/// One logsheet column: the level its rows describe and the Variable it fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub column: String,
    pub level: EntityKind,
    pub variable: EntityId,
}

/// A manually entered table whose columns act as outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Logsheet {
    id: EntityId,
    name: String,
    headers: Vec<Header>,
}

impl Logsheet {
    pub fn new(db: &Database, action: &mut Action, name: &str) -> Result<Self, RosError> {
        let id = entity::create(db, action, EntityKind::Logsheet, name)?;
        Ok(Self {
            id,
            name: name.to_string(),
            headers: Vec::new(),
        })
    }

    #[must_use]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, column: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.column == column)
    }

    /// Validate and queue a new header list.
    pub fn set_headers(
        &mut self,
        db: &Database,
        action: &mut Action,
        headers: Vec<Header>,
    ) -> Result<(), RosError> {
        let mut columns = BTreeSet::new();
        for header in &headers {
            if header.column.trim().is_empty() {
                return Err(RosError::Validation(
                    "Logsheet column names cannot be empty".to_string(),
                ));
            }
            if !columns.insert(header.column.as_str()) {
                return Err(RosError::Validation(format!(
                    "Logsheet column {} is declared twice",
                    header.column
                )));
            }
            if !header.level.is_data_object() || header.level == EntityKind::Dataset {
                return Err(RosError::Validation(format!(
                    "Column {} has level {}, which is not a data object level",
                    header.column, header.level
                )));
            }
            expect_entity(db, action, &header.variable, &[EntityKind::Variable])?;
        }
        db.set_value(action, &self.id, &AttributeKey::from(HEADERS_ATTR), &headers)?;
        self.headers = headers;
        Ok(())
    }
}

impl ResearchObject for Logsheet {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Logsheet
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Logsheet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(db: &Database, id: &EntityId) -> Result<Self, RosError> {
        let (_, name) = entity::load_header::<Self>(db, id)?;
        let headers = db
            .lookup(id, &AttributeKey::from(HEADERS_ATTR))?
            .into_option()
            .unwrap_or_default();
        Ok(Self {
            id: id.clone(),
            name,
            headers,
        })
    }
}

// =============================================================================
// LINKING
// =============================================================================

/// Outlets that can feed `binding`.
///
/// `processes` must only contain steps created before the one being linked.
fn candidate_outlets(
    binding: &Binding,
    processes: &[&Process],
    logsheets: &[&Logsheet],
) -> Result<Vec<Outlet>, RosError> {
    let mut outlets = Vec::new();
    match binding {
        Binding::Constant(_) => {}
        Binding::Variable { variable, source } => {
            let wanted = |id: &EntityId| source.as_ref().is_none_or(|s| s == id);
            for process in processes.iter().filter(|p| wanted(p.id())) {
                for (name, produced) in process.outputs() {
                    if produced == variable {
                        outlets.push(Outlet {
                            parent: process.id().clone(),
                            name: name.clone(),
                        });
                    }
                }
            }
            for logsheet in logsheets.iter().filter(|l| wanted(l.id())) {
                for header in logsheet.headers().iter().filter(|h| &h.variable == variable) {
                    outlets.push(Outlet {
                        parent: logsheet.id().clone(),
                        name: header.column.clone(),
                    });
                }
            }
        }
        Binding::LogsheetColumn { logsheet, column } => {
            let sheet = logsheets
                .iter()
                .find(|l| l.id() == logsheet)
                .ok_or_else(|| RosError::Reference(format!("Logsheet {} does not exist", logsheet)))?;
            if sheet.header(column).is_none() {
                return Err(RosError::Reference(format!(
                    "Logsheet {} has no column {}",
                    logsheet, column
                )));
            }
            outlets.push(Outlet {
                parent: logsheet.clone(),
                name: column.clone(),
            });
        }
    }
    Ok(outlets)
}

/// Create edges feeding every input of `step`.
///
/// Only Processes created before `step` are considered producers, so a step
/// never links to a later one. Logsheets are always eligible. An input with
/// no producer stays unbound. Active edges into `step` that its current
/// bindings no longer produce are deactivated. All changes are committed in
/// one Action.
pub fn link_step(db: &mut Database, step: &EntityId) -> Result<Vec<Edge>, RosError> {
    let target_record = db.entity_record(step)?;
    if target_record.kind != EntityKind::Process {
        return Err(RosError::Reference(format!(
            "{} is a {}, only Processes have inputs to link",
            step, target_record.kind
        )));
    }

    let mut registry = ObjectRegistry::new();
    let mut prior = Vec::new();
    let mut sheets = Vec::new();
    for record in db.store().entities()? {
        match record.kind {
            EntityKind::Process if record.creation_order() < target_record.creation_order() => {
                prior.push(record.id.clone());
            }
            EntityKind::Logsheet => sheets.push(record.id.clone()),
            _ => continue,
        }
        registry.instantiate(db, &record.id)?;
    }
    registry.instantiate(db, step)?;

    let processes: Vec<&Process> = prior
        .iter()
        .filter_map(|id| match registry.get(id) {
            Some(Entity::Process(p)) => Some(p),
            _ => None,
        })
        .collect();
    let logsheets: Vec<&Logsheet> = sheets
        .iter()
        .filter_map(|id| match registry.get(id) {
            Some(Entity::Logsheet(l)) => Some(l),
            _ => None,
        })
        .collect();
    let Some(Entity::Process(target)) = registry.get(step) else {
        return Err(RosError::NotFound(format!("Process {} could not be loaded", step)));
    };

    let stored = db.store().pipeline_edges()?;
    let mut taken_ids: BTreeSet<EdgeId> = stored.iter().map(|e| e.id.clone()).collect();
    let active: Vec<Edge> = stored
        .into_iter()
        .filter(|e| e.is_active)
        .map(Edge::from)
        .collect();
    let mut linked: BTreeSet<(Outlet, Inlet)> = active
        .iter()
        .map(|e| (e.outlet.clone(), e.inlet.clone()))
        .collect();

    let mut action = db.begin_action(&format!("link {}", step))?;
    let mut wanted: BTreeSet<(Outlet, Inlet)> = BTreeSet::new();
    let mut created = Vec::new();
    for (name, binding) in target.inputs() {
        let inlet = Inlet {
            parent: step.clone(),
            name: name.clone(),
        };
        for outlet in candidate_outlets(binding, &processes, &logsheets)? {
            wanted.insert((outlet.clone(), inlet.clone()));
            if !linked.insert((outlet.clone(), inlet.clone())) {
                continue;
            }
            let id = EdgeId(generate_id_with(
                EDGE_PREFIX,
                db.config().max_id_attempts,
                |c| Ok(taken_ids.contains(&EdgeId(c.to_string()))),
                || Uuid::new_v4().simple().to_string(),
            )?);
            taken_ids.insert(id.clone());
            tracing::debug!(
                edge = %id,
                from = %outlet.parent,
                output = %outlet.name,
                to = %inlet.parent,
                input = %inlet.name,
                "linking"
            );
            action.queue(Mutation::AddEdge {
                id: id.clone(),
                source_object_id: outlet.parent.clone(),
                source_port: outlet.name.clone(),
                target_object_id: inlet.parent.clone(),
                target_port: inlet.name.clone(),
            });
            created.push(Edge {
                id,
                outlet,
                inlet: inlet.clone(),
                action_id: action.id().clone(),
            });
        }
    }

    let mut retired = 0usize;
    for edge in active.iter().filter(|e| &e.inlet.parent == step) {
        if wanted.contains(&(edge.outlet.clone(), edge.inlet.clone())) {
            continue;
        }
        tracing::debug!(
            edge = %edge.id,
            from = %edge.outlet.parent,
            output = %edge.outlet.name,
            input = %edge.inlet.name,
            "retiring stale edge"
        );
        action.queue(Mutation::DeactivateEdge {
            id: edge.id.clone(),
        });
        retired += 1;
    }

    db.commit(action)?;
    tracing::info!(step = %step, edges = created.len(), retired, "linked step");
    Ok(created)
}

// =============================================================================
// PIPELINE GRAPH
// =============================================================================

/// Directed multigraph of steps; each edge carries its full [`Edge`] record.
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    graph: DiGraph<EntityId, Edge>,
    index: BTreeMap<EntityId, NodeIndex>,
}

impl PipelineGraph {
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn contains(&self, step: &EntityId) -> bool {
        self.index.contains_key(step)
    }

    /// Step ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = &EntityId> {
        self.index.keys()
    }

    /// Every edge, in edge id order.
    #[must_use]
    pub fn edges(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.graph.edge_weights().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }

    /// Edges from `source` to `target`, in edge id order.
    #[must_use]
    pub fn edges_between(&self, source: &EntityId, target: &EntityId) -> Vec<&Edge> {
        let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) else {
            return Vec::new();
        };
        let mut edges: Vec<&Edge> = self
            .graph
            .edges_connecting(s, t)
            .map(|e| e.weight())
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }
}

/// Project every active pipeline edge into a graph.
pub fn build_pipeline_graph(db: &Database) -> Result<PipelineGraph, RosError> {
    let edges: Vec<Edge> = db
        .store()
        .pipeline_edges()?
        .into_iter()
        .filter(|e| e.is_active)
        .map(Edge::from)
        .collect();

    let steps: BTreeSet<EntityId> = edges
        .iter()
        .flat_map(|e| [e.outlet.parent.clone(), e.inlet.parent.clone()])
        .collect();

    let mut graph = DiGraph::new();
    let mut index = BTreeMap::new();
    for step in steps {
        let idx = graph.add_node(step.clone());
        index.insert(step, idx);
    }
    for edge in edges {
        if let (Some(&s), Some(&t)) = (index.get(&edge.outlet.parent), index.get(&edge.inlet.parent)) {
            graph.add_edge(s, t, edge);
        }
    }

    tracing::info!(
        steps = graph.node_count(),
        edges = graph.edge_count(),
        "built pipeline graph"
    );
    Ok(PipelineGraph { graph, index })
}
