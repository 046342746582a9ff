//! # Address Graph
//!
//! The hierarchy of data objects under one dataset, rebuilt on demand from
//! the persisted schema and the active hierarchy relations.
//!
//! ## Invariants
//!
//! - The dataset itself is always a node (the root).
//! - Every edge goes from a parent to a child whose kind sits strictly later
//!   in the dataset schema. The graph is therefore acyclic.
//! - Nodes are inserted in id order, so traversal order does not depend on
//!   storage iteration order.

use crate::database::Database;
use crate::entity::Dataset;
use crate::registry::{self, EntityKind};
use crate::{EntityId, RosError};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Parent -> child membership graph of one dataset.
#[derive(Debug, Clone)]
pub struct AddressGraph {
    dataset: EntityId,
    schema: Vec<EntityKind>,
    graph: DiGraph<EntityId, ()>,
    index: BTreeMap<EntityId, NodeIndex>,
    order: Vec<EntityId>,
}

impl AddressGraph {
    /// Build the graph for `dataset` from committed state.
    pub fn build(db: &Database, dataset: &EntityId) -> Result<Self, RosError> {
        registry::expect_kind(dataset, EntityKind::Dataset)?;
        db.entity_record(dataset)?;
        let schema = Dataset::load_schema(db, dataset)?;
        let relations = db.relations(dataset)?;
        let graph = Self::from_relations(
            dataset.clone(),
            schema,
            relations.into_iter().map(|r| (r.parent, r.child)),
        )?;
        tracing::info!(
            dataset = %dataset,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built address graph"
        );
        Ok(graph)
    }

    /// Build from an explicit relation list. Kinds are read from id prefixes.
    pub fn from_relations(
        dataset: EntityId,
        schema: Vec<EntityKind>,
        relations: impl IntoIterator<Item = (EntityId, EntityId)>,
    ) -> Result<Self, RosError> {
        let edges: BTreeSet<(EntityId, EntityId)> = relations.into_iter().collect();
        if schema.is_empty() && !edges.is_empty() {
            return Err(RosError::Structural(format!(
                "Dataset {} has relations but no schema",
                dataset
            )));
        }

        let position = |id: &EntityId| -> Result<usize, RosError> {
            let kind = registry::resolve(id)?;
            schema.iter().position(|k| *k == kind).ok_or_else(|| {
                RosError::Structural(format!("{} is a {}, which is not in the schema", id, kind))
            })
        };

        for (parent, child) in &edges {
            if child == &dataset {
                return Err(RosError::Structural(format!(
                    "Relation {} -> {} points into the dataset",
                    parent, child
                )));
            }
            if registry::resolve(parent)? == EntityKind::Dataset && parent != &dataset {
                return Err(RosError::Structural(format!(
                    "Relation parent {} is a different dataset",
                    parent
                )));
            }
            let (p, c) = (position(parent)?, position(child)?);
            if c <= p {
                return Err(RosError::Structural(format!(
                    "Relation {} -> {} violates schema order",
                    parent, child
                )));
            }
        }

        let mut ids: BTreeSet<EntityId> = BTreeSet::new();
        ids.insert(dataset.clone());
        for (parent, child) in &edges {
            ids.insert(parent.clone());
            ids.insert(child.clone());
        }

        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for id in ids {
            let idx = graph.add_node(id.clone());
            index.insert(id, idx);
        }
        for (parent, child) in &edges {
            if let (Some(&p), Some(&c)) = (index.get(parent), index.get(child)) {
                graph.add_edge(p, c, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| {
                RosError::Structural(format!(
                    "Hierarchy contains a cycle through {}",
                    graph[cycle.node_id()]
                ))
            })?
            .into_iter()
            .map(|idx| graph[idx].clone())
            .collect();

        Ok(Self {
            dataset,
            schema,
            graph,
            index,
            order,
        })
    }

    #[must_use]
    pub fn dataset(&self) -> &EntityId {
        &self.dataset
    }

    #[must_use]
    pub fn schema(&self) -> &[EntityKind] {
        &self.schema
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.index.contains_key(id)
    }

    /// Node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = &EntityId> {
        self.index.keys()
    }

    /// (parent, child) pairs in ascending order.
    #[must_use]
    pub fn edges(&self) -> Vec<(EntityId, EntityId)> {
        let mut edges: Vec<(EntityId, EntityId)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(p, c)| (self.graph[p].clone(), self.graph[c].clone()))
            .collect();
        edges.sort();
        edges
    }

    /// Fixed evaluation order: every parent precedes its children.
    #[must_use]
    pub fn topological_order(&self) -> &[EntityId] {
        &self.order
    }

    /// Direct parents, ascending by id.
    #[must_use]
    pub fn parents(&self, id: &EntityId) -> Vec<EntityId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut parents: Vec<EntityId> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|p| self.graph[p].clone())
            .collect();
        parents.sort();
        parents
    }

    /// All ancestors, nearest first. Ancestors at the same distance are
    /// ordered by id.
    #[must_use]
    pub fn ancestors(&self, id: &EntityId) -> Vec<EntityId> {
        let mut seen: BTreeSet<EntityId> = BTreeSet::new();
        let mut result = Vec::new();
        let mut frontier = vec![id.clone()];
        while !frontier.is_empty() {
            let mut next: BTreeSet<EntityId> = BTreeSet::new();
            for node in &frontier {
                for parent in self.parents(node) {
                    if !seen.contains(&parent) {
                        next.insert(parent);
                    }
                }
            }
            for parent in &next {
                seen.insert(parent.clone());
                result.push(parent.clone());
            }
            frontier = next.into_iter().collect();
        }
        result
    }

    /// The graph restricted to `keep`. The dataset root is always kept.
    #[must_use]
    pub fn subgraph(&self, keep: &BTreeSet<EntityId>) -> Self {
        let edges = self
            .edges()
            .into_iter()
            .filter(|(p, c)| keep.contains(p) && keep.contains(c));

        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for id in self.index.keys() {
            if keep.contains(id) || id == &self.dataset {
                let idx = graph.add_node(id.clone());
                index.insert(id.clone(), idx);
            }
        }
        for (parent, child) in edges {
            if let (Some(&p), Some(&c)) = (index.get(&parent), index.get(&child)) {
                graph.add_edge(p, c, ());
            }
        }
        let order = self
            .order
            .iter()
            .filter(|id| index.contains_key(*id))
            .cloned()
            .collect();

        Self {
            dataset: self.dataset.clone(),
            schema: self.schema.clone(),
            graph,
            index,
            order,
        }
    }
}
