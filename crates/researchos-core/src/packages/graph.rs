//! # Config Graph
//!
//! Runnables and their variables as one directed graph:
//!
//! ```text
//! input --Port--> runnable --Port--> output --Reference--> input of a later runnable
//!                                    output --Bridge(tag)--> input in another package
//! ```
//!
//! Node ids are uuid v5 values over the node role and qualified name, so the
//! same package files always produce the same ids.

use super::classify::{InputClass, classify_input};
use super::{PackageDef, RunnableKind, VariablePath};
use crate::config::Config;
use crate::registry::EntityKind;
use crate::RosError;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// What a config node stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Runnable {
        kind: RunnableKind,
        level: EntityKind,
        batch: EntityKind,
    },
    Unspecified,
    Constant(serde_json::Value),
    InputVariable,
    OutputVariable,
    LogsheetVariable(String),
    DataObjectName,
    DataFilePath(serde_json::Value),
}

impl NodeKind {
    /// Whether a bridge may write into an input of this kind.
    #[must_use]
    pub fn is_bridge_target(&self) -> bool {
        matches!(self, Self::Unspecified | Self::InputVariable)
    }
}

impl From<InputClass> for NodeKind {
    fn from(class: InputClass) -> Self {
        match class {
            InputClass::Unspecified => Self::Unspecified,
            InputClass::DataObjectName => Self::DataObjectName,
            InputClass::LogsheetVariable(column) => Self::LogsheetVariable(column),
            InputClass::InputVariable(_) => Self::InputVariable,
            InputClass::DataFilePath(path) => Self::DataFilePath(path),
            InputClass::Constant(value) => Self::Constant(value),
        }
    }
}

/// Role of a node within its runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRole {
    Runnable,
    Input,
    Output,
}

impl NodeRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    pub id: Uuid,
    /// `package.runnable` or `package.runnable.variable`.
    pub name: String,
    pub role: NodeRole,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdge {
    /// Input -> runnable, or runnable -> output.
    Port,
    /// Output -> input within one package.
    Reference,
    /// Output -> input across packages, tagged `package.bridge`.
    Bridge(String),
}

fn node_id(role: NodeRole, name: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("researchos:{}:{}", role.as_str(), name).as_bytes(),
    )
}

/// The runnable graph of a set of packages.
#[derive(Debug, Clone, Default)]
pub struct ConfigGraph {
    graph: DiGraph<ConfigNode, ConfigEdge>,
    index: BTreeMap<(NodeRole, String), NodeIndex>,
}

impl ConfigGraph {
    /// Build the graph of `packages`, resolving references inside each package.
    ///
    /// References that name another package are left unconnected for
    /// [`bridge_packages`](super::bridge_packages).
    pub fn from_packages(packages: &[PackageDef], config: &Config) -> Result<Self, RosError> {
        let mut graph = Self::default();
        let mut seen = BTreeSet::new();
        for package in packages {
            if !seen.insert(package.name.as_str()) {
                return Err(RosError::Validation(format!(
                    "Package {} is defined twice",
                    package.name
                )));
            }
            graph.add_package(package, config)?;
        }
        for package in packages {
            graph.resolve_references(package)?;
        }
        tracing::info!(
            packages = packages.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built config graph"
        );
        Ok(graph)
    }

    fn add_package(&mut self, package: &PackageDef, config: &Config) -> Result<(), RosError> {
        for kind in RunnableKind::ALL {
            for (name, def) in package.runnables(kind) {
                let qualified = format!("{}.{}", package.name, name);
                if self.index.contains_key(&(NodeRole::Runnable, qualified.clone())) {
                    return Err(RosError::Validation(format!(
                        "Runnable {} is defined more than once",
                        qualified
                    )));
                }
                let runnable = self.add_node(
                    NodeRole::Runnable,
                    qualified.clone(),
                    NodeKind::Runnable {
                        kind,
                        level: def.level(config)?,
                        batch: def.batch(config)?,
                    },
                );
                for (input, expr) in &def.inputs {
                    let node = self.add_node(
                        NodeRole::Input,
                        format!("{}.{}", qualified, input),
                        classify_input(expr).into(),
                    );
                    self.graph.add_edge(node, runnable, ConfigEdge::Port);
                }
                for output in &def.outputs {
                    let node = self.add_node(
                        NodeRole::Output,
                        format!("{}.{}", qualified, output),
                        NodeKind::OutputVariable,
                    );
                    self.graph.add_edge(runnable, node, ConfigEdge::Port);
                }
            }
        }
        Ok(())
    }

    fn resolve_references(&mut self, package: &PackageDef) -> Result<(), RosError> {
        for kind in RunnableKind::ALL {
            for (name, def) in package.runnables(kind) {
                for (input, expr) in &def.inputs {
                    let InputClass::InputVariable(reference) = classify_input(expr) else {
                        continue;
                    };
                    let Some(source) = local_reference(&package.name, &reference) else {
                        continue;
                    };
                    let from = self.require_output(&source)?;
                    let to = self.find(NodeRole::Input, &format!("{}.{}.{}", package.name, name, input));
                    if let Some(to) = to {
                        self.graph.add_edge(from, to, ConfigEdge::Reference);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_node(&mut self, role: NodeRole, name: String, kind: NodeKind) -> NodeIndex {
        let idx = self.graph.add_node(ConfigNode {
            id: node_id(role, &name),
            name: name.clone(),
            role,
            kind,
        });
        self.index.insert((role, name), idx);
        idx
    }

    pub(super) fn find(&self, role: NodeRole, name: &str) -> Option<NodeIndex> {
        self.index.get(&(role, name.to_string())).copied()
    }

    /// Output node of `path`, or `UnresolvedVariable` saying what is missing.
    pub(super) fn require_output(&self, path: &VariablePath) -> Result<NodeIndex, RosError> {
        self.require(NodeRole::Output, path)
    }

    /// Input node of `path`, or `UnresolvedVariable` saying what is missing.
    pub(super) fn require_input(&self, path: &VariablePath) -> Result<NodeIndex, RosError> {
        self.require(NodeRole::Input, path)
    }

    fn require(&self, role: NodeRole, path: &VariablePath) -> Result<NodeIndex, RosError> {
        if let Some(idx) = self.find(role, &path.to_string()) {
            return Ok(idx);
        }
        let reason = if self.find(NodeRole::Runnable, &path.runnable_name()).is_some() {
            format!("runnable has no {} named {}", role.as_str(), path.variable)
        } else if self.index.keys().any(|(_, name)| name.starts_with(&format!("{}.", path.package))) {
            format!("package has no runnable named {}", path.runnable)
        } else {
            format!("package {} is not loaded", path.package)
        };
        Err(path.unresolved(reason))
    }

    pub(super) fn node_mut(&mut self, idx: NodeIndex) -> &mut ConfigNode {
        &mut self.graph[idx]
    }

    pub(super) fn node_at(&self, idx: NodeIndex) -> &ConfigNode {
        &self.graph[idx]
    }

    /// Add a bridge edge unless the same tagged edge already exists.
    pub(super) fn add_bridge(&mut self, from: NodeIndex, to: NodeIndex, tag: &str) -> bool {
        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|e| matches!(e.weight(), ConfigEdge::Bridge(t) if t == tag));
        if !exists {
            self.graph.add_edge(from, to, ConfigEdge::Bridge(tag.to_string()));
        }
        !exists
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Look a node up by role and qualified name.
    #[must_use]
    pub fn node(&self, role: NodeRole, name: &str) -> Option<&ConfigNode> {
        self.find(role, name).map(|idx| &self.graph[idx])
    }

    /// Nodes ordered by (role, name).
    pub fn nodes(&self) -> impl Iterator<Item = &ConfigNode> {
        self.index.values().map(|&idx| &self.graph[idx])
    }

    /// Qualified runnable names, ordered by name.
    #[must_use]
    pub fn runnables(&self) -> Vec<&str> {
        self.nodes()
            .filter(|n| n.role == NodeRole::Runnable)
            .map(|n| n.name.as_str())
            .collect()
    }

    /// (source, target, tag) of every bridge edge, sorted.
    #[must_use]
    pub fn bridges(&self) -> Vec<(&str, &str, &str)> {
        let mut bridges: Vec<(&str, &str, &str)> = self
            .graph
            .edge_references()
            .filter_map(|e| match e.weight() {
                ConfigEdge::Bridge(tag) => Some((
                    self.graph[e.source()].name.as_str(),
                    self.graph[e.target()].name.as_str(),
                    tag.as_str(),
                )),
                _ => None,
            })
            .collect();
        bridges.sort_unstable();
        bridges
    }

    /// Variable inputs with nothing feeding them yet, plus unspecified inputs.
    #[must_use]
    pub fn open_inputs(&self) -> Vec<&str> {
        self.index
            .iter()
            .filter(|((role, _), _)| *role == NodeRole::Input)
            .filter(|(_, idx)| {
                let node = &self.graph[**idx];
                match node.kind {
                    NodeKind::Unspecified => true,
                    NodeKind::InputVariable => self
                        .graph
                        .neighbors_directed(**idx, Direction::Incoming)
                        .next()
                        .is_none(),
                    _ => false,
                }
            })
            .map(|((_, name), _)| name.as_str())
            .collect()
    }

    /// Runnables in dependency order. A cycle is a structural error.
    pub fn runnable_order(&self) -> Result<Vec<&str>, RosError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            RosError::Structural(format!(
                "Package graph contains a cycle through {}",
                self.graph[cycle.node_id()].name
            ))
        })?;
        Ok(order
            .into_iter()
            .map(|idx| &self.graph[idx])
            .filter(|n| n.role == NodeRole::Runnable)
            .map(|n| n.name.as_str())
            .collect())
    }
}

/// A reference that stays inside `package`, qualified. `None` when it
/// names another package.
fn local_reference(package: &str, reference: &str) -> Option<VariablePath> {
    let segments: Vec<&str> = reference.split('.').collect();
    match segments.as_slice() {
        [runnable, variable] => Some(VariablePath {
            package: package.to_string(),
            runnable: (*runnable).to_string(),
            variable: (*variable).to_string(),
        }),
        [pkg, runnable, variable] if *pkg == package => Some(VariablePath {
            package: package.to_string(),
            runnable: (*runnable).to_string(),
            variable: (*variable).to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::packages::RunnableDef;
    use serde_json::json;

    fn runnable(inputs: &[(&str, serde_json::Value)], outputs: &[&str]) -> RunnableDef {
        RunnableDef {
            path: "run.py".to_string(),
            subset: "all".to_string(),
            inputs: inputs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            outputs: outputs.iter().map(|s| (*s).to_string()).collect(),
            level: None,
            batch: None,
        }
    }

    fn package() -> PackageDef {
        let mut pkg = PackageDef {
            name: "gait".to_string(),
            ..PackageDef::default()
        };
        pkg.process.insert(
            "load".to_string(),
            runnable(&[("file", json!({"__data_file__": "raw.c3d"}))], &["markers"]),
        );
        pkg.process.insert(
            "filter".to_string(),
            runnable(&[("markers", json!("load.markers")), ("cutoff", json!(6))], &["filtered"]),
        );
        pkg.plot.insert(
            "show".to_string(),
            runnable(&[("data", json!("gait.filter.filtered")), ("title", json!("?"))], &[]),
        );
        pkg
    }

    #[test]
    fn nodes_and_local_references() {
        let graph = ConfigGraph::from_packages(&[package()], &Config::default()).expect("build");
        // 3 runnables, 5 inputs, 2 outputs
        assert_eq!(graph.node_count(), 10);
        // 5 input ports, 2 output ports, 2 references
        assert_eq!(graph.edge_count(), 9);
        assert_eq!(graph.runnables(), vec!["gait.filter", "gait.load", "gait.show"]);
        assert_eq!(
            graph.node(NodeRole::Input, "gait.filter.cutoff").map(|n| &n.kind),
            Some(&NodeKind::Constant(json!(6)))
        );
        assert_eq!(graph.open_inputs(), vec!["gait.show.title"]);
        assert_eq!(
            graph.runnable_order().expect("order"),
            vec!["gait.load", "gait.filter", "gait.show"]
        );
    }

    #[test]
    fn node_ids_are_deterministic() {
        let a = ConfigGraph::from_packages(&[package()], &Config::default()).expect("build");
        let b = ConfigGraph::from_packages(&[package()], &Config::default()).expect("build");
        let ids = |g: &ConfigGraph| g.nodes().map(|n| n.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        let input = a.node(NodeRole::Input, "gait.load.file").expect("input");
        assert_ne!(Some(input.id), a.node(NodeRole::Runnable, "gait.load").map(|n| n.id));
    }

    #[test]
    fn unresolved_local_reference() {
        let mut pkg = package();
        pkg.process.insert(
            "broken".to_string(),
            runnable(&[("x", json!("load.velocity"))], &[]),
        );
        let err = ConfigGraph::from_packages(&[pkg], &Config::default()).expect_err("unresolved");
        match err {
            RosError::UnresolvedVariable { package, runnable, variable, .. } => {
                assert_eq!((package.as_str(), runnable.as_str()), ("gait", "load"));
                assert_eq!(variable, "velocity");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn foreign_reference_is_left_open() {
        let mut pkg = package();
        pkg.stats.insert(
            "anova".to_string(),
            runnable(&[("y", json!("other.calc.speed"))], &["p"]),
        );
        let graph = ConfigGraph::from_packages(&[pkg], &Config::default()).expect("build");
        assert!(graph.open_inputs().contains(&"gait.anova.y"));
    }

    #[test]
    fn duplicate_runnable_across_kinds_is_rejected() {
        let mut pkg = package();
        pkg.stats.insert("load".to_string(), runnable(&[], &[]));
        assert!(matches!(
            ConfigGraph::from_packages(&[pkg], &Config::default()),
            Err(RosError::Validation(_))
        ));
        assert!(matches!(
            ConfigGraph::from_packages(&[package(), package()], &Config::default()),
            Err(RosError::Validation(_))
        ));
    }

    #[test]
    fn reference_cycle_is_structural() {
        let mut pkg = PackageDef {
            name: "loop".to_string(),
            ..PackageDef::default()
        };
        pkg.process.insert("a".to_string(), runnable(&[("x", json!("b.y"))], &["x"]));
        pkg.process.insert("b".to_string(), runnable(&[("y", json!("a.x"))], &["y"]));
        let graph = ConfigGraph::from_packages(&[pkg], &Config::default()).expect("build");
        assert!(matches!(graph.runnable_order(), Err(RosError::Structural(_))));
    }
}
