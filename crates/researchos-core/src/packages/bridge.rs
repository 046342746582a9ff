//! Cross-package bridging.

use super::classify::{InputClass, classify_input};
use super::graph::{ConfigGraph, NodeKind};
use super::{BridgeDef, PackageContext, parse_variable_name};
use crate::RosError;
use petgraph::graph::NodeIndex;
use std::collections::BTreeMap;

/// Connect packages through their declared bridges.
///
/// `bridges` maps each declaring package to its bridges by name. Variable
/// sources are wired to every target with an edge tagged
/// `package.bridge`, turning unspecified targets into variable inputs.
/// Constant sources assign their value to unspecified targets.
///
/// Every bridge is resolved before the graph is touched: on error the
/// graph is left exactly as it was.
///
/// Returns the number of edges added.
pub fn bridge_packages(
    graph: &mut ConfigGraph,
    bridges: &BTreeMap<String, BTreeMap<String, BridgeDef>>,
    ctx: &PackageContext,
) -> Result<usize, RosError> {
    let plan = BridgePlan::resolve(graph, bridges, ctx)?;
    let added = plan.apply(graph);
    tracing::info!(bridges = added, "bridged packages");
    Ok(added)
}

// =============================================================================
// PLAN
// =============================================================================

/// Node kind changes and bridge edges, fully validated.
#[derive(Debug, Default)]
struct BridgePlan {
    kinds: BTreeMap<NodeIndex, NodeKind>,
    edges: Vec<(NodeIndex, NodeIndex, String)>,
}

impl BridgePlan {
    fn resolve(
        graph: &ConfigGraph,
        bridges: &BTreeMap<String, BTreeMap<String, BridgeDef>>,
        ctx: &PackageContext,
    ) -> Result<Self, RosError> {
        let mut plan = Self::default();
        for (package, package_bridges) in bridges {
            ctx.require(package)?;
            for (bridge_name, bridge) in package_bridges {
                let tag = format!("{}.{}", package, bridge_name);
                let targets = bridge
                    .targets
                    .as_slice()
                    .iter()
                    .map(|t| plan.resolve_target(graph, ctx, t))
                    .collect::<Result<Vec<_>, _>>()?;

                for source in bridge.sources.as_slice() {
                    plan.add_source(graph, ctx, &tag, source, &targets)?;
                }
            }
        }
        Ok(plan)
    }

    /// Kind of `idx` with the pending changes applied.
    fn kind<'a>(&'a self, graph: &'a ConfigGraph, idx: NodeIndex) -> &'a NodeKind {
        self.kinds
            .get(&idx)
            .unwrap_or_else(|| &graph.node_at(idx).kind)
    }

    fn add_source(
        &mut self,
        graph: &ConfigGraph,
        ctx: &PackageContext,
        tag: &str,
        source: &serde_json::Value,
        targets: &[NodeIndex],
    ) -> Result<(), RosError> {
        match classify_input(source) {
            InputClass::InputVariable(name) => {
                let path = parse_variable_name(&name)?;
                ctx.require(&path.package)?;
                let from = graph.require_output(&path)?;
                for &to in targets {
                    if *self.kind(graph, to) == NodeKind::Unspecified {
                        self.kinds.insert(to, NodeKind::InputVariable);
                    }
                    self.edges.push((from, to, tag.to_string()));
                }
                Ok(())
            }
            InputClass::Constant(value) => {
                for &to in targets {
                    if *self.kind(graph, to) != NodeKind::Unspecified {
                        return Err(RosError::Reference(format!(
                            "Bridge {} cannot assign a constant to {}, it is already bound",
                            tag,
                            graph.node_at(to).name
                        )));
                    }
                    self.kinds.insert(to, NodeKind::Constant(value.clone()));
                }
                Ok(())
            }
            InputClass::LogsheetVariable(_) => Err(RosError::NotImplemented(format!(
                "Bridge {} uses a logsheet source",
                tag
            ))),
            _ => Err(RosError::Validation(format!(
                "Bridge {} has a source that is neither a variable nor a constant: {}",
                tag, source
            ))),
        }
    }

    fn resolve_target(
        &self,
        graph: &ConfigGraph,
        ctx: &PackageContext,
        target: &str,
    ) -> Result<NodeIndex, RosError> {
        match classify_input(&serde_json::Value::String(target.to_string())) {
            InputClass::InputVariable(_) => {}
            InputClass::LogsheetVariable(_) => {
                return Err(RosError::NotImplemented(format!(
                    "Bridge target {} is a logsheet column",
                    target
                )));
            }
            _ => {
                return Err(RosError::Validation(format!(
                    "Bridge target {} is not a variable path",
                    target
                )));
            }
        }
        let path = parse_variable_name(target)?;
        ctx.require(&path.package)?;
        let idx = graph.require_input(&path)?;
        let kind = self.kind(graph, idx);
        if !kind.is_bridge_target() {
            return Err(RosError::Reference(format!(
                "Bridge target {} is bound to a {:?} and cannot be bridged",
                target, kind
            )));
        }
        Ok(idx)
    }

    /// Write the plan into `graph`. Returns the number of new edges.
    fn apply(self, graph: &mut ConfigGraph) -> usize {
        for (idx, kind) in self.kinds {
            graph.node_mut(idx).kind = kind;
        }
        let mut added = 0;
        for (from, to, tag) in self.edges {
            if graph.add_bridge(from, to, &tag) {
                tracing::debug!(
                    bridge = %tag,
                    source = %graph.node_at(from).name,
                    target = %graph.node_at(to).name,
                    "bridged variable"
                );
                added += 1;
            }
        }
        added
    }
}
