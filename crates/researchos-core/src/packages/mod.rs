//! # Package Configuration
//!
//! Packages declare runnables (processes, plots, stats) and the variables
//! that flow between them. The app layer deserializes one [`PackageDef`] per
//! package file; this module turns a set of them into a [`ConfigGraph`] and
//! wires packages together through their bridges.
//!
//! Variable references use dotted paths:
//!
//! - `runnable.variable` inside the declaring package
//! - `package.runnable.variable` anywhere
//!
//! The set of packages taking part in a build is passed explicitly as a
//! [`PackageContext`].

mod bridge;
mod classify;
mod graph;

pub use bridge::bridge_packages;
pub use classify::{InputClass, classify_input, is_variable_path};
pub use graph::{ConfigEdge, ConfigGraph, ConfigNode, NodeKind, NodeRole};

use crate::config::Config;
use crate::registry::EntityKind;
use crate::RosError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// DEFINITIONS
// =============================================================================

/// Kind of runnable declared by a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableKind {
    Process,
    Plot,
    Stats,
}

impl RunnableKind {
    pub const ALL: [Self; 3] = [Self::Process, Self::Plot, Self::Stats];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Plot => "plot",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One process, plot or stats entry of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnableDef {
    /// Path of the code to run, relative to the package root.
    pub path: String,
    /// Name of the subset the runnable iterates over.
    pub subset: String,
    /// Input name -> input expression (see [`classify_input`]).
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Output variable names.
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
}

impl RunnableDef {
    /// Processing level, falling back to `config.default_level`.
    pub fn level(&self, config: &Config) -> Result<EntityKind, RosError> {
        let name = self.level.as_deref().unwrap_or(&config.default_level);
        data_object_level(name)
    }

    /// Batch level, falling back to the processing level.
    pub fn batch(&self, config: &Config) -> Result<EntityKind, RosError> {
        match &self.batch {
            Some(name) => data_object_level(name),
            None => self.level(config),
        }
    }
}

fn data_object_level(name: &str) -> Result<EntityKind, RosError> {
    match EntityKind::from_name(name) {
        Some(kind) if kind.is_data_object() => Ok(kind),
        _ => Err(RosError::Validation(format!(
            "Level {} is not a data object kind",
            name
        ))),
    }
}

/// A TOML field that accepts either one item or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Many(items) => items,
            Self::One(item) => std::slice::from_ref(item),
        }
    }
}

/// A connection from variables of one package to inputs of another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeDef {
    /// Producing outputs (`package.runnable.variable`) or constant values.
    pub sources: OneOrMany<serde_json::Value>,
    /// Receiving inputs (`package.runnable.variable`).
    pub targets: OneOrMany<String>,
}

/// One package file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDef {
    pub name: String,
    #[serde(default)]
    pub process: BTreeMap<String, RunnableDef>,
    #[serde(default)]
    pub plot: BTreeMap<String, RunnableDef>,
    #[serde(default)]
    pub stats: BTreeMap<String, RunnableDef>,
    #[serde(default)]
    pub bridges: BTreeMap<String, BridgeDef>,
}

impl PackageDef {
    /// Runnables of one kind, ordered by name.
    #[must_use]
    pub fn runnables(&self, kind: RunnableKind) -> &BTreeMap<String, RunnableDef> {
        match kind {
            RunnableKind::Process => &self.process,
            RunnableKind::Plot => &self.plot,
            RunnableKind::Stats => &self.stats,
        }
    }

    /// Total number of runnables of every kind.
    #[must_use]
    pub fn runnable_count(&self) -> usize {
        self.process.len() + self.plot.len() + self.stats.len()
    }
}

/// Bridges of every package, keyed by the declaring package.
#[must_use]
pub fn collect_bridges(packages: &[PackageDef]) -> BTreeMap<String, BTreeMap<String, BridgeDef>> {
    packages
        .iter()
        .filter(|p| !p.bridges.is_empty())
        .map(|p| (p.name.clone(), p.bridges.clone()))
        .collect()
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Names of the packages taking part in the current build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageContext {
    packages: BTreeSet<String>,
}

impl PackageContext {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn from_packages(packages: &[PackageDef]) -> Self {
        Self::new(packages.iter().map(|p| p.name.as_str()))
    }

    #[must_use]
    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// `Reference` error unless `package` participates.
    pub fn require(&self, package: &str) -> Result<(), RosError> {
        if self.contains(package) {
            Ok(())
        } else {
            Err(RosError::Reference(format!(
                "Package {} is not participating",
                package
            )))
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }
}

// =============================================================================
// VARIABLE PATHS
// =============================================================================

/// A fully qualified `package.runnable.variable` path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariablePath {
    pub package: String,
    pub runnable: String,
    pub variable: String,
}

impl VariablePath {
    /// Qualified name of the runnable, `package.runnable`.
    #[must_use]
    pub fn runnable_name(&self) -> String {
        format!("{}.{}", self.package, self.runnable)
    }

    pub(crate) fn unresolved(&self, reason: impl Into<String>) -> RosError {
        RosError::UnresolvedVariable {
            package: self.package.clone(),
            runnable: self.runnable.clone(),
            variable: self.variable.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.package, self.runnable, self.variable)
    }
}

/// Split `package.runnable.variable`. Exactly three non-empty segments.
pub fn parse_variable_name(name: &str) -> Result<VariablePath, RosError> {
    let segments: Vec<&str> = name.split('.').collect();
    match segments.as_slice() {
        [package, runnable, variable]
            if !package.is_empty() && !runnable.is_empty() && !variable.is_empty() =>
        {
            Ok(VariablePath {
                package: (*package).to_string(),
                runnable: (*runnable).to_string(),
                variable: (*variable).to_string(),
            })
        }
        _ => Err(RosError::Validation(format!(
            "Variable name {:?} must have the form package.runnable.variable",
            name
        ))),
    }
}
