//! # researchos-core
//!
//! The persistence and dependency-linking engine for ResearchOS - THE LOGIC.
//!
//! Research data lives as typed entities (datasets, subjects, trials,
//! variables, processing steps) whose attribute values are versioned. Every
//! change is recorded by an [`Action`](action::Action); nothing is
//! overwritten, a newer association simply supersedes the older one.
//!
//! ## Subsystems
//!
//! - `database` + `store`: the action log and the content-addressed value
//!   store, backed by memory or redb
//! - `registry` + `entity`: the closed set of entity kinds and their objects
//! - `address` + `subset`: the data-object hierarchy of a dataset and the
//!   condition evaluator that selects nodes from it
//! - `pipeline`: input/output linking of processing steps
//! - `packages`: runnable graphs built from package files, and bridges
//!   between packages
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - One writer at a time: commit takes `&mut Database`
//! - Deterministic: BTreeMap for keyed state, ordered graph traversal

// =============================================================================
// MODULES
// =============================================================================

pub mod action;
pub mod address;
pub mod config;
pub mod database;
pub mod entity;
pub mod formats;
pub mod packages;
pub mod pipeline;
pub mod primitives;
pub mod registry;
pub mod store;
pub mod subset;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ActionId, AttributeKey, ContentHash, EdgeId, EntityId, Lookup, RosError, Value,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use action::{Action, ActionRecord};
pub use address::AddressGraph;
pub use config::Config;
pub use database::{Database, StorageBackend};
pub use entity::{
    BasicObject, DataObject, Dataset, Entity, ResearchObject, Variable, validate_schema,
};
pub use pipeline::{
    Binding, Edge, Header, Inlet, Logsheet, Outlet, PipelineGraph, Process, build_pipeline_graph,
    link_step,
};
pub use registry::{EntityKind, ObjectRegistry};
pub use store::{MemoryStore, RedbStore, Store};
pub use subset::{AttributeSource, Condition, Operator, Subset, evaluate};

// =============================================================================
// RE-EXPORTS: Packages
// =============================================================================

pub use packages::{
    BridgeDef, ConfigGraph, PackageContext, PackageDef, RunnableDef, RunnableKind,
    bridge_packages, classify_input, parse_variable_name,
};
