//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the engine:
//! - Identifiers (`EntityId`, `ActionId`, `EdgeId`, `AttributeKey`, `ContentHash`)
//! - The stored attribute value (`Value`) and the lookup outcome (`Lookup`)
//! - Error types (`RosError`)
//!
//! ## Ordering Guarantees
//!
//! Every identifier implements `Ord` so it can key a `BTreeMap`/`BTreeSet`.
//! Graph builders rely on this to produce the same node order on every run.

use crate::primitives::PREFIX_LEN;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Globally unique identifier of a research entity.
///
/// The first two characters are the type prefix (`DS`, `SB`, `VR`, ...);
/// the remainder is an opaque UUID-derived suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create an entity id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-character type prefix, if the id is long enough to carry one.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.0.get(..PREFIX_LEN)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one committed (or pending) Action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a pipeline edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an attribute slot on an entity.
///
/// Either a built-in attribute name (`name`, `schema`, ...), a variable id
/// (data values), or a port key (`in:<name>`, `out:<name>`) on a step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeKey(pub String);

impl AttributeKey {
    /// Create an attribute key from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Built-in attributes cannot be deleted.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        crate::primitives::BUILTIN_ATTRIBUTES.contains(&self.0.as_str())
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&EntityId> for AttributeKey {
    fn from(id: &EntityId) -> Self {
        Self(id.0.clone())
    }
}

/// BLAKE3 digest of a serialized value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Rebuild a hash from a stored key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RosError> {
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            RosError::SerializationError(format!("Content hash must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(digest))
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// An attribute value as held in the value store.
///
/// This is the closed set of shapes the blob codec can represent. Literals in
/// subset conditions and values bound to data objects are both `Value`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare a numeric value against an integer literal.
    ///
    /// Returns `None` for non-numeric values.
    #[must_use]
    pub fn compare_int(&self, other: i64) -> Option<Ordering> {
        match self {
            Self::Int(a) => Some(a.cmp(&other)),
            Self::Float(a) => a.partial_cmp(&(other as f64)),
            _ => None,
        }
    }

    /// Equality with integer/float coercion, applied recursively.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as f64).partial_cmp(b) == Some(Ordering::Equal)
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Membership: list element, substring, or map key.
    #[must_use]
    pub fn contains(&self, needle: &Self) -> bool {
        match (self, needle) {
            (Self::List(items), _) => items.iter().any(|item| item.loose_eq(needle)),
            (Self::Text(haystack), Self::Text(n)) => haystack.contains(n.as_str()),
            (Self::Map(map), Self::Text(key)) => map.contains_key(key),
            _ => false,
        }
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = RosError;

    fn try_from(raw: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match raw {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if n.is_u64() {
                    return Err(RosError::Validation(format!(
                        "Integer {} does not fit the value store's integer range",
                        n
                    )));
                } else {
                    let f = n.as_f64().ok_or_else(|| {
                        RosError::Validation(format!("Number {} is not representable", n))
                    })?;
                    Self::Float(f)
                }
            }
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::try_from(v)?)))
                    .collect::<Result<BTreeMap<_, _>, RosError>>()?,
            ),
        })
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number),
            Value::Text(s) => Self::String(s.clone()),
            Value::List(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Map(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

// =============================================================================
// LOOKUP OUTCOME
// =============================================================================

/// Result of reading an attribute.
///
/// `NotAssociated` means there is no active association for the
/// (entity, attribute) pair. It is distinct from an association whose
/// value is `Value::Null`; the subset evaluator relies on the difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Value(T),
    NotAssociated,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn is_associated(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::NotAssociated => None,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the ResearchOS engine.
///
/// - No silent failures: graph builders never return a partial graph
/// - Use `Result<T, RosError>` for fallible operations
/// - The engine never panics; all errors are recoverable
#[derive(Debug, Error)]
pub enum RosError {
    /// Caller supplied malformed data (schema shape, condition tree, literal).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A named entity does not exist or has the wrong kind.
    #[error("Reference error: {0}")]
    Reference(String),

    /// A fully qualified package variable could not be resolved.
    #[error("Unresolved variable {package}.{runnable}.{variable}: {reason}")]
    UnresolvedVariable {
        package: String,
        runnable: String,
        variable: String,
        reason: String,
    },

    /// No active association exists for the attribute.
    #[error("Attribute {attribute} is not associated with {entity}")]
    NotAssociated {
        entity: EntityId,
        attribute: AttributeKey,
    },

    /// A graph invariant would be violated (schema order, cycle).
    #[error("Structural error: {0}")]
    Structural(String),

    /// Identifier generation collided on every attempt.
    #[error("Could not generate a unique {prefix} id after {attempts} attempts")]
    IdExhausted { prefix: String, attempts: u32 },

    /// The requested behavior is deliberately unsupported.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A storage backend or I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
