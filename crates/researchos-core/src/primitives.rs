//! # Engine Primitives
//!
//! Hardcoded constants for the ResearchOS engine.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Tunable limits live in [`crate::config::Config`] instead.

/// Length of the type prefix at the start of every identifier.
pub const PREFIX_LEN: usize = 2;

/// Prefix of Action identifiers. Actions are not entities.
pub const ACTION_PREFIX: &str = "AC";

/// Prefix of pipeline edge identifiers. Edges are not entities.
pub const EDGE_PREFIX: &str = "ED";

/// Default number of attempts before identifier generation gives up.
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 16;

/// Default processing level for runnables that do not declare one.
pub const DEFAULT_LEVEL: &str = "Trial";

/// Maximum size of a single encoded value payload (16 MB).
///
/// Checked before decoding so a corrupted length cannot trigger a huge allocation.
pub const MAX_VALUE_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// BUILT-IN ATTRIBUTES
// =============================================================================

/// Display name of every entity.
pub const NAME_ATTR: &str = "name";

/// Dataset hierarchy schema (also persisted in its own table).
pub const SCHEMA_ATTR: &str = "schema";

/// Subset condition tree.
pub const CONDITIONS_ATTR: &str = "conditions";

/// Dataset that a subset queries.
pub const DATASET_ATTR: &str = "dataset";

/// Logsheet column headers.
pub const HEADERS_ATTR: &str = "headers";

/// Attributes that every entity relies on and that cannot be deleted.
pub const BUILTIN_ATTRIBUTES: &[&str] = &[
    NAME_ATTR,
    SCHEMA_ATTR,
    CONDITIONS_ATTR,
    DATASET_ATTR,
    HEADERS_ATTR,
];

/// Attribute key prefix of a step's input binding.
pub const INPUT_PORT_PREFIX: &str = "in:";

/// Attribute key prefix of a step's output binding.
pub const OUTPUT_PORT_PREFIX: &str = "out:";

// =============================================================================
// PACKAGE CONFIGURATION SENTINELS
// =============================================================================

/// Input expression that binds the current data object's name.
pub const DATA_OBJECT_NAME_KEY: &str = "__data_object_name__";

/// Prefix of input expressions that read a logsheet column.
pub const LOGSHEET_KEY: &str = "__logsheet__";

/// Single key of an input table that binds a data file path.
pub const DATA_FILE_KEY: &str = "__data_file__";

/// Input expressions that leave a variable unspecified.
pub const UNSPECIFIED_MARKERS: &[&str] = &["", "?"];
