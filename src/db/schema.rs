//! Versioned schema for the record store.
//!
//! Each collection is a key-value table of JSON documents keyed by `id`.
//! Migrations are additive: they only create what is missing.

/// Migration steps; step `i` upgrades the schema from version `i` to `i + 1`.
pub const MIGRATIONS: &[&str] = &[
  // v1: shopping items
  r#"
CREATE TABLE IF NOT EXISTS todos (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
"#,
  // v2: named lists grouping the items
  r#"
CREATE TABLE IF NOT EXISTS lists (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
"#,
];

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;
