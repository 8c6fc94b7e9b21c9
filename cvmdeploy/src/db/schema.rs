//! Database schema.

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// One row per deployment name. `record` holds the full JSON document;
/// the other columns exist for filtering and ordering.
const DEPLOYMENTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS deployments (
    name TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_deployments_created_at ON deployments(created_at);
";

pub fn all_schemas() -> [&'static str; 2] {
    [SCHEMA_VERSION_TABLE, DEPLOYMENTS_TABLE]
}
