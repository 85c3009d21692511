//! Database Schema Definitions
//!
//! The base schema is idempotent and applied on every open. Later changes
//! are expressed as numbered migrations recorded in `schema_migrations`.

/// Table definitions applied on every open
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A numbered schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    /// Statements run inside the migration transaction; empty for markers
    pub statements: &'static [&'static str],
}

/// All migrations in ascending version order
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial route store",
    statements: &[],
}];

/// Highest version this build understands
pub fn current_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Migrations newer than `applied_version`
pub fn pending_migrations(applied_version: i64) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > applied_version)
}
