//! Database migrations - embedded SQL files
//!
//! Migrations are compiled into the binary with include_str! and applied in
//! order by `MigrationService`. Each entry is (filename, sql_content).
//!
//! To add a migration, create `NNN_description.sql` next to this file and
//! append an entry below.

pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_sync_schema.sql", include_str!("001_sync_schema.sql")),
];

/// Name of the bootstrap migration that creates `sys_migrations`
pub const BOOTSTRAP_MIGRATION: &str = "000_migrations.sql";
