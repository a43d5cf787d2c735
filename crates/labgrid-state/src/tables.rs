//! redb table definitions for the resource ledger.

use redb::TableDefinition;

/// Registered templates keyed by template name.
pub const TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("templates");

/// Table labs keyed by table number.
pub const TABLES: TableDefinition<u32, &[u8]> = TableDefinition::new("tables");

/// Deployed resources keyed by `{table:010}:{vmid:020}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Resource id → owning table number.
pub const RESOURCE_INDEX: TableDefinition<u64, u32> = TableDefinition::new("resource_index");
