//! redb table definitions for the Converge state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Child records use `{workload}:{zero-padded number}` keys so a prefix scan
//! returns them in numeric order.

use redb::TableDefinition;

/// Workload specs keyed by `{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Revision templates keyed by `{name}:{revision:020}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revisions");

/// Finished rollouts keyed by `{name}:{started_at:020}:{revision:020}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Shape shared by every table: string keys, JSON values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
