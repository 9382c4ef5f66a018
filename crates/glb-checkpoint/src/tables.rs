//! redb table definitions for the checkpoint store.

use redb::TableDefinition;

/// Work-queue snapshots keyed by logical worker slot (not physical place
/// id — the record must survive the process that wrote it).
pub const SLOTS: TableDefinition<u32, &[u8]> = TableDefinition::new("slots");
