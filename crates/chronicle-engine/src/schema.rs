//! SQL schema for the engine's own tables.
//!
//! Executed once at open via `PRAGMA user_version`. Future migrations will
//! be gated on that version number.
//!
//! Foreign keys here (and the uid key host tables declare against the
//! registry) are discovery metadata, not enforced constraints: registry and
//! ledger rows for a fresh insert are written *after* the primary write has
//! committed, so enforcement would reject the legitimate write order. The
//! bundled SQLite can be compiled with enforcement on by default, so the
//! schema switches it off explicitly.

/// Name of the row-registry table.
pub const REGISTRY_TABLE: &str = "uids";

/// Name of the change-ledger table.
pub const HISTORY_TABLE: &str = "history";

/// Catalog of tracked tables.
pub const TABLES_CATALOG: &str = "chronicle_tables";

/// Catalog of (table, column) pairs; ledger entries reference columns by
/// the ids allocated here.
pub const COLUMNS_CATALOG: &str = "chronicle_columns";

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA foreign_keys = OFF;
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS chronicle_tables (
    table_id INTEGER PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS chronicle_columns (
    column_id INTEGER PRIMARY KEY,
    table_id  INTEGER NOT NULL REFERENCES chronicle_tables(table_id),
    name      TEXT NOT NULL,
    UNIQUE (table_id, name)
);

-- Row registry: one row per tracked row, keyed by opaque uid. Only the
-- active flag is ever updated; rows leave only through the purge path.
CREATE TABLE IF NOT EXISTS uids (
    uid             TEXT PRIMARY KEY,
    origin_table_id INTEGER NOT NULL REFERENCES chronicle_tables(table_id),
    active          INTEGER NOT NULL DEFAULT 1
);

-- Change ledger: strictly append-only. No UPDATE or DELETE is ever issued
-- against this table outside the purge path. An entry carries exactly one
-- of literal_value / reference_uid.
CREATE TABLE IF NOT EXISTS history (
    entry_id      INTEGER PRIMARY KEY,
    op            TEXT NOT NULL,  -- 'insert' | 'update' | 'delete' | 'restore'
    uid           TEXT NOT NULL REFERENCES uids(uid),
    column_id     INTEGER NOT NULL REFERENCES chronicle_columns(column_id),
    literal_value TEXT,           -- JSON-encoded Value
    reference_uid TEXT,
    at            TEXT NOT NULL,  -- RFC 3339 UTC, microsecond precision
    user          TEXT NOT NULL,
    CHECK ((literal_value IS NULL) != (reference_uid IS NULL))
);

CREATE INDEX IF NOT EXISTS history_uid_column_idx ON history(uid, column_id, at);
CREATE INDEX IF NOT EXISTS history_at_idx         ON history(at);

PRAGMA user_version = 1;
";
