use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::db::{BlockRecord, FunctionRecord, RunStatus, TranslationRecord};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    #[error("Malformed address {0:?} in run database")]
    MalformedAddress(String),
}

pub type DbResult<T> = Result<T, DbError>;

fn hex(address: u64) -> String {
    format!("{address:#x}")
}

fn parse_hex(text: &str) -> DbResult<u64> {
    u64::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|_| DbError::MalformedAddress(text.to_string()))
}

fn join_entries(entries: &[u64]) -> String {
    entries.iter().map(|e| hex(*e)).collect::<Vec<_>>().join(",")
}

fn split_entries(text: &str) -> DbResult<Vec<u64>> {
    text.split(',').filter(|s| !s.is_empty()).map(parse_hex).collect()
}

/// SQLite-backed translation history.
#[derive(Debug)]
pub struct RunDb {
    conn: Connection,
}

impl RunDb {
    /// Open (or create) a run database and bring its schema up to date.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a translation record and return its row id.
    pub fn insert_translation(&self, record: &TranslationRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO translations (binary, binary_hash, arch, entry_points, status, error,
                                      blocks, functions, relocations, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.binary,
                record.binary_hash,
                record.arch,
                join_entries(&record.entry_points),
                record.status.as_str(),
                record.error,
                record.blocks as i64,
                record.functions as i64,
                record.relocations as i64,
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Store the block and function inventory of a run in one transaction.
    pub fn insert_inventory(
        &self,
        run_id: i64,
        blocks: &[BlockRecord],
        functions: &[FunctionRecord],
    ) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO translation_blocks (run_id, address, size, kind)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for block in blocks {
                stmt.execute(params![run_id, hex(block.address), block.size as i64, block.kind])?;
            }

            let mut stmt = tx.prepare(
                r#"
                INSERT INTO translation_functions (run_id, name, entry, low, high, blocks)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for func in functions {
                stmt.execute(params![
                    run_id,
                    func.name,
                    hex(func.entry),
                    hex(func.low),
                    hex(func.high),
                    func.blocks as i64
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// List translations (oldest first), optionally filtered by binary name.
    pub fn list_translations(&self, binary: Option<&str>) -> DbResult<Vec<TranslationRecord>> {
        fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TranslationRecord, String)> {
            let record = TranslationRecord {
                binary: row.get(0)?,
                binary_hash: row.get(1)?,
                arch: row.get(2)?,
                entry_points: Vec::new(),
                status: RunStatus::from_str_lossy(&row.get::<_, String>(4)?),
                error: row.get(5)?,
                blocks: row.get::<_, i64>(6)? as usize,
                functions: row.get::<_, i64>(7)? as usize,
                relocations: row.get::<_, i64>(8)? as usize,
                started_at: row.get(9)?,
                finished_at: row.get(10)?,
            };
            Ok((record, row.get(3)?))
        }

        let mut stmt = if binary.is_some() {
            self.conn.prepare(
                r#"
                SELECT binary, binary_hash, arch, entry_points, status, error,
                       blocks, functions, relocations, started_at, finished_at
                FROM translations
                WHERE binary = ?1
                ORDER BY id
                "#,
            )?
        } else {
            self.conn.prepare(
                r#"
                SELECT binary, binary_hash, arch, entry_points, status, error,
                       blocks, functions, relocations, started_at, finished_at
                FROM translations
                ORDER BY id
                "#,
            )?
        };

        let rows = if let Some(bin) = binary {
            stmt.query_map(params![bin], map_row)?
        } else {
            stmt.query_map([], map_row)?
        };

        let mut out = Vec::new();
        for row in rows {
            let (mut record, entries) = row?;
            record.entry_points = split_entries(&entries)?;
            out.push(record);
        }
        Ok(out)
    }

    /// Row id of the newest run for `binary`.
    pub fn latest_translation_id(&self, binary: &str) -> DbResult<Option<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM translations
            WHERE binary = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query(params![binary])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn load_blocks(&self, run_id: i64) -> DbResult<Vec<BlockRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT address, size, kind
            FROM translation_blocks
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (address, size, kind) = row?;
            out.push(BlockRecord { address: parse_hex(&address)?, size: size as u64, kind });
        }
        Ok(out)
    }

    pub fn load_functions(&self, run_id: i64) -> DbResult<Vec<FunctionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, entry, low, high, blocks
            FROM translation_functions
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, entry, low, high, blocks) = row?;
            out.push(FunctionRecord {
                name,
                entry: parse_hex(&entry)?,
                low: parse_hex(&low)?,
                high: parse_hex(&high)?,
                blocks: blocks as usize,
            });
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// Version map:
/// - 0: no schema
/// - 1: translations
/// - 2: block and function inventories
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS translations (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                binary       TEXT NOT NULL,
                binary_hash  TEXT,
                arch         TEXT NOT NULL,
                entry_points TEXT NOT NULL,
                status       TEXT NOT NULL,
                error        TEXT,
                blocks       INTEGER NOT NULL,
                functions    INTEGER NOT NULL,
                relocations  INTEGER NOT NULL,
                started_at   TEXT NOT NULL,
                finished_at  TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS translation_blocks (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id  INTEGER NOT NULL REFERENCES translations(id),
                address TEXT NOT NULL,
                size    INTEGER NOT NULL,
                kind    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS translation_functions (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id  INTEGER NOT NULL REFERENCES translations(id),
                name    TEXT NOT NULL,
                entry   TEXT NOT NULL,
                low     TEXT NOT NULL,
                high    TEXT NOT NULL,
                blocks  INTEGER NOT NULL
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
