use crate::backend::{LookSink, LookSource};
use crate::model::*;
use anyhow::{anyhow, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// SQLite store for looks and the fixture patch.
pub struct LookDatabase {
    conn: Connection,
}

/// One look in the JSON exchange format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LookRecord {
    pub id: LookId,
    pub name: String,
    #[serde(default)]
    pub fixtures: Vec<FixtureSnapshot>,
}

/// Whole-database JSON exchange format.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DatabaseExport {
    #[serde(default)]
    pub fixtures: Vec<FixturePatch>,
    #[serde(default)]
    pub looks: Vec<LookRecord>,
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, json: &str) -> rusqlite::Result<T> {
    serde_json::from_str(json).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl LookDatabase {
    /// Open or create database at the specified path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("Failed to open database at {:?}", path))?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fixtures (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                universe INTEGER NOT NULL,
                start_channel INTEGER NOT NULL,
                channel_count INTEGER NOT NULL,
                ranges_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_fixtures_universe ON fixtures(universe);

            CREATE TABLE IF NOT EXISTS looks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_looks_name ON looks(name);

            CREATE TABLE IF NOT EXISTS look_fixtures (
                look_id INTEGER NOT NULL,
                fixture_id INTEGER NOT NULL,
                channel_count INTEGER NOT NULL,
                channels_json TEXT NOT NULL,
                display_order INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (look_id, fixture_id),
                FOREIGN KEY (look_id) REFERENCES looks(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1');
            "#,
        )?;
        Ok(())
    }

    // ---- patch ----

    pub fn upsert_fixture(&self, patch: &FixturePatch) -> Result<()> {
        let ranges_json = serde_json::to_string(&patch.ranges)?;
        self.conn.execute(
            "INSERT INTO fixtures (id, name, universe, start_channel, channel_count, ranges_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                universe = excluded.universe,
                start_channel = excluded.start_channel,
                channel_count = excluded.channel_count,
                ranges_json = excluded.ranges_json",
            params![
                patch.fixture_id.0 as i64,
                patch.name,
                patch.universe,
                patch.start_channel,
                patch.channel_count as i64,
                ranges_json,
            ],
        )?;
        Ok(())
    }

    pub fn load_patch(&self) -> Result<Vec<FixturePatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, universe, start_channel, channel_count, ranges_json FROM fixtures ORDER BY id",
        )?;
        let patch = stmt
            .query_map([], |row| {
                let ranges_json: String = row.get(5)?;
                Ok(FixturePatch {
                    fixture_id: FixtureId(row.get::<_, i64>(0)? as u64),
                    name: row.get(1)?,
                    universe: row.get(2)?,
                    start_channel: row.get(3)?,
                    channel_count: row.get::<_, i64>(4)? as usize,
                    ranges: json_column(5, &ranges_json)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patch)
    }

    // ---- looks ----

    pub fn create_look(&self, name: &str) -> Result<LookId> {
        self.conn.execute("INSERT INTO looks (name) VALUES (?1)", params![name])?;
        let id = self.conn.last_insert_rowid() as LookId;
        log::info!("[DB] Created look {} '{}'", id, name);
        Ok(id)
    }

    pub fn delete_look(&self, look_id: LookId) -> Result<()> {
        let deleted = self.conn.execute("DELETE FROM looks WHERE id = ?1", params![look_id as i64])?;
        if deleted == 0 {
            return Err(anyhow!("Look {} not found", look_id));
        }
        Ok(())
    }

    pub fn list_looks(&self) -> Result<Vec<LookSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.id, l.name, COUNT(lf.fixture_id)
             FROM looks l LEFT JOIN look_fixtures lf ON lf.look_id = l.id
             GROUP BY l.id ORDER BY l.id",
        )?;
        let looks = stmt
            .query_map([], |row| {
                Ok(LookSummary {
                    id: row.get::<_, i64>(0)? as LookId,
                    name: row.get(1)?,
                    fixture_count: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(looks)
    }

    fn look_name(&self, look_id: LookId) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT name FROM looks WHERE id = ?1", params![look_id as i64], |row| row.get(0))
            .optional()?)
    }

    /// Load a look with its fixtures in display order.
    pub fn load_look(&self, look_id: LookId) -> Result<LookSnapshot> {
        if self.look_name(look_id)?.is_none() {
            return Err(anyhow!("Look {} not found", look_id));
        }

        let mut stmt = self.conn.prepare(
            "SELECT lf.fixture_id, lf.channel_count, lf.channels_json, f.ranges_json
             FROM look_fixtures lf LEFT JOIN fixtures f ON f.id = lf.fixture_id
             WHERE lf.look_id = ?1
             ORDER BY lf.display_order, lf.fixture_id",
        )?;
        let fixtures = stmt
            .query_map(params![look_id as i64], |row| {
                let channels_json: String = row.get(2)?;
                let ranges_json: Option<String> = row.get(3)?;
                Ok(FixtureSnapshot {
                    fixture_id: FixtureId(row.get::<_, i64>(0)? as u64),
                    channel_count: row.get::<_, i64>(1)? as usize,
                    channels: json_column(2, &channels_json)?,
                    ranges: match ranges_json {
                        Some(json) => json_column(3, &json)?,
                        None => Vec::new(),
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("[DB] Loaded look {} ({} fixtures)", look_id, fixtures.len());
        Ok(LookSnapshot { look_id, fixtures })
    }

    /// Replace a look's fixtures with `fixtures` in one transaction.
    ///
    /// Fixtures missing from `fixtures` leave the look. The payload's
    /// channel count wins when it is set; otherwise existing rows keep theirs
    /// and new rows take the patched count (or the highest stored offset).
    /// Existing rows keep their display order, new rows go to the end.
    pub fn store_look(&mut self, look_id: LookId, fixtures: &[FixtureChannels]) -> Result<()> {
        if self.look_name(look_id)?.is_none() {
            return Err(anyhow!("Look {} not found", look_id));
        }

        let tx = self.conn.transaction()?;
        let existing = Self::look_rows(&tx, look_id)?;
        let patched = Self::patched_counts(&tx)?;
        let mut next_order = existing.values().map(|(_, order)| *order + 1).max().unwrap_or(0);

        tx.execute("DELETE FROM look_fixtures WHERE look_id = ?1", params![look_id as i64])?;
        for fixture in fixtures {
            let (known, order) = match existing.get(&fixture.fixture_id) {
                Some(&row) => row,
                None => {
                    next_order += 1;
                    (patched.get(&fixture.fixture_id).copied().unwrap_or(0), next_order - 1)
                }
            };
            let stored = fixture.channels.iter().map(|e| e.offset + 1).max().unwrap_or(0);
            let declared = if fixture.channel_count > 0 { fixture.channel_count } else { known };
            let channel_count = declared.max(stored);
            tx.execute(
                "INSERT INTO look_fixtures (look_id, fixture_id, channel_count, channels_json, display_order)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    look_id as i64,
                    fixture.fixture_id.0 as i64,
                    channel_count as i64,
                    serde_json::to_string(&fixture.channels)?,
                    order,
                ],
            )?;
        }
        tx.commit()?;

        log::info!("[DB] Saved look {} ({} fixtures)", look_id, fixtures.len());
        Ok(())
    }

    /// (channel_count, display_order) per fixture of a look.
    fn look_rows(tx: &Transaction, look_id: LookId) -> Result<HashMap<FixtureId, (usize, i64)>> {
        let mut stmt =
            tx.prepare("SELECT fixture_id, channel_count, display_order FROM look_fixtures WHERE look_id = ?1")?;
        let rows = stmt
            .query_map(params![look_id as i64], |row| {
                Ok((
                    FixtureId(row.get::<_, i64>(0)? as u64),
                    (row.get::<_, i64>(1)? as usize, row.get::<_, i64>(2)?),
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn patched_counts(tx: &Transaction) -> Result<HashMap<FixtureId, usize>> {
        let mut stmt = tx.prepare("SELECT id, channel_count FROM fixtures")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((FixtureId(row.get::<_, i64>(0)? as u64), row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    // ---- exchange ----

    /// Export entire state to JSON string
    pub fn export_to_json(&self) -> Result<String> {
        let mut export = DatabaseExport {
            fixtures: self.load_patch()?,
            looks: Vec::new(),
        };
        for summary in self.list_looks()? {
            let snapshot = self.load_look(summary.id)?;
            export.looks.push(LookRecord {
                id: summary.id,
                name: summary.name,
                fixtures: snapshot.fixtures,
            });
        }
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import from JSON string. In merge mode, fixtures and looks whose id already exists are skipped.
    pub fn import_from_json(&mut self, json: &str, merge: bool) -> Result<()> {
        let import: DatabaseExport = serde_json::from_str(json).context("Invalid JSON format")?;

        let tx = self.conn.transaction()?;
        if !merge {
            tx.execute("DELETE FROM look_fixtures", [])?;
            tx.execute("DELETE FROM looks", [])?;
            tx.execute("DELETE FROM fixtures", [])?;
        }

        for patch in &import.fixtures {
            if merge && Self::exists(&tx, "fixtures", patch.fixture_id.0)? {
                continue;
            }
            tx.execute(
                "INSERT INTO fixtures (id, name, universe, start_channel, channel_count, ranges_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    patch.fixture_id.0 as i64,
                    patch.name,
                    patch.universe,
                    patch.start_channel,
                    patch.channel_count as i64,
                    serde_json::to_string(&patch.ranges)?,
                ],
            )?;
        }

        for look in &import.looks {
            if merge && Self::exists(&tx, "looks", look.id)? {
                continue;
            }
            tx.execute("INSERT INTO looks (id, name) VALUES (?1, ?2)", params![look.id as i64, look.name])?;
            for (idx, fixture) in look.fixtures.iter().enumerate() {
                tx.execute(
                    "INSERT INTO look_fixtures (look_id, fixture_id, channel_count, channels_json, display_order)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        look.id as i64,
                        fixture.fixture_id.0 as i64,
                        fixture.channel_count as i64,
                        serde_json::to_string(&fixture.channels)?,
                        idx as i64,
                    ],
                )?;
            }
        }

        tx.commit()?;
        log::info!(
            "[DB] Imported {} fixtures, {} looks (merge: {})",
            import.fixtures.len(),
            import.looks.len(),
            merge
        );
        Ok(())
    }

    fn exists(tx: &Transaction, table: &str, id: u64) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", table);
        Ok(tx.query_row(&sql, params![id as i64], |row| row.get(0))?)
    }
}

impl LookSource for LookDatabase {
    fn fetch_look(&mut self, look_id: LookId) -> Result<LookSnapshot> {
        self.load_look(look_id)
    }
}

impl LookSink for LookDatabase {
    fn save_look(&mut self, look_id: LookId, fixtures: &[FixtureChannels]) -> Result<()> {
        self.store_look(look_id, fixtures)
    }
}
