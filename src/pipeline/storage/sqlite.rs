use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::{IdRecovery, IdentityKey, RegulationStore};
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::types::Record;

/// Table names and id recovery mode for a store connection.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub regulations_table: String,
    pub components_table: String,
    pub id_recovery: IdRecovery,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let settings = Settings::default();
        Self::from_settings(&settings)
    }
}

impl StoreOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            regulations_table: settings.regulations_table.clone(),
            components_table: settings.components_table.clone(),
            id_recovery: settings.id_recovery,
        }
    }
}

/// SQLite-backed regulation store. Table names are trusted identifiers
/// (validated when settings are loaded).
pub struct SqliteStore {
    conn: Connection,
    options: StoreOptions,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to open database {}: {}", path.display(), e);
            e
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        info!(path = %path.display(), "Connected to regulation store");
        Ok(Self { conn, options })
    }

    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, options })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs schema DDL in a single transaction; nothing is kept if any statement fails.
    pub fn ensure_schema(&mut self, ddl: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(ddl).map_err(|e| {
            error!("Schema DDL failed: {}", e);
            e
        })?;
        tx.commit()?;
        info!("Schema ensured");
        Ok(())
    }

    /// Reads the DDL file and applies it. A missing file is fatal.
    pub fn ensure_schema_from_file(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Ensuring schema");
        let ddl = fs::read_to_string(path).map_err(|e| {
            PipelineError::Schema(format!("cannot read DDL file {}: {}", path.display(), e))
        })?;
        self.ensure_schema(&ddl)
    }

    pub fn regulation_count(&self, entity: &str) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE entity = ?1",
            self.options.regulations_table
        );
        let count: i64 = self.conn.query_row(&sql, params![entity], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn association_ids(&self) -> Result<Vec<(i64, i64)>> {
        let sql = format!(
            "SELECT regulations_id, components_id FROM {} ORDER BY regulations_id",
            self.options.components_table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn insert_sql(&self, returning: bool) -> String {
        format!(
            "INSERT INTO {} (created_at, updated_at, is_active, title, gtype, entity, \
             external_link, rtype_id, summary, classification_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10){}",
            self.options.regulations_table,
            if returning { " RETURNING id" } else { "" }
        )
    }

    /// Ids of the `count` newest rows of the entity, oldest first.
    fn newest_ids(&self, entity: &str, count: usize) -> rusqlite::Result<Vec<i64>> {
        let sql = format!(
            "SELECT id FROM {} WHERE entity = ?1 ORDER BY id DESC LIMIT ?2",
            self.options.regulations_table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity, count as i64], |row| row.get(0))?;
        let mut ids = rows.collect::<rusqlite::Result<Vec<i64>>>()?;
        ids.reverse();
        Ok(ids)
    }
}

fn timestamp(record: &Record) -> String {
    record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl RegulationStore for SqliteStore {
    fn existing_identities(&self, entity: &str) -> Result<Vec<IdentityKey>> {
        let sql = format!(
            "SELECT title, created_at, COALESCE(external_link, '') FROM {} WHERE entity = ?1",
            self.options.regulations_table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity], |row| {
            let title: Option<String> = row.get(0)?;
            let created_at: Option<String> = row.get(1)?;
            let link: String = row.get(2)?;
            Ok(IdentityKey::from_parts(
                title.as_deref(),
                created_at.as_deref(),
                Some(link.as_str()),
            ))
        })?;
        let keys = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(entity, existing = keys.len(), "Loaded existing identities");
        Ok(keys)
    }

    fn insert_regulations(&mut self, entity: &str, records: &[Record]) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let recovery = self.options.id_recovery;
        let sql = self.insert_sql(recovery == IdRecovery::Returning);

        // Dropping the transaction without commit rolls the whole batch back
        let tx = self.conn.transaction()?;
        let mut ids: Vec<i64> = Vec::with_capacity(records.len());
        {
            let mut stmt = tx.prepare(&sql)?;
            for r in records {
                let updated_at = timestamp(r);
                let values = params![
                    r.created_at,
                    updated_at,
                    r.is_active,
                    r.title,
                    r.gtype,
                    r.entity,
                    r.external_link,
                    r.rtype_id,
                    r.summary,
                    r.classification_id,
                ];
                match recovery {
                    IdRecovery::Returning => {
                        ids.push(stmt.query_row(values, |row| row.get(0))?);
                    }
                    IdRecovery::MostRecent => {
                        stmt.execute(values)?;
                    }
                }
            }
        }
        tx.commit()?;

        if recovery == IdRecovery::MostRecent {
            warn!(
                entity,
                "Recovering ids from the newest rows; correct only with a single writer per entity"
            );
            ids = self
                .newest_ids(entity, records.len())
                .map_err(|source| PipelineError::IdRecovery {
                    inserted: records.len(),
                    source,
                })?;
        }

        Ok(ids)
    }

    fn insert_association_links(
        &mut self,
        regulation_ids: &[i64],
        component_id: i64,
    ) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {} (regulations_id, components_id) VALUES (?1, ?2)",
            self.options.components_table
        );
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for id in regulation_ids {
                written += stmt.execute(params![id, component_id])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }
}
