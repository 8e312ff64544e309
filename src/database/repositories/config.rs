use super::{DatabaseError, Repository};
use crate::config::AnalysisConfig;
use crate::database::now;
use log::warn;
use rusqlite::{params, Connection};

/// Key/value persistence for `AnalysisConfig`.
pub struct ConfigRepository<'a> {
    conn: &'a Connection,
}

impl Repository for ConfigRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> ConfigRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stored settings over the defaults. Unknown keys and unparsable
    /// values are skipped.
    pub fn get_config(&self) -> Result<AnalysisConfig, DatabaseError> {
        let mut config = AnalysisConfig::default();

        let mut stmt = self.conn.prepare("SELECT key, value FROM app_config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            if let Err(e) = config.apply(&key, &value) {
                warn!("Ignoring stored setting: {}", e);
            }
        }

        Ok(config)
    }

    pub fn save_config(&self, config: &AnalysisConfig) -> Result<(), DatabaseError> {
        let stamp = now();
        let tx = self.transaction()?;
        for (key, value) in config.entries() {
            tx.execute(
                "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, stamp],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
