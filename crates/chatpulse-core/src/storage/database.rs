//! SQLite-backed counter persistence.
//!
//! Provides persistent storage for:
//! - Per-epoch participant counters
//! - Epoch history (open/close times and winners)

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{data_dir, migrations, CounterPersistence};
use crate::counter::ParticipantScore;
use crate::error::{CoreError, DatabaseError};
use crate::ranking::RankedEntry;

/// One row of epoch history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch_id: u64,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub winner_id: Option<String>,
    pub winner_score: Option<u64>,
}

/// SQLite database for counter storage.
///
/// The connection sits behind a mutex so a single `Database` can be shared
/// by the counter store and reporting commands.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/chatpulse/chatpulse.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("chatpulse.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, CoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent epochs first.
    pub fn recent_epochs(&self, limit: usize) -> Result<Vec<EpochRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT epoch_id, started_at, closed_at, winner_id, winner_score
             FROM epochs
             ORDER BY epoch_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<u64>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (epoch_id, started_at, closed_at, winner_id, winner_score) = row?;
            out.push(EpochRecord {
                epoch_id,
                started_at: parse_ts("epochs", &started_at)?,
                closed_at: closed_at.as_deref().map(|s| parse_ts("epochs", s)).transpose()?,
                winner_id,
                winner_score,
            });
        }
        Ok(out)
    }
}

fn parse_ts(table: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            table: table.to_string(),
            message: format!("bad timestamp '{raw}': {e}"),
        })
}

impl CounterPersistence for Database {
    fn current_epoch(&self) -> Result<Option<u64>, DatabaseError> {
        let conn = self.conn.lock();
        let epoch = conn
            .query_row(
                "SELECT MAX(epoch_id) FROM epochs WHERE closed_at IS NULL",
                [],
                |row| row.get::<_, Option<u64>>(0),
            )
            .optional()?
            .flatten();
        Ok(epoch)
    }

    fn begin_epoch(&self, epoch_id: u64) -> Result<(), DatabaseError> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO epochs (epoch_id, started_at) VALUES (?1, ?2)",
            params![epoch_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load(&self, epoch_id: u64) -> Result<Vec<ParticipantScore>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT participant_id, score, last_updated
             FROM counters
             WHERE epoch_id = ?1
             ORDER BY participant_id",
        )?;
        let rows = stmt.query_map(params![epoch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (participant_id, score, last_updated) = row?;
            out.push(ParticipantScore {
                participant_id,
                score,
                last_updated: parse_ts("counters", &last_updated)?,
            });
        }
        Ok(out)
    }

    fn save(&self, epoch_id: u64, scores: &[ParticipantScore]) -> Result<(), DatabaseError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO counters (epoch_id, participant_id, score, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in scores {
                stmt.execute(params![
                    epoch_id,
                    s.participant_id,
                    s.score,
                    s.last_updated.to_rfc3339()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert(&self, epoch_id: u64, score: &ParticipantScore) -> Result<(), DatabaseError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO counters (epoch_id, participant_id, score, last_updated)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                epoch_id,
                score.participant_id,
                score.score,
                score.last_updated.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn rollover(
        &self,
        epoch_id: u64,
        winner: Option<&RankedEntry>,
    ) -> Result<u64, DatabaseError> {
        let next = epoch_id + 1;
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM counters WHERE epoch_id = ?1", params![epoch_id])?;
        tx.execute(
            "UPDATE epochs SET closed_at = ?2, winner_id = ?3, winner_score = ?4
             WHERE epoch_id = ?1",
            params![
                epoch_id,
                now,
                winner.map(|w| w.participant_id.as_str()),
                winner.map(|w| w.score),
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO epochs (epoch_id, started_at) VALUES (?1, ?2)",
            params![next, now],
        )?;
        tx.commit()?;
        Ok(next)
    }
}
