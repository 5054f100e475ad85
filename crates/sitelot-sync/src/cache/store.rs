//! SQLite-backed snapshot and queue storage.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sitelot_core::completion::{Completion, CompletionState, FailureReport, WitnessRecord};
use sitelot_core::instance::ItpInstance;
use sitelot_core::ncr::Severity;
use thiserror::Error;

use crate::remote::AttachmentUpload;

/// Cache schema. Snapshot payloads and queue intents are JSON documents;
/// timestamps are RFC 3339 text.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS lot_snapshot (
        lot_id TEXT PRIMARY KEY,
        fetched_at TEXT NOT NULL,
        payload TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pending_queue (
        lot_id TEXT NOT NULL,
        checklist_item_id TEXT NOT NULL,
        entry_key TEXT NOT NULL,
        intent TEXT NOT NULL,
        author TEXT NOT NULL,
        queued_at TEXT NOT NULL,
        PRIMARY KEY (lot_id, checklist_item_id, entry_key)
    );

    CREATE INDEX IF NOT EXISTS idx_pending_queue_order
        ON pending_queue(lot_id, queued_at);
";

/// Errors from the offline cache.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Underlying database error.
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored payload could not be (de)serialized.
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed.
    #[error("cache timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// The connection lock was poisoned by a panicking writer.
    #[error("cache connection lock poisoned")]
    LockPoisoned,
}

/// The desired resulting state of a completion, captured at queue time.
///
/// The queue stores resulting state rather than the individual edit, so a
/// second offline edit to the same item folds into one entry and replay
/// sends the merged intent ("last local intent wins" locally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DesiredState {
    /// Back to pending (completion toggled off), with any notes kept.
    Pending {
        /// Notes to carry, when edited offline as well.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Completed, with the sign-off details.
    Completed {
        /// Notes recorded with the sign-off.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
        /// Witness attendance for witness-point items.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        witness: Option<WitnessRecord>,
    },
    /// Not applicable, with the reason.
    NotApplicable {
        /// Why the item does not apply.
        reason: String,
    },
    /// Failed, with the full failure payload (needed to raise the NCR at
    /// replay time).
    Failed {
        /// The failure report.
        report: FailureReport,
    },
}

impl DesiredState {
    /// Captures the desired state from an optimistic record.
    ///
    /// The failure report cannot be reconstructed from the record alone
    /// (category and severity are not stored on it), so the caller passes
    /// the report when the queued edit was the failing one. When a failed
    /// record is edited offline after its failure already synced, the
    /// fallback report carries the notes as description; replay will find
    /// the NCR already linked and only the notes move.
    #[must_use]
    pub fn capture(record: &Completion, failure: Option<&FailureReport>) -> Self {
        match record.state() {
            CompletionState::Pending => Self::Pending {
                notes: record.notes.clone(),
            },
            CompletionState::Completed => Self::Completed {
                notes: record.notes.clone(),
                witness: record.witness.clone(),
            },
            CompletionState::NotApplicable => Self::NotApplicable {
                reason: record.notes.clone().unwrap_or_default(),
            },
            CompletionState::Failed => Self::Failed {
                report: failure.cloned().unwrap_or_else(|| FailureReport {
                    description: record.notes.clone().unwrap_or_default(),
                    category: "general".to_string(),
                    severity: Severity::Minor,
                }),
            },
        }
    }
}

/// A mutation recorded while disconnected, pending replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum QueuedIntent {
    /// The desired resulting completion state for the item.
    Completion {
        /// The state to reproduce at the server.
        desired: DesiredState,
    },
    /// An evidence upload. Attachments accumulate per file rather than
    /// overwriting each other.
    Attachment {
        /// The upload to replay.
        upload: AttachmentUpload,
    },
}

impl QueuedIntent {
    /// Queue key discriminator: one completion-state slot per item,
    /// one slot per attachment file.
    fn entry_key(&self) -> String {
        match self {
            Self::Completion { .. } => "state".to_string(),
            Self::Attachment { upload } => format!("attachment:{}", upload.file_ref),
        }
    }
}

/// One pending queue entry.
///
/// Entries from this device are ordered by `queued_at`; no ordering is
/// guaranteed relative to entries made by other devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    /// The lot the edit belongs to.
    pub lot_id: String,
    /// The checklist item the edit targets.
    pub checklist_item_id: String,
    /// The desired resulting state.
    pub intent: QueuedIntent,
    /// Audit label, e.g. "Current User (Offline)".
    pub author: String,
    /// When the edit was queued locally.
    pub queued_at: DateTime<Utc>,
}

/// The last-known server state of a lot's ITP instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
    /// The cached instance.
    pub instance: ItpInstance,
    /// When the snapshot was fetched from the server.
    pub fetched_at: DateTime<Utc>,
}

/// Durable client-side cache, safe to reopen across restarts.
pub struct OfflineCache {
    conn: Mutex<Connection>,
}

impl OfflineCache {
    /// Opens (or creates) the cache at the given path, in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory cache. Test use only; nothing survives drop.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Stores (replacing) the server snapshot for a lot.
    pub fn store_snapshot(
        &self,
        instance: &ItpInstance,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(instance)?;
        self.lock()?.execute(
            "INSERT INTO lot_snapshot (lot_id, fetched_at, payload)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (lot_id) DO UPDATE SET
                 fetched_at = excluded.fetched_at,
                 payload = excluded.payload",
            params![instance.lot_id, fetched_at.to_rfc3339(), payload],
        )?;
        Ok(())
    }

    /// Loads the last snapshot for a lot, if one was ever stored.
    pub fn load_snapshot(&self, lot_id: &str) -> Result<Option<CachedSnapshot>, CacheError> {
        let row: Option<(String, String)> = self
            .lock()?
            .query_row(
                "SELECT fetched_at, payload FROM lot_snapshot WHERE lot_id = ?1",
                params![lot_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((fetched_at, payload)) => Ok(Some(CachedSnapshot {
                instance: serde_json::from_str(&payload)?,
                fetched_at: DateTime::parse_from_rfc3339(&fetched_at)?.with_timezone(&Utc),
            })),
        }
    }

    /// Queues a pending mutation, replacing any earlier pending entry in
    /// the same slot (one completion-state slot per item; one slot per
    /// attachment file).
    pub fn enqueue(&self, entry: &OfflineQueueEntry) -> Result<(), CacheError> {
        let intent = serde_json::to_string(&entry.intent)?;
        self.lock()?.execute(
            "INSERT INTO pending_queue
                 (lot_id, checklist_item_id, entry_key, intent, author, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (lot_id, checklist_item_id, entry_key) DO UPDATE SET
                 intent = excluded.intent,
                 author = excluded.author,
                 queued_at = excluded.queued_at",
            params![
                entry.lot_id,
                entry.checklist_item_id,
                entry.intent.entry_key(),
                intent,
                entry.author,
                entry.queued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All pending entries for a lot, in the order they were queued.
    pub fn pending(&self, lot_id: &str) -> Result<Vec<OfflineQueueEntry>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT checklist_item_id, intent, author, queued_at
             FROM pending_queue WHERE lot_id = ?1
             ORDER BY queued_at, checklist_item_id, entry_key",
        )?;
        let rows = stmt
            .query_map(params![lot_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut entries = Vec::with_capacity(rows.len());
        for (checklist_item_id, intent, author, queued_at) in rows {
            entries.push(OfflineQueueEntry {
                lot_id: lot_id.to_string(),
                checklist_item_id,
                intent: serde_json::from_str(&intent)?,
                author,
                queued_at: DateTime::parse_from_rfc3339(&queued_at)?.with_timezone(&Utc),
            });
        }
        Ok(entries)
    }

    /// Removes one pending entry after a successful replay.
    pub fn remove_pending(&self, entry: &OfflineQueueEntry) -> Result<(), CacheError> {
        self.lock()?.execute(
            "DELETE FROM pending_queue
             WHERE lot_id = ?1 AND checklist_item_id = ?2 AND entry_key = ?3",
            params![
                entry.lot_id,
                entry.checklist_item_id,
                entry.intent.entry_key(),
            ],
        )?;
        Ok(())
    }

    /// Number of local edits not yet replayed to the server, for the
    /// "N changes pending sync" indicator.
    pub fn pending_count(&self, lot_id: &str) -> Result<usize, CacheError> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM pending_queue WHERE lot_id = ?1",
            params![lot_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
