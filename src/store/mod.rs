use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::models::FlushPayload;

/// The last unsent snapshot for one (project, share token) pair, mirrored to
/// disk so a killed process can re-send it on the next start.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub payload: FlushPayload,
    pub session_id: Option<String>,
    pub is_final: bool,
    pub saved_at: DateTime<Utc>,
}

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct BackupStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BackupStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to backup store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join backup store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

/// SQLite-backed backup store behind a dedicated worker thread. All access
/// goes through an mpsc command channel with oneshot replies, so async
/// callers never block on disk I/O.
#[derive(Clone)]
pub struct BackupStore {
    inner: Arc<BackupStoreInner>,
}

impl BackupStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create backup directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("viewtime-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open backup database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run backup store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Backup store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Backup store thread shutting down");
            })
            .with_context(|| "failed to spawn backup store worker thread")?;

        ready_rx
            .recv()
            .context("backup store worker exited before signaling readiness")??;

        info!("Backup store initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(BackupStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Backup store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to backup store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("backup store thread terminated unexpectedly"))?
    }

    pub async fn save_backup(&self, storage_key: &str, record: &BackupRecord) -> Result<()> {
        let storage_key = storage_key.to_string();
        let payload_json =
            serde_json::to_string(&record.payload).context("failed to serialize backup payload")?;
        let session_id = record.session_id.clone();
        let is_final = record.is_final;
        let saved_at = record.saved_at;

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO flush_backups (storage_key, payload, session_id, is_final, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(storage_key) DO UPDATE SET
                     payload = excluded.payload,
                     session_id = excluded.session_id,
                     is_final = excluded.is_final,
                     saved_at = excluded.saved_at",
                params![
                    storage_key,
                    payload_json,
                    session_id,
                    is_final as i64,
                    saved_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to save flush backup")?;
            Ok(())
        })
        .await
    }

    pub async fn load_backup(&self, storage_key: &str) -> Result<Option<BackupRecord>> {
        let storage_key = storage_key.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT payload, session_id, is_final, saved_at
                     FROM flush_backups
                     WHERE storage_key = ?1",
                    params![storage_key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| "failed to load flush backup")?;

            match row {
                Some((payload_json, session_id, is_final, saved_at)) => {
                    let payload: FlushPayload = serde_json::from_str(&payload_json)
                        .context("failed to parse backup payload")?;
                    Ok(Some(BackupRecord {
                        payload,
                        session_id,
                        is_final: is_final != 0,
                        saved_at: parse_datetime(&saved_at)?,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn clear_backup(&self, storage_key: &str) -> Result<()> {
        let storage_key = storage_key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM flush_backups WHERE storage_key = ?1",
                params![storage_key],
            )
            .with_context(|| "failed to clear flush backup")?;
            Ok(())
        })
        .await
    }
}
