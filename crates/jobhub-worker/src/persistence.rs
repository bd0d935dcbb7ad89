//! Best-effort persistence of job state for inspection and post-mortems.
//!
//! Nothing written here is ever used to resume work. On startup the
//! previous state is only read to report jobs that were left pending.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing;

use jobhub_core::config::persistence::{PersistenceConfig, PersistenceMode};
use jobhub_entity::job::PersistedJob;

/// Error raised while reading or writing persisted job state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// File system failure
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One batch of changes captured under the store lock.
///
/// `version` grows with every captured batch, so sinks can discard a batch
/// that lost a race against a newer one.
#[derive(Debug, Clone, Default)]
pub struct PersistRequest {
    /// Capture order
    pub version: u64,
    /// Records whose state changed
    pub upserts: Vec<PersistedJob>,
    /// Ids removed from the store
    pub removed: Vec<String>,
    /// Every record, for sinks that rewrite the whole file
    pub records: Option<Vec<PersistedJob>>,
}

/// Destination for persisted job state.
#[async_trait]
pub trait JobPersistence: Send + Sync + std::fmt::Debug {
    /// Whether [`PersistRequest::records`] must be filled in.
    fn wants_full_snapshot(&self) -> bool {
        false
    }

    /// Write a batch of changes.
    async fn persist(&self, request: PersistRequest) -> Result<(), PersistenceError>;

    /// Read the state left by the previous run.
    async fn load(&self) -> Result<Vec<PersistedJob>, PersistenceError>;
}

/// Build the sink selected by configuration.
pub fn from_config(config: &PersistenceConfig) -> Arc<dyn JobPersistence> {
    if !config.enabled {
        return Arc::new(NoPersistence);
    }
    match config.mode {
        PersistenceMode::Snapshot => Arc::new(SnapshotFile::new(&config.path)),
        PersistenceMode::Journal => Arc::new(JournalFile::new(&config.path)),
    }
}

async fn ensure_parent(path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::io(parent, e))?;
    }
    Ok(())
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

#[async_trait]
impl JobPersistence for NoPersistence {
    async fn persist(&self, _request: PersistRequest) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedJob>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// A single JSON document mapping job id to its persisted record, rewritten
/// in full on every change.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    last_version: Mutex<u64>,
}

impl SnapshotFile {
    /// Snapshot stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_version: Mutex::new(0),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl JobPersistence for SnapshotFile {
    fn wants_full_snapshot(&self) -> bool {
        true
    }

    async fn persist(&self, request: PersistRequest) -> Result<(), PersistenceError> {
        let Some(records) = request.records else {
            return Ok(());
        };

        let mut last_version = self.last_version.lock().await;
        if request.version <= *last_version {
            tracing::trace!(
                version = request.version,
                written = *last_version,
                "Skipping stale snapshot"
            );
            return Ok(());
        }

        let document: BTreeMap<&str, &PersistedJob> =
            records.iter().map(|job| (job.id.as_str(), job)).collect();
        let bytes = serde_json::to_vec_pretty(&document)?;

        ensure_parent(&self.path).await?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| PersistenceError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        *last_version = request.version;
        tracing::trace!(
            version = request.version,
            jobs = records.len(),
            "Snapshot written"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedJob>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let document: BTreeMap<String, PersistedJob> = serde_json::from_slice(&bytes)?;
        Ok(document.into_values().collect())
    }
}

/// One line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// First line written by a process
    Session {
        /// Process start
        started_at: DateTime<Utc>,
    },
    /// New state of a record
    Upsert {
        /// Capture order
        version: u64,
        /// Record state
        job: PersistedJob,
    },
    /// Record removed by cleanup
    Remove {
        /// Capture order
        version: u64,
        /// Removed id
        id: String,
    },
}

/// Append-only JSON-lines change log.
///
/// Each process starts its section with a `session` line; loading replays
/// the last section only.
#[derive(Debug)]
pub struct JournalFile {
    path: PathBuf,
    session_started: Mutex<bool>,
}

impl JournalFile {
    /// Journal stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_started: Mutex::new(false),
        }
    }
}

#[async_trait]
impl JobPersistence for JournalFile {
    async fn persist(&self, request: PersistRequest) -> Result<(), PersistenceError> {
        let mut session_started = self.session_started.lock().await;

        let mut entries = Vec::with_capacity(request.upserts.len() + request.removed.len() + 1);
        if !*session_started {
            entries.push(JournalEntry::Session {
                started_at: Utc::now(),
            });
        }
        entries.extend(request.upserts.into_iter().map(|job| JournalEntry::Upsert {
            version: request.version,
            job,
        }));
        entries.extend(request.removed.into_iter().map(|id| JournalEntry::Remove {
            version: request.version,
            id,
        }));
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        ensure_parent(&self.path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        *session_started = true;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedJob>, PersistenceError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        // id -> (version, state); None marks a removal
        let mut latest: HashMap<String, (u64, Option<PersistedJob>)> = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unreadable journal line"
                    );
                    continue;
                }
            };

            let (id, version, state) = match entry {
                JournalEntry::Session { .. } => {
                    latest.clear();
                    continue;
                }
                JournalEntry::Upsert { version, job } => (job.id.clone(), version, Some(job)),
                JournalEntry::Remove { version, id } => (id, version, None),
            };
            match latest.get(&id) {
                Some((seen, _)) if *seen > version => {}
                _ => {
                    latest.insert(id, (version, state));
                }
            }
        }

        let mut jobs: Vec<PersistedJob> = latest
            .into_values()
            .filter_map(|(_, state)| state)
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
