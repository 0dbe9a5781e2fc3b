//! Index engine: full and incremental updates.
//!
//! One `update` invocation walks the state machine below, serialized per
//! workspace by the store's advisory lock and per process by a non-blocking
//! busy mutex (a second concurrent request fails with [`Error::Busy`]
//! instead of queueing):
//!
//! 1. Acquire the workspace lock (blocks on other processes).
//! 2. Enumerate matching files; `reindex_all` clears the partition instead
//!    of diffing.
//! 3. Prune rows for files that disappeared or stopped matching.
//! 4. Diff by mtime: a file is re-indexed when its on-disk mtime advances
//!    past the stored one, or it has no rows yet.
//! 5. Pre-delete rows for everything about to be re-indexed.
//! 6. Read, extract, and chunk; collect skipped and unreadable files.
//! 7. Honor cancellation.
//! 8. Persist skipped-file marker rows.
//! 9. Embed in batches of [`EMBED_BATCH_SIZE`] with retry and backoff.
//! 10. Emit the terminal event and release the lock.
//!
//! # Cancellation
//!
//! The [`CancelToken`] is checked before each batch, before each embedding
//! call, and after each batch. A fired token drops the in-flight batch
//! without inserting it. Rows of files that were only partially inserted at
//! that point are deleted, so an incremental re-run picks those files up
//! again and converges on the same row set an uninterrupted run produces.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use sqlx::postgres::PgPool;
use tracing::{info, warn};

use crate::chunker::{self, Chunk};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{NewChunk, StatusReport};
use crate::progress::{ProgressCallback, ProgressEvent, ProgressReporter, ProgressUpdate};
use crate::scanner::{ScannedFile, Scanner};
use crate::store::{EmbeddingColumn, VectorStore};
use crate::workspace;

/// Embedding batch size. Small on purpose: the batch is the unit of
/// cancellation latency, not a throughput knob.
const EMBED_BATCH_SIZE: usize = 10;
/// Pause between batches as provider courtesy.
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);
/// Retry policy for rate-limited and transient embedding failures.
const MAX_EMBED_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
/// Minimum spacing of per-chunk progress callbacks.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Drop the whole workspace+model partition and rebuild from scratch.
    pub reindex_all: bool,
}

/// Cooperative cancellation flag shared with the control plane.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one `update` run.
#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub cancelled: bool,
    pub total_files: usize,
    pub completed_files: usize,
    pub skipped_files: usize,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_files: Vec<String>,
}

/// A chunk waiting to be embedded, tagged with its source file.
struct PendingChunk {
    path: String,
    mtime_ms: i64,
    chunk: Chunk,
}

/// Shared per-run counters, updated concurrently inside a batch.
struct RunState {
    completed_chunks: AtomicUsize,
    completed_files: AtomicUsize,
    total_chunks: usize,
    total_files: usize,
    last_emit: Mutex<Option<Instant>>,
}

pub struct IndexEngine {
    config: Config,
    workspace_root: PathBuf,
    store: VectorStore,
    client: Box<dyn EmbeddingClient>,
    scanner: Scanner,
    reporter: ProgressReporter,
    busy: Arc<tokio::sync::Mutex<()>>,
    cancel_token: CancelToken,
}

impl IndexEngine {
    /// Construct the engine: open the pool, derive the workspace identity,
    /// compile scan patterns, and truncate the progress log for a clean run
    /// record.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = db::connect(&config.database_url).await?;
        let client = embedding::create_client(&config);
        Self::with_client(config, pool, client)
    }

    /// Construct against an existing pool and embedding client. [`Self::new`]
    /// resolves both from configuration; callers that already hold a pool or
    /// substitute their own client come through here.
    pub fn with_client(
        config: Config,
        pool: PgPool,
        client: Box<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let workspace_root = std::fs::canonicalize(&config.workspace_root)
            .unwrap_or_else(|_| config.workspace_root.clone());
        let ws_id = workspace::workspace_id(&workspace_root);
        let scanner = Scanner::new(&config.include_patterns, &config.exclude_patterns)?;
        let store = VectorStore::new(pool, ws_id.clone(), config.embedding_model.clone());
        let reporter = ProgressReporter::new(&ws_id);

        Ok(IndexEngine {
            config,
            workspace_root,
            store,
            client,
            scanner,
            reporter,
            busy: Arc::new(tokio::sync::Mutex::new(())),
            cancel_token: CancelToken::new(),
        })
    }

    pub fn workspace_id(&self) -> &str {
        self.store.workspace_id()
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn client(&self) -> &dyn EmbeddingClient {
        &*self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress_log_path(&self) -> &Path {
        self.reporter.path()
    }

    /// Request cancellation of the in-flight run, if any. Takes effect at
    /// the next checkpoint.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Run a full or incremental index update.
    ///
    /// Fails fast with [`Error::Busy`] when another update is already
    /// running in this process; blocks on the advisory lock when another
    /// process holds the same workspace. Cancellation is not an error: the
    /// returned outcome carries `cancelled = true`.
    pub async fn update(
        &self,
        options: IndexOptions,
        progress_cb: Option<ProgressCallback>,
    ) -> Result<IndexOutcome> {
        let guard = self.busy.clone().try_lock_owned().map_err(|_| Error::Busy)?;
        self.update_with_guard(guard, options, progress_cb).await
    }

    /// Kick off an update in the background. The busy check happens here,
    /// synchronously, so a caller holding an HTTP request can map
    /// [`Error::Busy`] to 409 before the run starts.
    pub fn start_update(
        self: &Arc<Self>,
        options: IndexOptions,
        progress_cb: Option<ProgressCallback>,
    ) -> Result<tokio::task::JoinHandle<Result<IndexOutcome>>> {
        let guard = self.busy.clone().try_lock_owned().map_err(|_| Error::Busy)?;
        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move {
            engine.update_with_guard(guard, options, progress_cb).await
        }))
    }

    async fn update_with_guard(
        &self,
        _busy: tokio::sync::OwnedMutexGuard<()>,
        options: IndexOptions,
        progress_cb: Option<ProgressCallback>,
    ) -> Result<IndexOutcome> {
        self.cancel_token.reset();

        let cb = progress_cb.as_ref();
        let result = self
            .store
            .with_workspace_lock(|| self.run_locked(options, cb))
            .await;

        if let Err(e) = &result {
            self.emit(
                &ProgressEvent::Error {
                    message: e.to_string(),
                },
                cb,
            );
        }
        result
    }

    /// Drop every row for the current workspace+model.
    pub async fn reinitialize(&self) -> Result<()> {
        let _busy = self.busy.try_lock().map_err(|_| Error::Busy)?;
        self.store
            .with_workspace_lock(|| self.store.clear_all())
            .await
    }

    /// Status snapshot for the control surfaces.
    pub async fn status(&self) -> Result<StatusReport> {
        let initialized = self.store.embedding_column().await?.is_some();
        let total_files = self
            .scanner
            .scan(&self.workspace_root)
            .map(|files| files.len())
            .unwrap_or(0);
        let (indexed_files, last_updated, per_model_stats) = if initialized {
            (
                self.store.indexed_file_count().await? as usize,
                self.store.last_updated().await?,
                self.store.per_model_stats().await?,
            )
        } else {
            (0, None, Vec::new())
        };

        Ok(StatusReport {
            initialized,
            total_files,
            indexed_files,
            last_updated,
            embedding_model: self.config.embedding_model.clone(),
            per_model_stats,
        })
    }

    /// Scan and chunk without writing anything: file and chunk counts for
    /// `index --dry-run`.
    pub fn preview(&self) -> Result<(usize, usize)> {
        let files = self.scanner.scan(&self.workspace_root)?;
        let mut chunk_count = 0;
        for file in &files {
            if file.size == 0 {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(self.workspace_root.join(&file.path)) else {
                continue;
            };
            let text =
                extract::extract_text(&content, &file.path, &self.config.exclude_code_languages);
            chunk_count +=
                chunker::chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap).len();
        }
        Ok((files.len(), chunk_count))
    }

    // ── Run body (holds the advisory lock) ───────────────────────────────

    async fn run_locked(
        &self,
        options: IndexOptions,
        cb: Option<&ProgressCallback>,
    ) -> Result<IndexOutcome> {
        self.ensure_schema().await?;

        let files = self.scanner.scan(&self.workspace_root)?;

        let to_index: Vec<&ScannedFile> = if options.reindex_all {
            self.store.clear_all().await?;
            files.iter().collect()
        } else {
            let keep: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
            self.store.delete_absent(&keep).await?;

            let stored = self.store.mtimes_for(&keep).await?;
            files
                .iter()
                .filter(|f| stored.get(&f.path).is_none_or(|m| f.mtime_ms > *m))
                .collect()
        };

        // Replace prior state for everything being re-indexed before any
        // new row lands.
        let reindex_paths: Vec<String> = to_index.iter().map(|f| f.path.clone()).collect();
        if !options.reindex_all {
            self.store.delete_for(&reindex_paths).await?;
        }

        let (pending, skipped, failed_files) = self.read_and_chunk(&to_index, cb);

        if !to_index.is_empty() && failed_files.len() == to_index.len() {
            return Err(Error::Indexing(format!(
                "all {} files failed to read",
                failed_files.len()
            )));
        }

        let state = RunState {
            completed_chunks: AtomicUsize::new(0),
            completed_files: AtomicUsize::new(skipped.len()),
            total_chunks: pending.len(),
            total_files: to_index.len(),
            last_emit: Mutex::new(None),
        };
        self.emit(
            &ProgressEvent::Start {
                total_files: state.total_files,
                total_chunks: state.total_chunks,
            },
            cb,
        );

        if self.cancel_token.is_cancelled() {
            return self.finish_cancelled(&state, cb).await;
        }

        let skipped_count = skipped.len();
        self.store.insert(&skipped).await?;

        let outcome = self
            .embed_pending(pending, &state, cb)
            .await
            .map(|mut outcome| {
                outcome.skipped_files = skipped_count;
                outcome.failed_files = failed_files;
                outcome
            })?;

        if !outcome.cancelled {
            info!(
                files = outcome.total_files,
                chunks = outcome.completed_chunks,
                skipped = outcome.skipped_files,
                "index update complete"
            );
        }
        Ok(outcome)
    }

    /// Create the schema when absent and refuse to index when the stored
    /// vector length disagrees with the embedding model.
    async fn ensure_schema(&self) -> Result<()> {
        let dimension = self.client.dimension();
        match self.store.schema_dimension().await? {
            Some(stored) if stored != dimension => Err(Error::Config(format!(
                "schema dimension {stored} does not match embedding dimension {dimension}; \
                 reinitialize the workspace or fix SEMDEX_EMBEDDING_DIMENSION"
            ))),
            Some(_) => Ok(()),
            None => match self.store.embedding_column().await? {
                Some(EmbeddingColumn::Json) => Err(Error::Config(
                    "legacy JSON embedding column is search-only; reinitialize to index".into(),
                )),
                _ => self.store.migrate(dimension).await,
            },
        }
    }

    /// Step 6: read, extract, sanitize, and chunk every file due for
    /// indexing. IO failures become warnings, not run failures.
    fn read_and_chunk(
        &self,
        to_index: &[&ScannedFile],
        cb: Option<&ProgressCallback>,
    ) -> (Vec<PendingChunk>, Vec<NewChunk>, Vec<String>) {
        let dimension = self.client.dimension();
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        let mut failed_files = Vec::new();

        for file in to_index {
            if file.size == 0 {
                skipped.push(NewChunk::skipped_marker(
                    &file.path,
                    file.mtime_ms,
                    "empty file",
                    0,
                    dimension,
                ));
                continue;
            }

            let content = match std::fs::read_to_string(self.workspace_root.join(&file.path)) {
                Ok(c) => c,
                Err(e) => {
                    self.emit(
                        &ProgressEvent::Warning {
                            message: format!("cannot read {}: {e}", file.path),
                        },
                        cb,
                    );
                    failed_files.push(file.path.clone());
                    continue;
                }
            };

            let text =
                extract::extract_text(&content, &file.path, &self.config.exclude_code_languages);
            if text.is_empty() {
                skipped.push(NewChunk::skipped_marker(
                    &file.path,
                    file.mtime_ms,
                    "no indexable content",
                    file.size,
                    dimension,
                ));
                continue;
            }

            let chunks =
                chunker::chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);
            if chunks.is_empty() {
                skipped.push(NewChunk::skipped_marker(
                    &file.path,
                    file.mtime_ms,
                    "no indexable content",
                    file.size,
                    dimension,
                ));
                continue;
            }

            pending.extend(chunks.into_iter().map(|chunk| PendingChunk {
                path: file.path.clone(),
                mtime_ms: file.mtime_ms,
                chunk,
            }));
        }

        (pending, skipped, failed_files)
    }

    /// Steps 9–10: embed in batches, insert, and emit the terminal event.
    async fn embed_pending(
        &self,
        pending: Vec<PendingChunk>,
        state: &RunState,
        cb: Option<&ProgressCallback>,
    ) -> Result<IndexOutcome> {
        let mut expected_by_file: HashMap<String, usize> = HashMap::new();
        for p in &pending {
            *expected_by_file.entry(p.path.clone()).or_default() += 1;
        }
        let mut remaining_by_file = expected_by_file.clone();
        let mut inserted_by_file: HashMap<String, usize> = HashMap::new();
        let mut failed_paths: BTreeSet<String> = BTreeSet::new();
        let mut cancelled = false;

        let batches: Vec<&[PendingChunk]> = pending.chunks(EMBED_BATCH_SIZE).collect();
        let batch_count = batches.len();
        for (batch_no, batch) in batches.into_iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            let results = join_all(batch.iter().map(|p| self.embed_one(p, state, cb))).await;

            // A token fired while the batch was in flight drops the whole
            // batch: nothing from it is inserted.
            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut rows = Vec::with_capacity(batch.len());
            for (p, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(vector)) => rows.push(NewChunk {
                        path: p.path.clone(),
                        mtime_ms: p.mtime_ms,
                        content: p.chunk.content.clone(),
                        embedding: vector,
                        metadata: crate::models::ChunkMetadata {
                            start_line: p.chunk.start_line,
                            end_line: p.chunk.end_line,
                            ..Default::default()
                        },
                    }),
                    Ok(None) => {
                        cancelled = true;
                    }
                    // Credential and dimension failures poison the whole
                    // run; everything else is a per-chunk failure.
                    Err(e @ (Error::Unauthorized(_) | Error::Config(_))) => return Err(e),
                    Err(e) => {
                        warn!(path = %p.path, "chunk embedding failed permanently: {e}");
                        failed_paths.insert(p.path.clone());
                    }
                }
            }
            if cancelled {
                break;
            }

            self.store.insert(&rows).await?;
            for row in &rows {
                *inserted_by_file.entry(row.path.clone()).or_default() += 1;
            }
            for p in batch {
                if let Some(left) = remaining_by_file.get_mut(&p.path) {
                    *left -= 1;
                    if *left == 0 && !failed_paths.contains(&p.path) {
                        state.completed_files.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }

            self.emit_progress(state, None, false, true, cb);

            if batch_no + 1 < batch_count {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }

        if cancelled {
            // Files caught mid-insert would otherwise survive the diff on
            // the next run with missing chunks; drop their rows so an
            // incremental resume re-indexes them.
            let incomplete: Vec<String> = inserted_by_file
                .iter()
                .filter(|(path, inserted)| expected_by_file.get(*path) != Some(*inserted))
                .map(|(path, _)| path.clone())
                .collect();
            self.store.delete_for(&incomplete).await?;
            return self.finish_cancelled(state, cb).await;
        }

        if !failed_paths.is_empty() {
            let paths: Vec<String> = failed_paths.into_iter().collect();
            // Retry these files on the next incremental run instead of
            // leaving partial row sets behind.
            self.store.delete_for(&paths).await?;
            self.emit(
                &ProgressEvent::Warning {
                    message: format!("chunks failed after retries in: {}", paths.join(", ")),
                },
                cb,
            );
            return Err(Error::Indexing(format!(
                "{} file(s) had chunks fail after retries",
                paths.len()
            )));
        }

        self.emit(
            &ProgressEvent::Complete {
                completed_chunks: state.completed_chunks.load(Ordering::SeqCst),
                total_chunks: state.total_chunks,
                completed_files: state.completed_files.load(Ordering::SeqCst),
            },
            cb,
        );

        Ok(IndexOutcome {
            cancelled: false,
            total_files: state.total_files,
            completed_files: state.completed_files.load(Ordering::SeqCst),
            skipped_files: 0,
            total_chunks: state.total_chunks,
            completed_chunks: state.completed_chunks.load(Ordering::SeqCst),
            failed_files: Vec::new(),
        })
    }

    /// Embed one chunk under the retry policy. Returns `Ok(None)` when the
    /// cancel token fired before an attempt; permanent failures are errors.
    async fn embed_one(
        &self,
        p: &PendingChunk,
        state: &RunState,
        cb: Option<&ProgressCallback>,
    ) -> Result<Option<Vec<f32>>> {
        let expected = self.client.dimension();
        let mut attempt = 1;
        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(None);
            }

            match self.client.embed(&p.chunk.content).await {
                Ok(vector) => {
                    if vector.len() != expected {
                        return Err(Error::Config(format!(
                            "provider returned dimension {} for model {}, schema expects {}",
                            vector.len(),
                            self.client.model(),
                            expected
                        )));
                    }
                    state.completed_chunks.fetch_add(1, Ordering::SeqCst);
                    self.emit_progress(state, Some(&p.path), false, false, cb);
                    return Ok(Some(vector));
                }
                Err(e) if e.is_retryable() && attempt < MAX_EMBED_ATTEMPTS => {
                    self.emit_progress(state, Some(&p.path), true, true, cb);
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish_cancelled(
        &self,
        state: &RunState,
        cb: Option<&ProgressCallback>,
    ) -> Result<IndexOutcome> {
        self.emit(
            &ProgressEvent::Cancelled {
                completed_chunks: state.completed_chunks.load(Ordering::SeqCst),
                total_chunks: state.total_chunks,
                is_cancelled: true,
            },
            cb,
        );
        Ok(IndexOutcome {
            cancelled: true,
            total_files: state.total_files,
            completed_files: state.completed_files.load(Ordering::SeqCst),
            skipped_files: 0,
            total_chunks: state.total_chunks,
            completed_chunks: state.completed_chunks.load(Ordering::SeqCst),
            failed_files: Vec::new(),
        })
    }

    // ── Progress plumbing ────────────────────────────────────────────────

    /// Per-chunk progress, throttled to one event per 500 ms unless
    /// `force` (batch boundaries, rate-limit waits).
    fn emit_progress(
        &self,
        state: &RunState,
        current_file: Option<&str>,
        waiting_for_rate_limit: bool,
        force: bool,
        cb: Option<&ProgressCallback>,
    ) {
        if !force {
            let mut last = match state.last_emit.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if let Some(at) = *last {
                if at.elapsed() < PROGRESS_INTERVAL {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let update = ProgressUpdate {
            completed_chunks: state.completed_chunks.load(Ordering::SeqCst),
            total_chunks: state.total_chunks,
            total_files: state.total_files,
            completed_files: state.completed_files.load(Ordering::SeqCst),
            current_file: current_file.map(str::to_string),
            waiting_for_rate_limit: waiting_for_rate_limit.then_some(true),
            is_cancelled: None,
            percentage: None,
        }
        .with_percentage();
        self.emit(&ProgressEvent::Progress(update), cb);
    }

    /// Every event reaches both the caller's callback and the JSONL log.
    fn emit(&self, event: &ProgressEvent, cb: Option<&ProgressCallback>) {
        if let Some(cb) = cb {
            cb(event);
        }
        self.reporter.append(event);
    }
}

/// Exponential backoff: 1s, 2s, 4s, 8s, … capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    exp.min(RETRY_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(20), Duration::from_secs(30));
    }
}
