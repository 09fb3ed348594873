//! Persistent conversion cache
//!
//! Maps a [`CacheKey`] (library + toolchain revision + options) to the files
//! a slow external conversion produced for it. Within one cache instance
//! each key is converted at most once, however many tasks ask for it
//! concurrently; across builds, completed conversions are persisted and
//! reused as long as the library's content hash is unchanged.
//!
//! # Entry lifecycle
//!
//! | State | Source | Meaning |
//! |-------|--------|---------|
//! | Persisted | cache file | Converted by an earlier build, not yet validated |
//! | Pending | first caller | Conversion running; other callers wait |
//! | Done | producer / validated persisted entry | Outputs available |
//!
//! The first caller to find a key absent becomes its producer. Every other
//! caller waits on the producer's completion signal and then copies the
//! first output to the path it expected. Multi-dex outputs are copied as a
//! whole directory.

mod key;
mod library;
mod store;

pub use key::{CacheKey, KeyVariant};
pub use library::output_path_for;
pub use store::{CachedItem, PersistedEntry, CACHE_FORMAT_VERSION};

use crate::error::{DroidpackError, DroidpackResult};
use crate::hasher;
use crate::toolchain::Converter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Tunables for a [`ConversionCache`]
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// How long a caller waits for another task's conversion of the same
    /// key. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
}

/// How a [`ConversionCache::convert`] call was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// This call ran the conversion
    Converted { outputs: Vec<PathBuf> },
    /// Another call (or an earlier build) already had the result
    Hit { output: PathBuf },
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Hit and miss counts for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Keys seen in this process
    pub live: usize,
    /// Entries loaded from disk and not yet used
    pub persisted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Completion {
    Pending,
    Done(Arc<Vec<PathBuf>>),
}

/// Entry for a key requested during this process
#[derive(Debug, Clone)]
struct LiveEntry {
    source: PathBuf,
    signal: watch::Receiver<Completion>,
}

impl LiveEntry {
    fn pending(source: PathBuf) -> (Self, CompletionGuard) {
        let (tx, rx) = watch::channel(Completion::Pending);
        (
            Self {
                source,
                signal: rx,
            },
            CompletionGuard { tx: Some(tx) },
        )
    }

    /// Entry whose signal is already satisfied
    fn completed(source: PathBuf, outputs: Vec<PathBuf>) -> Self {
        let (_tx, rx) = watch::channel(Completion::Done(Arc::new(outputs)));
        Self {
            source,
            signal: rx,
        }
    }

    /// Producer went away without signalling completion
    fn is_abandoned(&self) -> bool {
        matches!(*self.signal.borrow(), Completion::Pending) && self.signal.has_changed().is_err()
    }

    fn is_done(&self) -> bool {
        matches!(*self.signal.borrow(), Completion::Done(_))
    }

    async fn wait(&self, timeout: Option<Duration>) -> DroidpackResult<Arc<Vec<PathBuf>>> {
        let mut rx = self.signal.clone();
        let wait = async move {
            rx.wait_for(|c| matches!(c, Completion::Done(_)))
                .await
                .map(|c| match &*c {
                    Completion::Done(outputs) => outputs.clone(),
                    Completion::Pending => Arc::new(Vec::new()),
                })
        };

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                DroidpackError::ConversionTimeout {
                    input: self.source.clone(),
                    secs: limit.as_secs(),
                }
            })?,
            None => wait.await,
        };

        result.map_err(|_| DroidpackError::ConversionAbandoned {
            input: self.source.clone(),
        })
    }
}

impl CachedItem for LiveEntry {
    fn source_file(&self) -> &Path {
        &self.source
    }

    fn output_files(&self) -> Vec<PathBuf> {
        match &*self.signal.borrow() {
            Completion::Done(outputs) => outputs.as_ref().clone(),
            Completion::Pending => Vec::new(),
        }
    }
}

/// Held by the producer of a key. Signals completion exactly once; if
/// dropped unsignalled, waiters observe the producer as abandoned.
struct CompletionGuard {
    tx: Option<watch::Sender<Completion>>,
}

impl CompletionGuard {
    fn complete(mut self, outputs: Vec<PathBuf>) {
        if let Some(tx) = self.tx.take() {
            // Sending fails only when nobody holds a receiver, which is fine.
            let _ = tx.send(Completion::Done(Arc::new(outputs)));
        }
    }
}

#[derive(Default)]
struct CacheState {
    loaded: bool,
    live: HashMap<CacheKey, LiveEntry>,
    persisted: HashMap<CacheKey, PersistedEntry>,
    hits: Vec<CacheKey>,
    misses: Vec<CacheKey>,
}

/// Conversion cache shared by every task of one build
pub struct ConversionCache {
    path: Option<PathBuf>,
    options: CacheOptions,
    state: Mutex<CacheState>,
}

impl ConversionCache {
    /// Create a cache persisted at `path`. Call [`load`](Self::load) before use.
    pub fn open(path: impl Into<PathBuf>, options: CacheOptions) -> Self {
        Self {
            path: Some(path.into()),
            options,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Create a cache that lives only for this process
    pub fn in_memory(options: CacheOptions) -> Self {
        Self {
            path: None,
            options,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Path of the persisted cache file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load persisted entries. Only the first call reads the file.
    pub async fn load(&self) {
        let mut state = self.state.lock().await;
        if state.loaded {
            return;
        }
        state.loaded = true;

        if let Some(path) = &self.path {
            state.persisted = store::read_entries(path).await;
            info!(
                "Loaded {} cached conversion(s) from {}",
                state.persisted.len(),
                path.display()
            );
        }
    }

    /// Convert `key.source()` into `output`, or reuse an existing result.
    ///
    /// The first caller for a key runs `converter`; concurrent callers for
    /// the same key wait for it and receive a copy of its first output at
    /// their own `output` path.
    pub async fn convert<C>(&self, key: &CacheKey, output: &Path, converter: &C) -> DroidpackResult<CacheOutcome>
    where
        C: Converter + ?Sized,
    {
        let (entry, producer) = self.claim(key).await;

        match producer {
            Some(guard) => self.produce(key, output, converter, guard).await,
            None => self.reuse(key, &entry, output).await,
        }
    }

    /// Find or create the live entry for `key`, deciding whether this caller
    /// produces it. Runs entirely inside the cache lock.
    async fn claim(&self, key: &CacheKey) -> (LiveEntry, Option<CompletionGuard>) {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.live.get(key) {
            if !existing.is_abandoned() {
                return (existing.clone(), None);
            }
            debug!("Previous producer of {} was abandoned, converting again", key);
        }

        if let Some(stored) = state.persisted.remove(key) {
            if Self::is_still_valid(&stored).await {
                debug!("Reusing conversion from a previous build: {}", key);
                let entry = LiveEntry::completed(stored.source, stored.outputs);
                state.live.insert(key.clone(), entry.clone());
                return (entry, None);
            }
            debug!("Discarding stale cache entry: {}", key);
        }

        let (entry, guard) = LiveEntry::pending(key.source().to_path_buf());
        state.live.insert(key.clone(), entry.clone());
        state.misses.push(key.clone());
        (entry, Some(guard))
    }

    /// A persisted entry is trusted only if every output still exists and
    /// the source's content hash is unchanged
    async fn is_still_valid(stored: &PersistedEntry) -> bool {
        if !stored.outputs_present() {
            return false;
        }
        match hasher::hash_file_async(&stored.source).await {
            Ok(hash) => hash == stored.hash,
            Err(e) => {
                debug!("Unable to hash {}: {}", stored.source.display(), e);
                false
            }
        }
    }

    async fn produce<C>(
        &self,
        key: &CacheKey,
        output: &Path,
        converter: &C,
        guard: CompletionGuard,
    ) -> DroidpackResult<CacheOutcome>
    where
        C: Converter + ?Sized,
    {
        info!("Converting {} with {}", key.source().display(), converter.name());

        match converter.convert(key.source(), output).await {
            Ok(outputs) => {
                guard.complete(outputs.clone());
                Ok(CacheOutcome::Converted { outputs })
            }
            Err(e) => {
                let removed = if output.is_dir() {
                    fs::remove_dir_all(output).await
                } else if output.is_file() {
                    fs::remove_file(output).await
                } else {
                    Ok(())
                };
                if let Err(rm) = removed {
                    warn!("Unable to delete partial output {}: {}", output.display(), rm);
                }
                guard.complete(vec![output.to_path_buf()]);
                Err(e)
            }
        }
    }

    async fn reuse(&self, key: &CacheKey, entry: &LiveEntry, output: &Path) -> DroidpackResult<CacheOutcome> {
        let outputs = entry.wait(self.options.wait_timeout).await?;

        if outputs.is_empty() || !outputs.iter().all(|p| p.is_file()) {
            return Err(DroidpackError::MissingOutput {
                input: key.source().to_path_buf(),
                output: output.to_path_buf(),
            });
        }

        if key.variant().is_multi_dex() {
            copy_into_dir(&outputs, output).await?;
        } else if outputs[0] != output {
            if let Some(parent) = output.parent() {
                create_dir(parent).await?;
            }
            copy_file(&outputs[0], output).await?;
        }

        debug!("Cache hit: {}", key);
        self.state.lock().await.hits.push(key.clone());
        Ok(CacheOutcome::Hit {
            output: output.to_path_buf(),
        })
    }

    /// Write completed conversions and still-relevant persisted entries to disk
    pub async fn save(&self) -> DroidpackResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let (completed, carried) = {
            let state = self.state.lock().await;
            let completed: Vec<(CacheKey, PathBuf, Vec<PathBuf>)> = state
                .live
                .iter()
                .filter(|(_, entry)| entry.is_done() && entry.outputs_present())
                .map(|(key, entry)| (key.clone(), entry.source_file().to_path_buf(), entry.output_files()))
                .collect();
            let carried: Vec<(CacheKey, PersistedEntry)> = state
                .persisted
                .iter()
                .filter(|(key, entry)| !state.live.contains_key(*key) && entry.source_file().is_file())
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect();
            (completed, carried)
        };

        let mut entries = carried;
        for (key, source, outputs) in completed {
            match hasher::hash_file_async(&source).await {
                Ok(hash) => entries.push((
                    key,
                    PersistedEntry {
                        source,
                        outputs,
                        hash,
                    },
                )),
                Err(e) => debug!("Not caching {}: {}", key, e),
            }
        }

        store::write_entries(path, &entries).await
    }

    /// Current hit/miss counters
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            hits: state.hits.len(),
            misses: state.misses.len(),
            live: state.live.len(),
            persisted: state.persisted.len(),
        }
    }

    /// Log every hit and miss of this process
    pub async fn log_usage(&self) {
        let state = self.state.lock().await;
        info!("Conversion cache: {} hit(s), {} miss(es)", state.hits.len(), state.misses.len());
        for key in &state.hits {
            debug!("  hit  {}", key);
        }
        for key in &state.misses {
            debug!("  miss {}", key);
        }
    }

    /// Forget every entry and counter. The next `load` reads the file again.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = CacheState::default();
    }
}

async fn create_dir(dir: &Path) -> DroidpackResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DroidpackError::io(format!("creating directory {}", dir.display()), e))
}

async fn copy_file(from: &Path, to: &Path) -> DroidpackResult<()> {
    fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| DroidpackError::io(format!("copying {} to {}", from.display(), to.display()), e))
}

/// Copy every output into the directory `dir`, keeping file names. Outputs
/// already inside `dir` stay where they are.
async fn copy_into_dir(outputs: &[PathBuf], dir: &Path) -> DroidpackResult<()> {
    if outputs.iter().all(|p| p.parent() == Some(dir)) {
        return Ok(());
    }
    create_dir(dir).await?;
    for file in outputs {
        let Some(name) = file.file_name() else {
            return Err(DroidpackError::PathNotFound(file.clone()));
        };
        copy_file(file, &dir.join(name)).await?;
    }
    Ok(())
}
