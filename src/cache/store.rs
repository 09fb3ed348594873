//! On-disk cache document
//!
//! The cache file is a single JSON document rewritten wholesale at the end
//! of each build. A document with a missing or different `version`, or one
//! that fails to parse, is ignored: the build runs with an empty cache.

use crate::cache::key::{CacheKey, KeyVariant};
use crate::error::{DroidpackError, DroidpackResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Schema version of the cache document
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Common view over live and persisted cache entries
pub trait CachedItem {
    /// Library the outputs were produced from
    fn source_file(&self) -> &Path;

    /// Output files, in the order the tool reported them
    fn output_files(&self) -> Vec<PathBuf>;

    /// Whether every output file is currently on disk
    fn outputs_present(&self) -> bool {
        let outputs = self.output_files();
        !outputs.is_empty() && outputs.iter().all(|p| p.is_file())
    }
}

/// Conversion completed by a previous build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub source: PathBuf,
    pub outputs: Vec<PathBuf>,
    /// Hex SHA256 of `source` when the outputs were produced
    pub hash: String,
}

impl CachedItem for PersistedEntry {
    fn source_file(&self) -> &Path {
        &self.source
    }

    fn output_files(&self) -> Vec<PathBuf> {
        self.outputs.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: Option<u32>,
    #[serde(default)]
    items: Vec<CacheRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    source: PathBuf,
    revision: String,
    variant: KeyVariant,
    hash: String,
    outputs: Vec<PathBuf>,
}

/// Parse a cache document, returning `None` when it must be ignored
fn parse_document(content: &str, path: &Path) -> Option<HashMap<CacheKey, PersistedEntry>> {
    let doc: CacheDocument = match serde_json::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
            return None;
        }
    };

    if doc.version != Some(CACHE_FORMAT_VERSION) {
        warn!(
            "Ignoring cache file {} with version {:?} (expected {})",
            path.display(),
            doc.version,
            CACHE_FORMAT_VERSION
        );
        return None;
    }

    let mut entries = HashMap::with_capacity(doc.items.len());
    for record in doc.items {
        if record.outputs.is_empty() {
            debug!("Skipping cache record without outputs: {}", record.source.display());
            continue;
        }
        let key = CacheKey::new(record.source.clone(), record.revision, record.variant);
        entries.insert(
            key,
            PersistedEntry {
                source: record.source,
                outputs: record.outputs,
                hash: record.hash,
            },
        );
    }
    Some(entries)
}

/// Read the cache document at `path`.
///
/// Never fails: a missing, unreadable, or mismatched file yields an empty map.
pub async fn read_entries(path: &Path) -> HashMap<CacheKey, PersistedEntry> {
    if !path.exists() {
        debug!("No cache file at {}", path.display());
        return HashMap::new();
    }

    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("Unable to read cache file {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    let entries = parse_document(&content, path).unwrap_or_default();
    debug!("Loaded {} cache entries from {}", entries.len(), path.display());
    entries
}

/// Write `entries` as the complete cache document at `path`
pub async fn write_entries(path: &Path, entries: &[(CacheKey, PersistedEntry)]) -> DroidpackResult<()> {
    let mut items: Vec<CacheRecord> = entries
        .iter()
        .map(|(key, entry)| CacheRecord {
            source: entry.source.clone(),
            revision: key.revision().to_string(),
            variant: key.variant(),
            hash: entry.hash.clone(),
            outputs: entry.outputs.clone(),
        })
        .collect();
    items.sort_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| a.revision.cmp(&b.revision))
            .then_with(|| a.variant.to_string().cmp(&b.variant.to_string()))
    });

    let doc = CacheDocument {
        version: Some(CACHE_FORMAT_VERSION),
        items,
    };
    let content = serde_json::to_string_pretty(&doc)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            DroidpackError::io(format!("creating cache directory {}", parent.display()), e)
        })?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .await
        .map_err(|e| DroidpackError::io(format!("writing cache file {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| DroidpackError::io(format!("replacing cache file {}", path.display()), e))?;

    debug!("Saved {} cache entries to {}", entries.len(), path.display());
    Ok(())
}
