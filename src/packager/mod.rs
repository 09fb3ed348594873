//! APK assembly
//!
//! [`ApkBuilder`] accumulates resources, dex files and native libraries into
//! one signed archive. Every entry passes through the same ledger:
//!
//! 1. excluded paths are dropped silently
//! 2. merge paths are appended to a staging file and written on [`seal`]
//! 3. a path seen before is skipped when it comes from the same file and
//!    rejected as a duplicate otherwise
//!
//! The builder is append-then-seal: once [`seal`] succeeds every further
//! call fails with [`DroidpackError::Sealed`]. A failure in any call deletes
//! the partial archive and leaves the builder aborted.
//!
//! [`seal`]: ApkBuilder::seal

pub mod filter;
pub mod signer;
pub mod writer;

pub use signer::{RsaSigner, Signer};
pub use writer::SignedArchiveWriter;

use crate::error::{DroidpackError, DroidpackResult};
use crate::toolchain::dex_sort_key;
use filter::EntryCheck;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use writer::{EntryAction, EntryFilter};

/// Packaging behavior that does not depend on the inputs
#[derive(Debug, Clone, Default)]
pub struct PackagerOptions {
    /// Also package `gdbserver` and `gdb.setup` next to native libraries
    pub debug_jni: bool,
    /// Archive paths whose contents are concatenated across inputs
    pub merge_paths: Vec<String>,
    /// Archive paths dropped from every input
    pub excludes: Vec<String>,
    /// Extensions stored uncompressed when added from loose files
    pub no_compress: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    Open,
    Sealed,
    Aborted,
}

/// Staging area for merged entries
#[derive(Default)]
struct MergeStaging {
    dir: Option<TempDir>,
    files: BTreeMap<String, PathBuf>,
}

impl MergeStaging {
    fn append(&mut self, archive_path: &str, data: &mut dyn Read) -> DroidpackResult<()> {
        if self.dir.is_none() {
            let dir = TempDir::new().map_err(|e| DroidpackError::io("creating merge staging directory", e))?;
            self.dir = Some(dir);
        }
        let staging = match (&self.dir, self.files.get(archive_path)) {
            (_, Some(path)) => path.clone(),
            (Some(dir), None) => {
                let path = dir.path().join(format!("merge-{}", self.files.len()));
                self.files.insert(archive_path.to_string(), path.clone());
                path
            }
            (None, None) => return Err(DroidpackError::Internal("merge staging missing".into())),
        };

        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&staging)
            .map_err(|e| DroidpackError::io(format!("opening merge staging for {}", archive_path), e))?;
        io::copy(data, &mut out)
            .map_err(|e| DroidpackError::io(format!("merging {}", archive_path), e))?;
        Ok(())
    }
}

/// Record of what went into the archive and from where
#[derive(Default)]
struct EntryLedger {
    added: HashMap<String, PathBuf>,
    merge_paths: HashSet<String>,
    excludes: HashSet<String>,
    staging: MergeStaging,
}

impl EntryLedger {
    fn route(&mut self, archive_path: &str, source: &Path) -> DroidpackResult<EntryAction> {
        if self.excludes.contains(archive_path) {
            debug!("Excluded {}", archive_path);
            return Ok(EntryAction::Skip);
        }
        if self.merge_paths.contains(archive_path) {
            return Ok(EntryAction::Divert);
        }
        match filter::check_entry(archive_path, source, &self.added) {
            EntryCheck::New => {
                self.added.insert(archive_path.to_string(), source.to_path_buf());
                Ok(EntryAction::Write)
            }
            EntryCheck::SameSource => Ok(EntryAction::Skip),
            EntryCheck::Conflict { existing } => Err(DroidpackError::DuplicateEntry {
                archive_path: archive_path.to_string(),
                first: existing,
                second: source.to_path_buf(),
            }),
        }
    }
}

/// Resource entries of one zip, filtered and routed through the ledger
struct ZipResources<'a> {
    ledger: &'a mut EntryLedger,
    source: &'a Path,
}

impl EntryFilter for ZipResources<'_> {
    fn check(&mut self, archive_path: &str) -> DroidpackResult<EntryAction> {
        if !filter::is_packageable_zip_entry(archive_path) {
            return Ok(EntryAction::Skip);
        }
        self.ledger.route(archive_path, self.source)
    }

    fn divert(&mut self, archive_path: &str, data: &mut dyn Read) -> DroidpackResult<()> {
        self.ledger.staging.append(archive_path, data)
    }
}

/// Builds one APK
pub struct ApkBuilder {
    output: PathBuf,
    writer: Option<SignedArchiveWriter>,
    ledger: EntryLedger,
    debug_jni: bool,
    state: BuilderState,
}

impl ApkBuilder {
    /// Start a new archive at `output`, signed when `signer` is given
    pub fn create(
        output: impl Into<PathBuf>,
        signer: Option<Arc<dyn Signer>>,
        options: PackagerOptions,
    ) -> DroidpackResult<Self> {
        let output = output.into();
        let writer = SignedArchiveWriter::create(&output, signer, &options.no_compress)
            .map_err(|e| DroidpackError::packaging(&output, e))?;

        Ok(Self {
            output,
            writer: Some(writer),
            ledger: EntryLedger {
                merge_paths: options.merge_paths.into_iter().collect(),
                excludes: options.excludes.into_iter().collect(),
                ..EntryLedger::default()
            },
            debug_jni: options.debug_jni,
            state: BuilderState::Open,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_sealed(&self) -> bool {
        self.state == BuilderState::Sealed
    }

    /// Add one file under `archive_path`
    pub fn add_file(&mut self, file: &Path, archive_path: &str) -> DroidpackResult<()> {
        self.guarded(|b| b.put_file(file, archive_path))
    }

    /// Add the resource entries of a zip (a resource package or a jar),
    /// skipping classes and existing signature files
    pub fn add_zip_entries(&mut self, zip: &Path) -> DroidpackResult<()> {
        self.guarded(|b| {
            debug!("Adding entries of {}", zip.display());
            let Self { writer, ledger, .. } = b;
            let writer = writer.as_mut().ok_or(DroidpackError::Aborted)?;
            let mut resources = ZipResources { ledger, source: zip };
            writer.write_zip_entries(zip, &mut resources)
        })
    }

    /// Add every packageable file below `dir`, named by its relative path
    pub fn add_directory_tree(&mut self, dir: &Path) -> DroidpackResult<()> {
        self.guarded(|b| {
            if !dir.is_dir() {
                return Err(DroidpackError::PathNotFound(dir.to_path_buf()));
            }
            debug!("Adding directory {}", dir.display());

            let walker = WalkDir::new(dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || !e.file_type().is_dir()
                        || filter::is_packageable_folder(&e.file_name().to_string_lossy())
                });

            for entry in walker {
                let entry = entry
                    .map_err(|e| DroidpackError::io(format!("walking {}", dir.display()), e.into()))?;
                if !entry.file_type().is_file()
                    || !filter::is_packageable_file(&entry.file_name().to_string_lossy())
                {
                    continue;
                }
                let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
                let Some(archive_path) = filter::archive_path_of(relative) else {
                    debug!("Skipping unnamed entry {}", entry.path().display());
                    continue;
                };
                b.put_file(entry.path(), &archive_path)?;
            }
            Ok(())
        })
    }

    /// Add native libraries from `dir/<abi>/`, optionally only for the
    /// listed ABIs
    pub fn add_native_libraries(&mut self, dir: &Path, abi_filter: Option<&[String]>) -> DroidpackResult<()> {
        self.guarded(|b| {
            if !dir.is_dir() {
                return Err(DroidpackError::PathNotFound(dir.to_path_buf()));
            }
            for abi_dir in sorted_children(dir)? {
                if !abi_dir.is_dir() {
                    continue;
                }
                let Some(abi) = abi_dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
                    continue;
                };
                if abi_filter.is_some_and(|abis| !abis.iter().any(|a| a == &abi)) {
                    debug!("Skipping ABI {}", abi);
                    continue;
                }

                for lib in sorted_children(&abi_dir)? {
                    let Some(name) = lib.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if lib.is_file() && filter::is_native_library(name, b.debug_jni) {
                        let archive_path = filter::native_library_path(&abi, name);
                        b.put_file(&lib, &archive_path)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Add the dex files of `main_dex_dir` under their own names, then
    /// `extra` numbered after them
    pub fn add_dex_files(&mut self, main_dex_dir: Option<&Path>, extra: &[PathBuf]) -> DroidpackResult<()> {
        self.guarded(|b| {
            let main = match main_dex_dir {
                Some(dir) => dex_files_in(dir)?,
                None => Vec::new(),
            };
            for dex in &main {
                let name = dex
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| DroidpackError::Internal(format!("unnamed dex file {}", dex.display())))?;
                b.put_file(dex, name)?;
            }
            for (position, dex) in extra.iter().enumerate() {
                let name = filter::extra_dex_name(main.len(), position);
                b.put_file(dex, &name)?;
            }
            debug!("Added {} main and {} extra dex files", main.len(), extra.len());
            Ok(())
        })
    }

    /// Flush merged entries, write manifest and signature, finish the archive
    pub fn seal(&mut self) -> DroidpackResult<PathBuf> {
        let output = self.guarded(|b| {
            let staged = std::mem::take(&mut b.ledger.staging.files);
            for (archive_path, staging) in &staged {
                let len = std::fs::metadata(staging)
                    .map_err(|e| DroidpackError::io(format!("reading merge staging for {}", archive_path), e))?
                    .len();
                if len == 0 {
                    continue;
                }
                let writer = b.writer.as_mut().ok_or(DroidpackError::Aborted)?;
                writer.write_file(staging, archive_path)?;
                b.ledger.added.insert(archive_path.clone(), staging.clone());
            }

            let writer = b.writer.take().ok_or(DroidpackError::Aborted)?;
            writer.close()
        })?;

        self.ledger.staging = MergeStaging::default();
        self.state = BuilderState::Sealed;
        info!("Packaged {} ({} entries)", output.display(), self.ledger.added.len());
        Ok(output)
    }

    fn put_file(&mut self, file: &Path, archive_path: &str) -> DroidpackResult<()> {
        if !file.is_file() {
            return Err(DroidpackError::PathNotFound(file.to_path_buf()));
        }
        match self.ledger.route(archive_path, file)? {
            EntryAction::Skip => Ok(()),
            EntryAction::Divert => {
                let mut input = File::open(file)
                    .map_err(|e| DroidpackError::io(format!("opening {}", file.display()), e))?;
                self.ledger.staging.append(archive_path, &mut input)
            }
            EntryAction::Write => {
                let writer = self.writer.as_mut().ok_or(DroidpackError::Aborted)?;
                writer.write_file(file, archive_path)
            }
        }
    }

    /// Run `op` unless sealed or aborted; on failure delete the partial
    /// archive and wrap the cause
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> DroidpackResult<T>) -> DroidpackResult<T> {
        match self.state {
            BuilderState::Sealed => return Err(DroidpackError::Sealed),
            BuilderState::Aborted => return Err(DroidpackError::Aborted),
            BuilderState::Open => {}
        }
        op(self).map_err(|e| {
            self.abort();
            DroidpackError::packaging(&self.output, e)
        })
    }

    fn abort(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.ledger.staging = MergeStaging::default();
        self.state = BuilderState::Aborted;
    }
}

fn sorted_children(dir: &Path) -> DroidpackResult<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| DroidpackError::io(format!("reading directory {}", dir.display()), e))?;
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DroidpackError::io(format!("reading directory {}", dir.display()), e))?;
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

fn dex_files_in(dir: &Path) -> DroidpackResult<Vec<PathBuf>> {
    let mut dex: Vec<PathBuf> = sorted_children(dir)?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "dex"))
        .collect();
    dex.sort_by_key(|p| dex_sort_key(p));
    Ok(dex)
}
