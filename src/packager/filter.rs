//! Packaging filters
//!
//! Pure decisions about what goes into the APK and under which name. None of
//! these functions hold state: the caller passes the current input and the
//! record of entries added so far.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Compiled class file suffix; only dex output carries code into the APK
pub const CLASS_SUFFIX: &str = ".class";

/// Prefix for native libraries inside the APK
pub const NATIVE_LIB_ROOT: &str = "lib";

/// Debug helper binaries packaged next to native libraries in debug builds
const DEBUG_NATIVE_FILES: &[&str] = &["gdbserver", "gdb.setup"];

/// Folders never descended into when packaging a directory tree
const IGNORED_FOLDERS: &[&str] = &["CVS", ".svn", ".git", "SCCS"];

/// File names never packaged from a directory tree
const IGNORED_FILES: &[&str] = &["thumbs.db", "picasa.ini", "package.html", "overview.html"];

/// File extensions never packaged as resources
const IGNORED_EXTENSIONS: &[&str] = &["java", "class", "scc", "swp", "aidl", "rs", "fs", "rsh"];

/// Outcome of checking a candidate entry against the entries already added
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCheck {
    /// Path not seen yet: write it
    New,
    /// Same path from the same file: skip silently
    SameSource,
    /// Same path from a different file
    Conflict { existing: PathBuf },
}

/// Compare `source` against whatever was recorded for `archive_path`
pub fn check_entry(archive_path: &str, source: &Path, added: &HashMap<String, PathBuf>) -> EntryCheck {
    match added.get(archive_path) {
        None => EntryCheck::New,
        Some(existing) if same_file(existing, source) => EntryCheck::SameSource,
        Some(existing) => EntryCheck::Conflict {
            existing: existing.clone(),
        },
    }
}

/// Absolute-path equality, falling back to the paths as given
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Whether a resource entry coming from a zip or jar should be packaged.
///
/// Drops directories, compiled classes and sources, and existing jar
/// signature files, which would invalidate the APK's own signature.
pub fn is_packageable_zip_entry(archive_path: &str) -> bool {
    if archive_path.ends_with('/') || archive_path.ends_with(CLASS_SUFFIX) {
        return false;
    }
    if archive_path.ends_with(".java") {
        return false;
    }
    if let Some(name) = archive_path.strip_prefix("META-INF/") {
        if !name.contains('/') && is_signature_file(name) {
            return false;
        }
    }
    true
}

fn is_signature_file(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper == "MANIFEST.MF"
        || upper.ends_with(".SF")
        || upper.ends_with(".RSA")
        || upper.ends_with(".DSA")
        || upper.ends_with(".EC")
}

/// Whether a folder of a resource directory tree should be descended into
pub fn is_packageable_folder(name: &str) -> bool {
    !IGNORED_FOLDERS.contains(&name)
}

/// Whether a file of a resource directory tree should be packaged
pub fn is_packageable_file(name: &str) -> bool {
    if name.ends_with('~') {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if IGNORED_FILES.contains(&lower.as_str()) {
        return false;
    }
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => !IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

/// Whether a file in an ABI folder is packaged as a native library
pub fn is_native_library(name: &str, debug_jni: bool) -> bool {
    if name.starts_with("lib") && name.ends_with(".so") && name.len() > "lib.so".len() {
        return true;
    }
    debug_jni && DEBUG_NATIVE_FILES.contains(&name)
}

/// Archive path of a native library for `abi`
pub fn native_library_path(abi: &str, name: &str) -> String {
    format!("{}/{}/{}", NATIVE_LIB_ROOT, abi, name)
}

/// Archive name for the extra dex file at `position` (zero based), given
/// how many dex files the main dex folder contributed
pub fn extra_dex_name(main_count: usize, position: usize) -> String {
    format!("classes{}.dex", main_count + position + 1)
}

/// Join relative path components with `/`
pub fn archive_path_of(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            std::path::Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
