//! Library conversion through the cache
//!
//! Ties a [`Converter`] to the cache: the key is built from the converter's
//! revision and options, and outputs are named so that two libraries with
//! the same file name never collide in the output directory.

use super::{CacheKey, CacheOutcome, ConversionCache};
use crate::error::{DroidpackError, DroidpackResult};
use crate::toolchain::Converter;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Output path for converting `library` into `out_dir` with extension `ext`.
///
/// The name is `<stem>-<hash>.<ext>` where the hash is taken over the
/// library's absolute path, so `a/lib.jar` and `b/lib.jar` stay distinct.
pub fn output_path_for(library: &Path, out_dir: &Path, ext: &str) -> PathBuf {
    let absolute = std::path::absolute(library).unwrap_or_else(|_| library.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let stem = library
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "library".to_string());
    out_dir.join(format!("{}-{}.{}", stem, hex::encode(&digest[..4]), ext))
}

impl ConversionCache {
    /// Convert one library with `converter`, keyed by its revision and options
    pub async fn convert_library<C>(&self, library: &Path, output: &Path, converter: &C) -> DroidpackResult<CacheOutcome>
    where
        C: Converter + ?Sized,
    {
        if !library.is_file() {
            return Err(DroidpackError::PathNotFound(library.to_path_buf()));
        }
        let source = std::path::absolute(library)
            .map_err(|e| DroidpackError::io(format!("resolving {}", library.display()), e))?;
        let key = CacheKey::new(source, converter.revision(), converter.variant());
        self.convert(&key, output, converter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, KeyVariant};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CopyTool {
        runs: AtomicUsize,
        jumbo: bool,
    }

    #[async_trait]
    impl Converter for CopyTool {
        fn name(&self) -> &str {
            "copy"
        }

        fn revision(&self) -> &str {
            "27.0.3"
        }

        fn variant(&self) -> KeyVariant {
            KeyVariant::PreDex {
                jumbo_mode: self.jumbo,
                multi_dex: false,
            }
        }

        async fn convert(&self, input: &Path, output: &Path) -> DroidpackResult<Vec<PathBuf>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::fs::copy(input, output).map_err(|e| DroidpackError::io("copy", e))?;
            Ok(vec![output.to_path_buf()])
        }
    }

    #[test]
    fn output_names_do_not_collide() {
        let out = Path::new("/out");
        let a = output_path_for(Path::new("/deps/a/lib.jar"), out, "dex");
        let b = output_path_for(Path::new("/deps/b/lib.jar"), out, "dex");
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("lib-"));
        assert_eq!(a.extension().unwrap(), "dex");
        assert_eq!(a, output_path_for(Path::new("/deps/a/lib.jar"), out, "dex"));
    }

    #[tokio::test]
    async fn options_are_part_of_the_key() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.jar");
        std::fs::write(&lib, b"classes").unwrap();
        let cache = ConversionCache::in_memory(CacheOptions::default());

        let plain = CopyTool {
            runs: AtomicUsize::new(0),
            jumbo: false,
        };
        let jumbo = CopyTool {
            runs: AtomicUsize::new(0),
            jumbo: true,
        };

        cache
            .convert_library(&lib, &dir.path().join("plain.dex"), &plain)
            .await
            .unwrap();
        let again = cache
            .convert_library(&lib, &dir.path().join("plain2.dex"), &plain)
            .await
            .unwrap();
        cache
            .convert_library(&lib, &dir.path().join("jumbo.dex"), &jumbo)
            .await
            .unwrap();

        assert!(again.is_hit());
        assert_eq!(plain.runs.load(Ordering::SeqCst), 1);
        assert_eq!(jumbo.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_library_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::in_memory(CacheOptions::default());
        let tool = CopyTool {
            runs: AtomicUsize::new(0),
            jumbo: false,
        };
        let err = cache
            .convert_library(&dir.path().join("nope.jar"), &dir.path().join("out.dex"), &tool)
            .await
            .unwrap_err();
        assert!(matches!(err, DroidpackError::PathNotFound(_)));
    }
}
