//! Configuration schema for droidpack
//!
//! The global configuration lives at `~/.config/droidpack/config.toml`; a
//! project may override any key in a `droidpack.toml` next to its sources.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Conversion cache settings
    pub cache: CacheConfig,

    /// Pre-dex tool settings
    pub dex: DexConfig,

    /// APK packaging settings
    pub package: PackageConfig,

    /// APK signing settings
    pub signing: SigningConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Conversion cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Reuse pre-dexed outputs across builds (default: true)
    pub enabled: bool,

    /// Cache file; defaults to `predex-cache.json` in the state directory
    pub file: Option<PathBuf>,

    /// Seconds to wait on another task converting the same library
    /// (0 = wait until it finishes)
    pub wait_timeout_secs: u64,

    /// Concurrent conversions (0 = one per CPU)
    pub jobs: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
            wait_timeout_secs: 0,
            jobs: 0,
        }
    }
}

impl CacheConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }
}

/// Pre-dex tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DexConfig {
    /// Path to the `dx` executable
    pub tool: PathBuf,

    /// Build tools revision; part of every cache key
    pub revision: String,

    /// Pass `--force-jumbo`
    pub jumbo_mode: bool,

    /// Produce multi-dex output
    pub multi_dex: bool,

    /// Extra arguments for every invocation
    pub extra_args: Vec<String>,
}

impl Default for DexConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("dx"),
            revision: "27.0.3".to_string(),
            jumbo_mode: false,
            multi_dex: false,
            extra_args: vec![],
        }
    }
}

/// APK packaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Package `gdbserver` with native libraries
    pub debug_jni: bool,

    /// Only package native libraries for these ABIs (empty = all)
    pub abi_filter: Vec<String>,

    /// Archive paths concatenated across inputs
    pub merge: Vec<String>,

    /// Archive paths dropped from every input
    pub excludes: Vec<String>,

    /// Extensions stored without compression
    pub no_compress: Vec<String>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            debug_jni: false,
            abi_filter: vec![],
            merge: vec![],
            excludes: vec![],
            no_compress: ["png", "jpg", "ogg", "mp3", "mp4", "arsc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// APK signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// PKCS#8 PEM private key
    pub key: Option<PathBuf>,

    /// PEM certificate matching the key
    pub certificate: Option<PathBuf>,
}

impl SigningConfig {
    /// Key and certificate, when both are configured
    pub fn key_pair(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.key.as_ref().zip(self.certificate.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[dex]"));
        assert!(toml.contains("[package]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dex.revision, "27.0.3");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.wait_timeout(), None);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            wait_timeout_secs = 90

            [package]
            merge = ["META-INF/NOTICE"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.wait_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.package.merge, vec!["META-INF/NOTICE"]);
        assert!(config.package.no_compress.contains(&"png".to_string())); // default preserved
    }

    #[test]
    fn signing_needs_both_files() {
        let mut signing = SigningConfig {
            key: Some(PathBuf::from("debug.pem")),
            ..SigningConfig::default()
        };
        assert!(signing.key_pair().is_none());
        signing.certificate = Some(PathBuf::from("debug.crt"));
        assert!(signing.key_pair().is_some());
    }
}
