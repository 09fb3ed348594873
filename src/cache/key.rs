//! Cache keys
//!
//! A key identifies one conversion: which library, which toolchain revision,
//! and the conversion flavour with whatever options change its output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Conversion flavour and the options that affect its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyVariant {
    /// Library jar to a `.jack` library
    Jack,
    /// Library jar to pre-dexed output
    PreDex {
        /// `--force-jumbo` was passed to dx
        jumbo_mode: bool,
        /// Output is a multi-dex directory rather than a single file
        multi_dex: bool,
    },
}

impl KeyVariant {
    /// Whether the conversion produces a directory of dex files
    pub fn is_multi_dex(&self) -> bool {
        matches!(self, Self::PreDex { multi_dex: true, .. })
    }
}

impl fmt::Display for KeyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jack => write!(f, "jack"),
            Self::PreDex {
                jumbo_mode,
                multi_dex,
            } => {
                write!(f, "pre-dex")?;
                if *jumbo_mode {
                    write!(f, "+jumbo")?;
                }
                if *multi_dex {
                    write!(f, "+multidex")?;
                }
                Ok(())
            }
        }
    }
}

/// Identity of one cached conversion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: PathBuf,
    revision: String,
    variant: KeyVariant,
}

impl CacheKey {
    /// Create a key for converting `source` with toolchain `revision`
    pub fn new(source: impl Into<PathBuf>, revision: impl Into<String>, variant: KeyVariant) -> Self {
        Self {
            source: source.into(),
            revision: revision.into(),
            variant,
        }
    }

    /// Library file being converted
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Toolchain revision the conversion ran with
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn variant(&self) -> KeyVariant {
        self.variant
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} @ {}]",
            self.source.display(),
            self.variant,
            self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn structural_equality() {
        let a = CacheKey::new("/libs/a.jar", "27.0.3", KeyVariant::Jack);
        let b = CacheKey::new(PathBuf::from("/libs/a.jar"), "27.0.3".to_string(), KeyVariant::Jack);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn revision_and_variant_distinguish_keys() {
        let base = CacheKey::new("/libs/a.jar", "27.0.3", KeyVariant::Jack);
        assert_ne!(base, CacheKey::new("/libs/a.jar", "28.0.0", KeyVariant::Jack));

        let plain = CacheKey::new(
            "/libs/a.jar",
            "27.0.3",
            KeyVariant::PreDex {
                jumbo_mode: false,
                multi_dex: false,
            },
        );
        let jumbo = CacheKey::new(
            "/libs/a.jar",
            "27.0.3",
            KeyVariant::PreDex {
                jumbo_mode: true,
                multi_dex: false,
            },
        );
        assert_ne!(base, plain);
        assert_ne!(plain, jumbo);
    }

    #[test]
    fn variant_display() {
        assert_eq!(KeyVariant::Jack.to_string(), "jack");
        assert_eq!(
            KeyVariant::PreDex {
                jumbo_mode: true,
                multi_dex: true
            }
            .to_string(),
            "pre-dex+jumbo+multidex"
        );
    }

    #[test]
    fn variant_serializes_tagged() {
        let json = serde_json::to_string(&KeyVariant::PreDex {
            jumbo_mode: false,
            multi_dex: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"pre_dex","jumbo_mode":false,"multi_dex":true}"#);
    }
}
