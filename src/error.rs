//! Error types for droidpack
//!
//! All modules use `DroidpackResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for droidpack operations
pub type DroidpackResult<T> = Result<T, DroidpackError>;

/// All errors that can occur in droidpack
#[derive(Error, Debug)]
pub enum DroidpackError {
    // Conversion errors
    #[error("{tool} failed to convert {}:\n{output_tail}", .input.display())]
    ConversionFailed {
        tool: String,
        input: PathBuf,
        output_tail: String,
    },

    #[error("Conversion of {} produced no output at {}", .input.display(), .output.display())]
    MissingOutput { input: PathBuf, output: PathBuf },

    #[error("Conversion of {} was abandoned before it completed", .input.display())]
    ConversionAbandoned { input: PathBuf },

    #[error("Timed out after {secs}s waiting for conversion of {}", .input.display())]
    ConversionTimeout { input: PathBuf, secs: u64 },

    #[error("Conversion tool not found: {0}")]
    ToolNotFound(PathBuf),

    // Packaging errors
    #[error(
        "Duplicate files copied in APK {archive_path}\n\tFile 1: {}\n\tFile 2: {}",
        .first.display(),
        .second.display()
    )]
    DuplicateEntry {
        archive_path: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("APK is already sealed")]
    Sealed,

    #[error("APK builder was aborted by an earlier failure")]
    Aborted,

    #[error("Failed to package {}: {source}", .output.display())]
    Packaging {
        output: PathBuf,
        #[source]
        source: Box<DroidpackError>,
    },

    #[error("Zip error in {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Invalid signing key material in {}: {reason}", .path.display())]
    SigningKey { path: PathBuf, reason: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Task errors
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("{0}")]
    Multiple(ErrorList),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DroidpackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a zip error for the archive at `path`
    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error as a packaging failure of `output`.
    ///
    /// Already-wrapped errors are returned unchanged.
    pub fn packaging(output: impl Into<PathBuf>, source: DroidpackError) -> Self {
        match source {
            err @ Self::Packaging { .. } => err,
            other => Self::Packaging {
                output: output.into(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost cause, looking through packaging wrappers
    pub fn root(&self) -> &DroidpackError {
        match self {
            Self::Packaging { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the conversion in a later build may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingOutput { .. }
                | Self::ConversionTimeout { .. }
                | Self::ConversionAbandoned { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::DuplicateEntry { .. } => {
                Some("Add one of the paths to [package].excludes or [package].merge in droidpack.toml")
            }
            Self::ToolNotFound(_) => Some("Set [dex].tool to the dx or jack executable"),
            Self::ConversionTimeout { .. } => {
                Some("Raise [cache].wait_timeout_secs, or set it to 0 to wait indefinitely")
            }
            Self::SigningKey { .. } => {
                Some("Provide a PKCS#8 PEM private key and a PEM certificate in [signing]")
            }
            _ => None,
        }
    }
}

/// An ordered list of errors reported together.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<DroidpackError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: DroidpackError) {
        self.0.push(err);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DroidpackError> {
        self.0.iter()
    }

    /// `Ok(())` when empty, the single error when there is one, `Multiple` otherwise.
    pub fn into_result(mut self) -> DroidpackResult<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(DroidpackError::Multiple(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl IntoIterator for ErrorList {
    type Item = DroidpackError;
    type IntoIter = std::vec::IntoIter<DroidpackError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a DroidpackError;
    type IntoIter = std::slice::Iter<'a, DroidpackError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<DroidpackError> for ErrorList {
    fn from_iter<I: IntoIterator<Item = DroidpackError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entry_names_both_files() {
        let err = DroidpackError::DuplicateEntry {
            archive_path: "res/raw/a.txt".to_string(),
            first: PathBuf::from("/one/a.txt"),
            second: PathBuf::from("/two/a.txt"),
        };
        let msg = err.to_string();
        assert!(msg.contains("res/raw/a.txt"));
        assert!(msg.contains("/one/a.txt"));
        assert!(msg.contains("/two/a.txt"));
    }

    #[test]
    fn packaging_wraps_once() {
        let inner = DroidpackError::Sealed;
        let wrapped = DroidpackError::packaging("app.apk", inner);
        let rewrapped = DroidpackError::packaging("other.apk", wrapped);
        assert!(rewrapped.to_string().contains("app.apk"));
        assert!(matches!(rewrapped.root(), DroidpackError::Sealed));
    }

    #[test]
    fn hint_looks_through_wrapper() {
        let err = DroidpackError::packaging(
            "app.apk",
            DroidpackError::DuplicateEntry {
                archive_path: "a".to_string(),
                first: PathBuf::from("x"),
                second: PathBuf::from("y"),
            },
        );
        assert!(err.hint().unwrap().contains("excludes"));
    }

    #[test]
    fn error_list_into_result() {
        assert!(ErrorList::new().into_result().is_ok());

        let single: ErrorList = vec![DroidpackError::Sealed].into_iter().collect();
        assert!(matches!(single.into_result(), Err(DroidpackError::Sealed)));

        let many: ErrorList = vec![DroidpackError::Sealed, DroidpackError::Aborted]
            .into_iter()
            .collect();
        match many.into_result() {
            Err(DroidpackError::Multiple(list)) => {
                assert_eq!(list.len(), 2);
                let msg = list.to_string();
                assert!(msg.contains("1. APK is already sealed"));
                assert!(msg.contains("2. APK builder was aborted"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn recoverable_errors() {
        assert!(DroidpackError::ConversionAbandoned {
            input: PathBuf::from("a.jar")
        }
        .is_recoverable());
        assert!(!DroidpackError::Sealed.is_recoverable());
    }
}
