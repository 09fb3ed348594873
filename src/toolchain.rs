//! External conversion tools
//!
//! The slow step the cache exists to avoid: running `dx` (or `jack`) over
//! a library. Each tool is a [`Converter`], so the cache can drive any of
//! them, and tests can substitute an in-process fake.

use crate::cache::KeyVariant;
use crate::error::{DroidpackError, DroidpackResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Max number of output lines to include in conversion error messages.
const ERROR_TAIL_LINES: usize = 50;

/// A conversion of one input file into one or more output files
#[async_trait]
pub trait Converter: Send + Sync {
    /// Human-readable tool name for diagnostics
    fn name(&self) -> &str;

    /// Toolchain revision, part of the cache key
    fn revision(&self) -> &str;

    /// Key variant describing the options this converter runs with
    fn variant(&self) -> KeyVariant;

    /// Convert `input`, writing to `output`, and return every file produced
    async fn convert(&self, input: &Path, output: &Path) -> DroidpackResult<Vec<PathBuf>>;
}

/// Extract the useful tail of tool output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn error_output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > ERROR_TAIL_LINES {
        lines[total - ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Run `program` with `args` to convert `input`
async fn run_tool(tool: &str, program: &Path, args: &[String], input: &Path) -> DroidpackResult<()> {
    debug!("Executing: {} {:?}", program.display(), args);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DroidpackError::ToolNotFound(program.to_path_buf())
            } else {
                DroidpackError::command_failed(format!("{} {:?}", program.display(), args), e)
            }
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut output_tail = error_output_tail(&stdout, &stderr);
        if output_tail.is_empty() {
            output_tail = output.status.to_string();
        }
        Err(DroidpackError::ConversionFailed {
            tool: tool.to_string(),
            input: input.to_path_buf(),
            output_tail,
        })
    }
}

async fn ensure_parent(path: &Path) -> DroidpackResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DroidpackError::io(format!("creating directory {}", parent.display()), e))?;
    }
    Ok(())
}

/// Options for the dx pre-dexing tool
#[derive(Debug, Clone, Default)]
pub struct DexOptions {
    /// Pass `--force-jumbo`
    pub jumbo_mode: bool,
    /// Produce a multi-dex output directory
    pub multi_dex: bool,
    /// Extra arguments appended before the input
    pub extra_args: Vec<String>,
}

/// The `dx` tool from the Android build tools
#[derive(Debug, Clone)]
pub struct DxTool {
    program: PathBuf,
    revision: String,
    options: DexOptions,
}

impl DxTool {
    pub fn new(program: impl Into<PathBuf>, revision: impl Into<String>, options: DexOptions) -> Self {
        Self {
            program: program.into(),
            revision: revision.into(),
            options,
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["--dex".to_string()];
        if self.options.jumbo_mode {
            args.push("--force-jumbo".to_string());
        }
        if self.options.multi_dex {
            args.push("--multi-dex".to_string());
        }
        args.push(format!("--output={}", output.display()));
        args.extend(self.options.extra_args.iter().cloned());
        args.push(input.display().to_string());
        args
    }
}

#[async_trait]
impl Converter for DxTool {
    fn name(&self) -> &str {
        "dx"
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn variant(&self) -> KeyVariant {
        KeyVariant::PreDex {
            jumbo_mode: self.options.jumbo_mode,
            multi_dex: self.options.multi_dex,
        }
    }

    async fn convert(&self, input: &Path, output: &Path) -> DroidpackResult<Vec<PathBuf>> {
        if self.options.multi_dex {
            fs::create_dir_all(output)
                .await
                .map_err(|e| DroidpackError::io(format!("creating directory {}", output.display()), e))?;
        } else {
            ensure_parent(output).await?;
        }

        run_tool(self.name(), &self.program, &self.args(input, output), input).await?;

        let produced = if self.options.multi_dex {
            list_dex_files(output).await?
        } else if output.is_file() {
            vec![output.to_path_buf()]
        } else {
            Vec::new()
        };

        if produced.is_empty() {
            return Err(DroidpackError::MissingOutput {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            });
        }
        Ok(produced)
    }
}

/// The `jack` compiler, used to import a library as a `.jack` file
#[derive(Debug, Clone)]
pub struct JackTool {
    program: PathBuf,
    revision: String,
}

impl JackTool {
    pub fn new(program: impl Into<PathBuf>, revision: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            revision: revision.into(),
        }
    }
}

#[async_trait]
impl Converter for JackTool {
    fn name(&self) -> &str {
        "jack"
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn variant(&self) -> KeyVariant {
        KeyVariant::Jack
    }

    async fn convert(&self, input: &Path, output: &Path) -> DroidpackResult<Vec<PathBuf>> {
        ensure_parent(output).await?;
        let args = vec![
            "--import".to_string(),
            input.display().to_string(),
            "--output-jack".to_string(),
            output.display().to_string(),
        ];
        run_tool(self.name(), &self.program, &args, input).await?;

        if !output.is_file() {
            return Err(DroidpackError::MissingOutput {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            });
        }
        Ok(vec![output.to_path_buf()])
    }
}

/// List the `.dex` files directly inside `dir`, in `classes.dex`,
/// `classes2.dex`, ... order
pub async fn list_dex_files(dir: &Path) -> DroidpackResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| DroidpackError::io(format!("reading directory {}", dir.display()), e))?;

    let mut dex = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DroidpackError::io(format!("reading directory {}", dir.display()), e))?
    {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "dex") {
            dex.push(path);
        }
    }
    dex.sort_by_key(|p| dex_sort_key(p));
    Ok(dex)
}

/// Orders `classes.dex` before `classes2.dex` before `classes10.dex`
pub(crate) fn dex_sort_key(path: &Path) -> (u32, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = stem
        .strip_prefix("classes")
        .map(|rest| if rest.is_empty() { Some(1) } else { rest.parse().ok() })
        .unwrap_or(None)
        .unwrap_or(u32::MAX);
    (index, stem)
}
