//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// droidpack - Android packaging with a persistent pre-dex cache
///
/// Converts libraries once per toolchain revision and assembles signed APKs
/// from resources, dex files and native libraries.
#[derive(Parser, Debug)]
#[command(name = "droidpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DROIDPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local droidpack.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert libraries to dex, reusing cached outputs
    Predex(PredexArgs),

    /// Assemble and sign an APK
    Package(PackageArgs),

    /// Inspect or reset the conversion cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the predex command
#[derive(Parser, Debug)]
pub struct PredexArgs {
    /// Library jars to convert
    #[arg(required = true)]
    pub libraries: Vec<PathBuf>,

    /// Output directory for converted files
    #[arg(short, long)]
    pub out: PathBuf,

    /// Concurrent conversions (0 = one per CPU)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Path to the dx executable
    #[arg(long)]
    pub dx: Option<PathBuf>,

    /// Import into .jack files with this jack executable instead of dx
    #[arg(long, conflicts_with = "dx")]
    pub jack: Option<PathBuf>,

    /// Build tools revision recorded in the cache key
    #[arg(long)]
    pub revision: Option<String>,

    /// Pass --force-jumbo to dx
    #[arg(long)]
    pub jumbo: bool,

    /// Produce multi-dex output
    #[arg(long)]
    pub multi_dex: bool,

    /// Convert everything without consulting the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Keep converting after a failure and report every failure at the end
    #[arg(short, long)]
    pub keep_going: bool,
}

/// Arguments for the package command
#[derive(Parser, Debug)]
pub struct PackageArgs {
    /// Output APK path
    #[arg(short, long)]
    pub out: PathBuf,

    /// Resource package or jar whose resource entries are added
    #[arg(short, long)]
    pub resources: Vec<PathBuf>,

    /// Directory tree of loose resources
    #[arg(long)]
    pub res_dir: Vec<PathBuf>,

    /// Folder with the main dex files (classes.dex, classes2.dex, ...)
    #[arg(long)]
    pub dex_dir: Option<PathBuf>,

    /// Extra dex file, numbered after the main dex files
    #[arg(long)]
    pub dex: Vec<PathBuf>,

    /// Folder with one subfolder of native libraries per ABI
    #[arg(long)]
    pub native_libs: Option<PathBuf>,

    /// Only package native libraries for these ABIs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub abi: Vec<String>,

    /// Package gdbserver next to native libraries
    #[arg(long)]
    pub debug_jni: bool,

    /// Archive path whose contents are concatenated across inputs
    #[arg(long)]
    pub merge: Vec<String>,

    /// Archive path to drop from every input
    #[arg(long)]
    pub exclude: Vec<String>,

    /// PKCS#8 PEM signing key
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// PEM certificate for the signing key
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// Write an unsigned APK even when signing is configured
    #[arg(long, conflicts_with_all = ["key", "cert"])]
    pub unsigned: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show what the persisted cache holds
    Stats,

    /// Delete the persisted cache
    Clear,

    /// Show the cache file path
    Path,
}
