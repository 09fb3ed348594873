//! droidpack - Android packaging with a persistent pre-dex cache
//!
//! Converts libraries to dex once per toolchain revision, reusing results
//! across builds, and assembles signed APKs from resources, dex files and
//! native libraries.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod hasher;
pub mod packager;
pub mod tasks;
pub mod toolchain;
pub mod ui;

pub use error::{DroidpackError, DroidpackResult};
