//! Terminal output
//!
//! Styled steps and an `indicatif` progress bar in interactive terminals,
//! plain tagged lines (`[OK]`, `[WARN]`, ...) in CI and when piped.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, section, step_info, step_ok_detail, step_warn_hint};
pub use progress::TaskProgress;
