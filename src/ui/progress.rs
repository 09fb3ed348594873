//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress over a known number of tasks.
///
/// Shows an indicatif bar in interactive mode and one line per finished
/// task otherwise. Clones share the same bar, so each task can report its
/// own completion.
#[derive(Clone)]
pub struct TaskProgress {
    bar: Option<ProgressBar>,
}

impl TaskProgress {
    pub fn new(ctx: &UiContext, label: &str, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            eprintln!("{} ({} items)...", label, total);
            None
        };
        Self { bar }
    }

    /// Record one finished task
    pub fn task_done(&self, name: &str, detail: &str) {
        match self.bar {
            Some(ref bar) => {
                bar.set_message(name.to_string());
                bar.inc(1);
            }
            None => eprintln!("  {} {} ({})", style("[OK]").for_stderr().green(), name, detail),
        }
    }

    /// Record one failed task
    pub fn task_failed(&self, name: &str) {
        match self.bar {
            Some(ref bar) => {
                bar.println(format!("  {} {}", style("✗").red(), name));
                bar.inc(1);
            }
            None => eprintln!("  {} {}", style("[FAIL]").for_stderr().red(), name),
        }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
