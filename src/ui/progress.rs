//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Width at which installer output is cut in the spinner message
const MESSAGE_WIDTH: usize = 60;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with warning message
    pub fn stop_warn(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[WARN]").yellow(), message);
        }
    }
}

/// Progress display for package manager runs.
///
/// Interactive terminals get a spinner showing the latest installer line;
/// CI logs get every line, indented.
pub struct InstallProgress {
    bar: Option<ProgressBar>,
}

impl InstallProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new_spinner();
            let template = ProgressStyle::with_template(
                "  {spinner:.cyan} Provisioning {prefix}  {msg:.dim}  {elapsed:.dim}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Provisioning {}...", label);
            None
        };
        Self { bar }
    }

    /// Show one line of installer output
    pub fn on_line(&self, line: String) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        match &self.bar {
            Some(bar) => bar.set_message(truncate(trimmed, MESSAGE_WIDTH)),
            None => println!("  {}", trimmed),
        }
    }

    /// Finish and clear the spinner
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn truncate(line: &str, width: usize) -> String {
    if line.chars().count() > width {
        let head: String = line.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}
