//! UI module for consistent CLI output
//!
//! Uses `cliclack` for framing and prompts on interactive terminals, with
//! automatic fallback to plain tagged lines in CI.
//!
//! # Example
//!
//! ```rust,ignore
//! use depcache::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! ui::intro(&ctx, "depcache install");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Uploading 1 cache archive(s)...");
//! // ... wait for uploads ...
//! spinner.stop("Cache uploads finished");
//!
//! ui::step_ok(&ctx, "bundle up to date");
//! ui::outro_success(&ctx, "Dependencies ready");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    format_bytes, intro, outro_success, step_error_detail, step_info, step_ok, step_ok_detail,
    step_warn, step_warn_hint,
};
pub use progress::{InstallProgress, TaskSpinner};
pub use prompts::confirm;
