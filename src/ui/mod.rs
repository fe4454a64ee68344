//! Terminal output.
//!
//! - [`Theme`] - `console` styles, with a plain variant for `--no-color`
//! - [`OutputMode`] - how much to print
//! - [`RunReporter`] - per-step lines and the closing summary

pub mod output;
pub mod progress;
pub mod theme;

pub use output::OutputMode;
pub use progress::{format_duration, RunReporter};
pub use theme::{should_use_colors, Theme};
