//! Converge - an idempotent convergence engine.
//!
//! A recipe declares an ordered list of steps. Each step pairs a guard
//! ("is the target state already in place?") with an action that puts it
//! in place. Running the recipe applies only what is missing, so repeated
//! runs converge on the declared state and then leave it alone.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Recipe loading, parsing, validation and variables
//! - [`engine`] - The convergence loop, notifications and cancellation
//! - [`error`] - Error types and result aliases
//! - [`executor`] - Shell commands, downloads, file probes and edits
//! - [`state`] - Run reports
//! - [`steps`] - Turning recipe steps into engine steps
//! - [`ui`] - Terminal output
//!
//! # Example
//!
//! ```
//! use converge::config::{resolve_string, InterpolationContext};
//!
//! let ctx = InterpolationContext::new().with_override("llvm_dir", "/opt/llvm");
//! let command = resolve_string("make LLVM=${llvm_dir}", &ctx).unwrap();
//! assert_eq!(command, "make LLVM=/opt/llvm");
//! ```
//!
//! For recipe-driven runs, see [`steps::build_engine`] and the integration
//! tests.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod state;
pub mod steps;
pub mod ui;

pub use error::{ConvergeError, Result};
