//! Step resolution.
//!
//! Turns recipe steps into engine steps:
//!
//! - [`ResolvedStep`] - a step with variables substituted and guards implied
//! - [`Check`] - a resolved guard predicate
//! - [`Operation`] - a resolved action
//! - [`build_engine`] - validate a recipe and register its steps
//!
//! # Example
//!
//! ```no_run
//! use converge::config::load_recipe;
//! use converge::engine::CancellationToken;
//! use converge::executor::SystemExecutor;
//! use converge::steps::build_engine;
//! use std::collections::HashMap;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let path = Path::new("converge.yml");
//! let recipe = load_recipe(path).unwrap();
//! let executor = Arc::new(SystemExecutor::new().unwrap());
//! let engine = build_engine(&recipe, path, &HashMap::new(), executor).unwrap();
//!
//! let result = engine.run(&CancellationToken::new()).unwrap();
//! println!("converged: {}", result.is_converged());
//! ```

pub mod check;
pub mod operation;
pub mod plan;
pub mod resolved;

pub use check::Check;
pub use operation::Operation;
pub use plan::{build_engine, engine_step, resolve_recipe};
pub use resolved::{ResolvedStep, StepResolver};
