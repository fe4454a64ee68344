//! Recipe loading, parsing, and validation.
//!
//! This module handles all aspects of recipe configuration:
//! - Schema definitions in [`schema`]
//! - File discovery, loading and variable files in [`loader`]
//! - Validation in [`validator`]
//! - Variable interpolation in [`interpolation`]
//!
//! # Example
//!
//! ```
//! use converge::config::{parse_recipe, validate};
//! use std::path::Path;
//!
//! let yaml = r#"
//! steps:
//!   - name: opt
//!     action: { type: directory, path: /opt, mode: "0755" }
//! "#;
//! let recipe = parse_recipe(yaml, Path::new("converge.yml")).unwrap();
//! validate(&recipe).unwrap();
//! assert_eq!(recipe.steps[0].name, "opt");
//! ```

pub mod interpolation;
pub mod loader;
pub mod schema;
pub mod validator;

// Schema re-exports
pub use schema::{ActionSpec, GuardSpec, PackageCommands, RecipeConfig, Settings, StepConfig};

// Loader re-exports
pub use loader::{
    build_context, find_recipe, load_recipe, load_vars_file, parse_recipe, variable_value,
    RECIPE_FILE,
};

// Validator re-exports
pub use validator::{validate, validate_recipe, ValidationError};

// Interpolation re-exports
pub use interpolation::{
    extract_variables, has_interpolation, parse_interpolation, resolve_string,
    InterpolationContext, Segment,
};
