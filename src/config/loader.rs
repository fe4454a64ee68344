//! Recipe discovery and loading.
//!
//! A recipe is a single YAML file, `converge.yml` in the project directory
//! unless `--config` names another. An optional `vars_file` beside it holds
//! tuning variables.

use crate::config::interpolation::InterpolationContext;
use crate::config::schema::RecipeConfig;
use crate::error::{ConvergeError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default recipe file name.
pub const RECIPE_FILE: &str = "converge.yml";

/// Locate the recipe for a project.
///
/// An explicit path wins; relative explicit paths are taken relative to the
/// project root.
pub fn find_recipe(project_root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => project_root.join(path),
        None => project_root.join(RECIPE_FILE),
    }
}

/// Load a recipe file.
///
/// # Errors
///
/// Returns `ConfigNotFound` if the file doesn't exist.
/// Returns `ConfigParseError` if the YAML is invalid.
pub fn load_recipe(path: &Path) -> Result<RecipeConfig> {
    let content = read(path)?;
    parse_recipe(&content, path)
}

/// Parse YAML content into a recipe.
///
/// `source_path` is only used for error reporting.
pub fn parse_recipe(content: &str, source_path: &Path) -> Result<RecipeConfig> {
    serde_yaml::from_str(content).map_err(|e| ConvergeError::ConfigParseError {
        path: source_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a variables file: a YAML mapping of scalar values.
///
/// An empty file yields no variables.
pub fn load_vars_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = read(path)?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| ConvergeError::ConfigParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    match value {
        serde_yaml::Value::Null => Ok(HashMap::new()),
        serde_yaml::Value::Mapping(map) => {
            let mut vars = HashMap::new();
            for (key, value) in map {
                let key = scalar_to_string(&key).ok_or_else(|| {
                    ConvergeError::ConfigValidationError {
                        message: format!("{}: variable names must be strings", path.display()),
                    }
                })?;
                let value = variable_value(&key, &value)?;
                vars.insert(key, value);
            }
            Ok(vars)
        }
        _ => Err(ConvergeError::ConfigValidationError {
            message: format!("{}: expected a mapping of variables", path.display()),
        }),
    }
}

/// Convert a variable's YAML value to its string form.
///
/// Only strings, numbers and booleans are accepted.
pub fn variable_value(name: &str, value: &serde_yaml::Value) -> Result<String> {
    scalar_to_string(value).ok_or_else(|| ConvergeError::ConfigValidationError {
        message: format!("variable '{}' must be a string, number or boolean", name),
    })
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build the interpolation context for a recipe.
///
/// Combines the recipe's inline `vars`, its `vars_file` (resolved against
/// the recipe's directory) and command-line overrides.
pub fn build_context(
    recipe: &RecipeConfig,
    recipe_path: &Path,
    overrides: &HashMap<String, String>,
) -> Result<InterpolationContext> {
    let recipe_dir = recipe_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut ctx = InterpolationContext::new().with_recipe_dir(&recipe_dir);

    for (name, value) in &recipe.vars {
        ctx.inline.insert(name.clone(), variable_value(name, value)?);
    }

    if let Some(vars_file) = &recipe.vars_file {
        let path = if vars_file.is_absolute() {
            vars_file.clone()
        } else {
            recipe_dir.join(vars_file)
        };
        ctx.file = load_vars_file(&path)?;
    }

    ctx.overrides = overrides.clone();
    Ok(ctx)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvergeError::ConfigNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConvergeError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn find_recipe_defaults_to_project_file() {
        let root = Path::new("/srv/project");
        assert_eq!(find_recipe(root, None), root.join(RECIPE_FILE));
        assert_eq!(
            find_recipe(root, Some(Path::new("alt.yml"))),
            root.join("alt.yml")
        );
        assert_eq!(
            find_recipe(root, Some(Path::new("/etc/recipe.yml"))),
            PathBuf::from("/etc/recipe.yml")
        );
    }

    #[test]
    fn load_recipe_reports_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_recipe(&temp.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, ConvergeError::ConfigNotFound { .. }));
    }

    #[test]
    fn parse_recipe_reports_path_on_bad_yaml() {
        let err = parse_recipe("steps: [", Path::new("/bad.yml")).unwrap_err();
        match err {
            ConvergeError::ConfigParseError { path, .. } => {
                assert_eq!(path, PathBuf::from("/bad.yml"))
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn vars_file_accepts_scalars() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "bcheck_max_states: 3000\nverbose: true\nname: rchk\n").unwrap();

        let vars = load_vars_file(&path).unwrap();
        assert_eq!(vars["bcheck_max_states"], "3000");
        assert_eq!(vars["verbose"], "true");
        assert_eq!(vars["name"], "rchk");
    }

    #[test]
    fn vars_file_rejects_nested_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "bcheck_max_states: [1, 2]\n").unwrap();

        match load_vars_file(&path).unwrap_err() {
            ConvergeError::ConfigValidationError { message } => {
                assert!(message.contains("bcheck_max_states"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn empty_vars_file_is_allowed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "").unwrap();
        assert!(load_vars_file(&path).unwrap().is_empty());
    }

    #[test]
    fn build_context_layers_sources() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tuning.yml"), "jobs: 4\nprefix: /opt\n").unwrap();
        let recipe_path = temp.path().join(RECIPE_FILE);
        let recipe = parse_recipe(
            "vars:\n  jobs: 1\n  mode: release\nvars_file: tuning.yml\n",
            &recipe_path,
        )
        .unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("prefix".to_string(), "/usr/local".to_string());

        let ctx = build_context(&recipe, &recipe_path, &overrides).unwrap();
        assert_eq!(ctx.resolve("jobs"), Some("4"));
        assert_eq!(ctx.resolve("mode"), Some("release"));
        assert_eq!(ctx.resolve("prefix"), Some("/usr/local"));
        assert_eq!(
            ctx.resolve("recipe_dir"),
            Some(temp.path().display().to_string().as_str())
        );
    }

    #[test]
    fn build_context_requires_vars_file_to_exist() {
        let temp = TempDir::new().unwrap();
        let recipe_path = temp.path().join(RECIPE_FILE);
        let recipe = parse_recipe("vars_file: missing.yml\n", &recipe_path).unwrap();

        let err = build_context(&recipe, &recipe_path, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConvergeError::ConfigNotFound { .. }));
    }
}
