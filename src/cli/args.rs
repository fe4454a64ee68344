//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Converge - bring a machine to the state a recipe declares.
#[derive(Debug, Parser)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to recipe file (overrides default converge.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to project root (overrides current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Show each step as it starts
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show failures and the summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Converge the machine to the recipe (default if no command specified)
    Apply(ApplyArgs),
}

/// Arguments for the `apply` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ApplyArgs {
    /// Override a recipe variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Cancel the run after this many seconds, stopping any running action or guard command
    #[arg(long, value_name = "SECS")]
    pub time_limit: Option<u64>,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_apply() {
        let cli = Cli::try_parse_from(["converge"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_flags_parse() {
        let cli = Cli::try_parse_from([
            "converge",
            "-c",
            "site.yml",
            "--project",
            "/srv",
            "--no-color",
            "--debug",
            "apply",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("site.yml")));
        assert_eq!(cli.project, Some(PathBuf::from("/srv")));
        assert!(cli.no_color);
        assert!(cli.debug);
        assert!(matches!(cli.command, Some(Commands::Apply(_))));
    }

    #[test]
    fn apply_args_parse() {
        let cli = Cli::try_parse_from([
            "converge",
            "apply",
            "--var",
            "llvm_dir=/opt/llvm",
            "--var",
            "flags=-O2 -g=3",
            "--report",
            "run.json",
            "--time-limit",
            "600",
            "-q",
        ])
        .unwrap();

        let Some(Commands::Apply(args)) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(
            args.vars,
            vec![
                ("llvm_dir".to_string(), "/opt/llvm".to_string()),
                ("flags".to_string(), "-O2 -g=3".to_string()),
            ]
        );
        assert_eq!(args.report, Some(PathBuf::from("run.json")));
        assert_eq!(args.time_limit, Some(600));
        assert!(cli.quiet);
    }

    #[test]
    fn var_requires_key_value() {
        assert!(Cli::try_parse_from(["converge", "apply", "--var", "nokey"]).is_err());
        assert!(Cli::try_parse_from(["converge", "apply", "--var", "=x"]).is_err());
    }
}
