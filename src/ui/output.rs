//! Output mode.

use std::str::FromStr;

/// Output verbosity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Also show each step as it starts.
    Verbose,
    /// Show every step outcome and the summary.
    #[default]
    Normal,
    /// Show failures and the summary only.
    Quiet,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verbose" => Ok(Self::Verbose),
            "normal" => Ok(Self::Normal),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("unknown output mode: {}", s)),
        }
    }
}

impl OutputMode {
    /// Pick a mode from the `--verbose`/`--quiet` flags. Quiet wins.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    /// Whether steps are announced as they start.
    pub fn shows_start(&self) -> bool {
        matches!(self, Self::Verbose)
    }

    /// Whether skipped, applied and not-reached steps are shown.
    pub fn shows_step_outcomes(&self) -> bool {
        !matches!(self, Self::Quiet)
    }
}
