//! Step progress lines and the run summary.

use std::time::Duration;

use crate::engine::{RunProgress, RunResult, StepOutcome, Trigger};

use super::{OutputMode, Theme};

/// Formats engine progress events for the terminal.
#[derive(Debug, Clone)]
pub struct RunReporter {
    theme: Theme,
    mode: OutputMode,
}

impl RunReporter {
    pub fn new(theme: Theme, mode: OutputMode) -> Self {
        Self { theme, mode }
    }

    /// Banner printed before the run.
    pub fn header(&self, title: &str) -> String {
        self.theme.format_header(&format!("Converging {}", title))
    }

    /// The line to print for an event, if the output mode shows it.
    pub fn line(&self, event: &RunProgress<'_>) -> Option<String> {
        match event {
            RunProgress::StepStarting { name, trigger } => self
                .mode
                .shows_start()
                .then(|| self.theme.format_not_reached(&format!("{}{}", name, via(trigger)))),
            RunProgress::StepFinished {
                name,
                trigger,
                outcome,
            } => {
                if !outcome.is_failed() && !self.mode.shows_step_outcomes() {
                    return None;
                }
                Some(self.outcome_line(name, trigger, outcome))
            }
            RunProgress::StepNotReached { name } => self
                .mode
                .shows_step_outcomes()
                .then(|| self.outcome_line(name, &Trigger::Pass, &StepOutcome::NotReached)),
        }
    }

    /// Format one step outcome.
    pub fn outcome_line(&self, name: &str, trigger: &Trigger, outcome: &StepOutcome) -> String {
        let label = format!("{} {}{}", name, outcome.label(), via(trigger));
        match outcome {
            StepOutcome::Applied => self.theme.format_applied(&label),
            StepOutcome::Skipped => self.theme.format_skipped(&label),
            StepOutcome::Failed(failure) => self
                .theme
                .format_failed(&format!("{}: {}", label, failure)),
            StepOutcome::NotReached => self.theme.format_not_reached(&label),
        }
    }

    /// Closing summary for a run.
    pub fn summary(&self, result: &RunResult) -> String {
        let counts = result.counts();
        let mut parts = vec![
            format!("{} applied", counts.applied),
            format!("{} skipped", counts.skipped),
        ];
        if counts.failed > 0 {
            parts.push(format!("{} failed", counts.failed));
        }
        if counts.not_reached > 0 {
            parts.push(format!("{} not reached", counts.not_reached));
        }
        let tally = format!(
            "{} {}",
            parts.join(", "),
            self.theme
                .dim
                .apply_to(format!("({})", format_duration(result.duration)))
        );

        if result.cancelled {
            self.theme.format_warning(&format!("Cancelled: {}", tally))
        } else if let Some((step, _)) = result.failure() {
            self.theme
                .format_failed(&format!("Failed at '{}': {}", step, tally))
        } else {
            self.theme.format_applied(&format!("Converged: {}", tally))
        }
    }
}

fn via(trigger: &Trigger) -> String {
    match trigger {
        Trigger::Pass => String::new(),
        Trigger::Immediate { from } | Trigger::Delayed { from } => {
            format!(" (notified by {})", from)
        }
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = secs / 60.0;
        format!("{:.1}m", mins)
    }
}
