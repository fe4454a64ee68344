//! Notification graph validation.
//!
//! Notifications bypass guards, so any cycle of notification edges would
//! re-run the same actions forever. Targets are resolved here rather than at
//! registration time because a step may notify one declared after it.

use std::collections::HashMap;

use crate::error::{ConvergeError, Result};

use super::step::Step;

/// Check that every notification target exists and that no cycle exists.
pub fn validate_notifications(steps: &[Step]) -> Result<()> {
    let known: HashMap<&str, &Step> = steps.iter().map(|s| (s.name(), s)).collect();

    for step in steps {
        for notification in step.notifications() {
            if !known.contains_key(notification.target.as_str()) {
                return Err(ConvergeError::UnknownNotifyTarget {
                    step: step.name().to_string(),
                    target: notification.target.clone(),
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(steps, &known) {
        return Err(ConvergeError::NotificationCycle {
            cycle: cycle.join(" -> "),
        });
    }

    Ok(())
}

/// Find a notification cycle, returning its path if one exists.
fn find_cycle(steps: &[Step], known: &HashMap<&str, &Step>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        Visiting,
        Visited,
    }

    fn dfs<'a>(
        node: &'a str,
        known: &HashMap<&'a str, &'a Step>,
        state: &mut HashMap<&'a str, State>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        state.insert(node, State::Visiting);
        path.push(node);

        if let Some(&step) = known.get(node) {
            for notification in step.notifications() {
                let target = notification.target.as_str();
                match state.get(target) {
                    Some(State::Visiting) => {
                        let start = path.iter().position(|s| *s == target).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(target.to_string());
                        return Some(cycle);
                    }
                    Some(State::Unvisited) => {
                        if let Some(cycle) = dfs(target, known, state, path) {
                            return Some(cycle);
                        }
                    }
                    Some(State::Visited) | None => {}
                }
            }
        }

        path.pop();
        state.insert(node, State::Visited);
        None
    }

    let mut state: HashMap<&str, State> =
        known.keys().map(|name| (*name, State::Unvisited)).collect();
    let mut path = Vec::new();

    for step in steps {
        if state.get(step.name()) == Some(&State::Unvisited) {
            if let Some(cycle) = dfs(step.name(), known, &mut state, &mut path) {
                return Some(cycle);
            }
        }
    }

    None
}
