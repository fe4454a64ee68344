//! Run reports.
//!
//! Converge keeps no state between runs; guards look at the machine
//! itself. What it can record is a report of a single run.

pub mod report;

pub use report::{RunRecord, RunStatus, StepRecord};
