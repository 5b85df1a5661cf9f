//! Step-runner boundary for Sluice.
//!
//! The engine hands each job's opaque step description to a [`StepRunner`]
//! and receives a terminal status, a duration and an opaque output payload.

pub mod runner;
pub mod shell;

pub use runner::{StepOutcome, StepRequest, StepRunner, StepStatus};
pub use shell::{ShellRunner, ShellStep};
