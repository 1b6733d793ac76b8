//! Everything that talks to the external scheduler goes through this crate.
//!
//! The scheduler is only reachable through its command-line tools
//! (submit, job control, job status, and queue listing), so the [`Gateway`]
//! trait models exactly those calls. [`ShellGateway`] runs the real tools;
//! tests substitute their own implementation.

/// Tool names and argument styles
mod commands;
pub use commands::{ArgStyle, Invocation, SchedulerCommands};

/// The gateway trait and its output type
mod gateway;
pub use gateway::{Gateway, Output};

/// Gateway implementation that spawns processes
mod shell;
pub use shell::{run_shell, ShellGateway};

/// Parsing `qstat`-style queue listings
mod queue;
pub use queue::{base_job_id, parse_queue_listing, QueueEntry, QueueState};

/// Parsing `checkjob`-style status output
mod checkjob;
pub use checkjob::parse_job_state;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to start scheduler command `{0}`")]
    Spawn(String, #[source] std::io::Error),
    #[error("Failed to communicate with scheduler command `{0}`")]
    Communicate(String, #[source] std::io::Error),
}

/// State reported by the status tool for a job that has finished.
pub const COMPLETED_STATE: &str = "Completed";
