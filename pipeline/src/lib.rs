//! The job and pipeline model.
//!
//! A [`Pipeline`] owns an append-only list of [`Job`]s and a shared [`Arguments`]
//! context. Jobs are submitted to the scheduler in dependency order; the pipeline
//! can then be saved, reloaded in another process, polled, or aborted.

/// Argument contexts
pub mod arguments;
pub use arguments::{Arguments, Value};

/// Placeholder expansion
mod template;
pub use template::{TemplateError, TemplateResolver, DEFAULT_MAX_ROUNDS, JOB_NAME_KEY};

/// Single jobs and their dependency edges
mod job;
pub use job::{Job, JobError, JobId, JobSpec, JobStatus, Submission};

/// The pipeline's own log file
mod log_file;
pub use log_file::{LogError, PipelineLog};

mod pipeline;
pub use pipeline::{JobCounts, Pipeline, PipelineError, DEFAULT_SUBMIT_ATTEMPTS};

/// Persisted state
mod state;
pub use state::{StateError, STATE_FILE_NAME};

/// Polling until a pipeline finishes
mod wait;
pub use wait::wait_for_pipeline;
