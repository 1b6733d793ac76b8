use std::path::PathBuf;

use anyhow::{Context, Result};

use scheduler::{ArgStyle, Gateway, Invocation, Output, QueueState, SchedulerCommands, ShellGateway};
use util::{HashMap, HashSet, Hasher, IdVec};

use crate::job::{Job, JobError, JobId, JobSpec, JobStatus};
use crate::template::{TemplateResolver, DEFAULT_MAX_ROUNDS};
use crate::{Arguments, PipelineLog};

/// Default number of times a submission is tried before giving up.
pub const DEFAULT_SUBMIT_ATTEMPTS: u32 = 3;

/// Totals reported by [`Pipeline::checkjobs`]. Always sums to the number of jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed
    }

    /// True once nothing is queued or running.
    pub fn is_finished(&self) -> bool {
        self.queued == 0 && self.running == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Queue listing failed: {0}")]
    QueueListing(String),
}

/// An ordered set of jobs sharing one argument context, submitted to the scheduler.
///
/// Jobs are only ever appended, so a [`JobId`] is both the job's creation order and
/// its position in saved state.
pub struct Pipeline {
    pub(crate) name: String,
    pub(crate) style: ArgStyle,
    pub(crate) arguments: Arguments,
    pub(crate) jobs: IdVec<JobId, Job>,
    pub(crate) log: PipelineLog,
    abort_on_error: bool,
    gateway: Box<dyn Gateway>,
    commands: SchedulerCommands,
    max_template_rounds: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("style", &self.style)
            .field("jobs", &self.jobs.len())
            .field("log", &self.log.path())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a new, empty pipeline that talks to the real scheduler tools.
    pub fn new(name: impl Into<String>, join_command_arguments: bool, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            style: ArgStyle::from_join_flag(join_command_arguments),
            arguments,
            jobs: IdVec::with_capacity(16),
            log: PipelineLog::default(),
            abort_on_error: true,
            gateway: Box::new(ShellGateway::new()),
            commands: SchedulerCommands::default(),
            max_template_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Replace the scheduler gateway (e.g. with a test double).
    pub fn with_gateway(mut self, gateway: Box<dyn Gateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Use different scheduler tool names.
    pub fn with_commands(mut self, commands: SchedulerCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Whether an error escaping [`Pipeline::scoped`] cancels every job. Defaults to true.
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    pub fn with_max_template_rounds(mut self, rounds: usize) -> Self {
        self.max_template_rounds = rounds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joins_command_arguments(&self) -> bool {
        self.style.joins()
    }

    /// The current shared context, including every override folded in so far.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Panics if `id` doesn't belong to this pipeline; see [`Pipeline::try_job`].
    pub fn job(&self, id: JobId) -> &Job {
        self.jobs.get(id)
    }

    pub fn try_job(&self, id: JobId) -> Option<&Job> {
        self.jobs.try_get(id)
    }

    /// Jobs in creation order.
    pub fn jobs(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter_enumerated()
    }

    /// First job with the given name.
    pub fn find_job(&self, name: &str) -> Option<JobId> {
        self.jobs
            .iter_enumerated()
            .find(|(_, job)| job.name == name)
            .map(|(id, _)| id)
    }

    pub fn log(&mut self) -> &mut PipelineLog {
        &mut self.log
    }

    /// Resolve `template` against the pipeline's context.
    pub fn resolve(&self, template: &str) -> Result<String> {
        let resolved = TemplateResolver::new(&self.arguments)
            .with_max_rounds(self.max_template_rounds)
            .resolve(template)?;
        Ok(resolved)
    }

    /// Send the pipeline log to the file named by `template` (resolved against the context).
    pub fn log_to_file(&mut self, template: &str, create_parent_dirs: bool) -> Result<PathBuf> {
        let path = PathBuf::from(self.resolve(template)?);
        self.log.open(&path, create_parent_dirs)?;
        Ok(path)
    }

    /// Run `command` (resolved against the context) through the local shell.
    pub fn run_local(&mut self, command: &str) -> Result<Output> {
        let command = self.resolve(command)?;
        self.log.info(format_args!("local: {command}"));
        let output = scheduler::run_shell(&command)?;
        Ok(output)
    }
}

// JOB CREATION ////////////////
impl Pipeline {
    /// Add a job to the end of the pipeline.
    ///
    /// Local arguments from the [`JobSpec`] are merged into the pipeline context *permanently*;
    /// later jobs see them as defaults. Directories left unset come from the
    /// merged context's `workdir`/`outdir`/`errdir` keys.
    pub fn create_job(&mut self, spec: JobSpec) -> Result<JobId> {
        for &dep in spec.dependencies.iter().chain(&spec.failure_dependencies) {
            if self.jobs.try_get(dep).is_none() {
                return Err(JobError::UnknownJob(dep).into());
            }
        }
        self.arguments = self.arguments.merge(spec.arguments.as_ref());
        let job = Job::new(spec, self.arguments.clone());
        log::debug!("creating job {:?} in pipeline {:?}", job.name, self.name);
        Ok(self.jobs.push(job))
    }
}

// SUBMISSION AND CONTROL ////////////////
impl Pipeline {
    /// Submit `id` to start immediately, trying up to three times.
    pub fn submit(&mut self, id: JobId, command: &str) -> Result<&Job> {
        self.submit_with(id, command, false, DEFAULT_SUBMIT_ATTEMPTS)
    }

    /// Submit `id` on hold; it won't start until [`Pipeline::release`] is called.
    pub fn submit_held(&mut self, id: JobId, command: &str) -> Result<&Job> {
        self.submit_with(id, command, true, DEFAULT_SUBMIT_ATTEMPTS)
    }

    /// Resolve `command` and hand it to the submit tool, retrying up to `max_attempts` times.
    ///
    /// An attempt succeeds when the tool writes nothing to stderr and prints a job name.
    /// Every dependency must already have a scheduler job id.
    pub fn submit_with(
        &mut self,
        id: JobId,
        command: &str,
        hold: bool,
        max_attempts: u32,
    ) -> Result<&Job> {
        let job = self.jobs.try_get(id).ok_or(JobError::UnknownJob(id))?;
        let job_name = job.name.clone();
        let submission = job
            .prepare_submission(command, hold, &self.jobs, self.style, self.max_template_rounds)
            .with_context(|| format!("while preparing job \"{job_name}\" for submission"))?;

        if !submission.dependency_ids.is_empty() {
            self.log.info(format_args!("dep: {:?}", submission.dependency_ids));
        }
        if !submission.failure_dependency_ids.is_empty() {
            self.log
                .info(format_args!("notok dep: {:?}", submission.failure_dependency_ids));
        }

        let invocation = self.commands.submission(submission.args.clone(), self.style);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            self.log
                .info(format_args!("msub attempt {attempt}: {:?}", submission.args));
            let output = self.exec_submit(&invocation, &submission.script)?;
            if !output.succeeded() {
                last_error = output.stderr_lossy();
                self.log.error(format_args!(
                    "msub attempt {attempt} for \"{job_name}\" failed: {}",
                    last_error.trim()
                ));
                continue;
            }
            let moab_job_name = output.stdout_lossy();
            let moab_job_name = moab_job_name.trim();
            if moab_job_name.is_empty() {
                last_error = "submit tool printed no job name".to_owned();
                self.log.error(format_args!(
                    "msub attempt {attempt} for \"{job_name}\" failed: {last_error}"
                ));
                continue;
            }

            let job = self.jobs.get_mut(id);
            job.mark_submitted(moab_job_name, submission);
            let job_id = job.moab_job_id.clone().unwrap_or_default();
            self.log.info(format_args!("Running {job_id}"));
            return Ok(self.jobs.get(id));
        }

        Err(JobError::Submission {
            job: job_name,
            attempts: max_attempts,
            stderr: last_error.trim().to_owned(),
        }
        .into())
    }

    /// Release holds on a submitted job. Failures are logged, not returned;
    /// the job falls back to `Created`. Returns whether the release worked.
    pub fn release(&mut self, id: JobId) -> bool {
        let Some(moab_job_id) = self.moab_job_id_or_log(id, "unhold") else {
            return false;
        };
        self.log.info(format_args!("unholding {moab_job_id}"));
        let invocation = self.commands.release(&moab_job_id, self.style);
        let ok = self.exec_control_logged(&invocation, "unholding", &moab_job_id);
        let job = self.jobs.get_mut(id);
        if ok {
            job.status = JobStatus::Running;
            self.log.info(format_args!("Unhold {moab_job_id}"));
        } else {
            job.status = JobStatus::Created;
        }
        ok
    }

    /// Cancel a submitted job. Success marks it `Completed`; failures are logged,
    /// not returned, and the job falls back to `Created`.
    pub fn cancel(&mut self, id: JobId) -> bool {
        let Some(moab_job_id) = self.moab_job_id_or_log(id, "cancel") else {
            return false;
        };
        self.log.info(format_args!("cancelling {moab_job_id}"));
        let invocation = self.commands.cancel(&moab_job_id, self.style);
        let ok = self.exec_control_logged(&invocation, "cancelling", &moab_job_id);
        let job = self.jobs.get_mut(id);
        if ok {
            job.status = JobStatus::Completed;
            self.log.info(format_args!("Cancelled {moab_job_id}"));
        } else {
            job.status = JobStatus::Created;
        }
        ok
    }

    /// Ask the scheduler whether `id` is still running.
    ///
    /// Jobs we believe are created or completed aren't queried. A reported state of
    /// `Completed` marks the job completed; output without a state counts as not running.
    pub fn is_running(&mut self, id: JobId) -> Result<bool> {
        let job = self.jobs.try_get(id).ok_or(JobError::UnknownJob(id))?;
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        let moab_job_id = job
            .moab_job_id
            .clone()
            .ok_or_else(|| JobError::NotSubmitted(job.name.clone()))?;
        let invocation = self.commands.status(&moab_job_id, self.style);
        let output = self.exec_control(&invocation)?;
        let stdout = output.stdout_lossy();
        match scheduler::parse_job_state(&stdout) {
            Some(scheduler::COMPLETED_STATE) => {
                self.jobs.get_mut(id).status = JobStatus::Completed;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn moab_job_id_or_log(&mut self, id: JobId, action: &str) -> Option<String> {
        let Some(job) = self.jobs.try_get(id) else {
            self.log
                .error(format_args!("Cannot {action} job {id}: not part of this pipeline"));
            return None;
        };
        match &job.moab_job_id {
            Some(moab_job_id) => Some(moab_job_id.clone()),
            None => {
                let name = job.name.clone();
                self.log
                    .error(format_args!("Cannot {action} job \"{name}\": it was never submitted"));
                None
            }
        }
    }

    /// Run a control command, logging its failure. True on success.
    fn exec_control_logged(&mut self, invocation: &Invocation, action: &str, moab_job_id: &str) -> bool {
        match self.exec_control(invocation) {
            Ok(output) if output.succeeded() => true,
            Ok(output) => {
                self.log.error(format_args!(
                    "Error {action} job {moab_job_id}: {}",
                    output.stderr_lossy().trim()
                ));
                false
            }
            Err(e) => {
                self.log
                    .error(format_args!("Error {action} job {moab_job_id}: {e:#}"));
                false
            }
        }
    }
}

// RECONCILIATION ////////////////
impl Pipeline {
    /// Count this pipeline's jobs by their state in the scheduler's queue listing.
    ///
    /// The scheduler stops listing jobs once they finish, so any job missing from the
    /// listing (including jobs never submitted) counts as completed.
    pub fn checkjobs(&mut self) -> Result<JobCounts> {
        let invocation = self.commands.queue_listing(self.style);
        let output = self.exec_listing(&invocation)?;
        if output.stdout.is_empty() && !output.succeeded() {
            return Err(PipelineError::QueueListing(output.stderr_lossy().trim().to_owned()).into());
        }
        let listing = output.stdout_lossy();

        let mut owned: HashMap<&str, JobId> =
            HashMap::with_capacity_and_hasher(self.jobs.len(), Hasher::default());
        for (id, job) in self.jobs.iter_enumerated() {
            if let Some(moab_job_id) = &job.moab_job_id {
                owned.insert(moab_job_id.as_str(), id);
            }
        }

        let mut counts = JobCounts::default();
        let mut seen: HashSet<JobId> = HashSet::with_capacity_and_hasher(owned.len(), Hasher::default());
        for entry in scheduler::parse_queue_listing(&listing) {
            let Some(&id) = owned.get(entry.job_id) else {
                continue;
            };
            // a job listed twice still only counts once:
            if !seen.insert(id) {
                continue;
            }
            match entry.state {
                QueueState::Queued => counts.queued += 1,
                QueueState::Running => counts.running += 1,
                QueueState::Other => counts.completed += 1,
            }
        }
        counts.completed += self.jobs.len() - seen.len();

        log::info!(
            "pipeline {:?}: {} queued, {} running, {} completed",
            self.name,
            counts.queued,
            counts.running,
            counts.completed
        );
        Ok(counts)
    }

    /// Cancel every job, whatever we believe its status is. Best effort: failures
    /// are logged and the sweep continues. Every job ends up `Completed` locally.
    pub fn abort(&mut self) {
        let ids: Vec<JobId> = self.jobs.ids().collect();
        for id in ids {
            let job = self.jobs.get(id);
            let Some(moab_job_id) = job.moab_job_id.clone() else {
                log::debug!("job {:?} was never submitted; nothing to cancel", job.name);
                self.jobs.get_mut(id).status = JobStatus::Completed;
                continue;
            };
            let invocation = self.commands.cancel(&moab_job_id, self.style);
            match self.exec_control(&invocation) {
                Ok(output) => {
                    if !output.stdout.is_empty() {
                        self.log
                            .info(format_args!("abort says: {}", output.stdout_lossy().trim()));
                    }
                    if !output.stderr.is_empty() {
                        self.log
                            .error(format_args!("abort failed: {}", output.stderr_lossy().trim()));
                    }
                }
                Err(e) => self.log.error(format_args!("abort failed: {e:#}")),
            }
            self.jobs.get_mut(id).status = JobStatus::Completed;
        }
    }
}

// SCOPED LIFECYCLE ////////////////
impl Pipeline {
    /// Run `f` against this pipeline, then close the log no matter how `f` exits.
    ///
    /// If `f` returns an error (or panics) and abort-on-error is set, every job is
    /// cancelled first. The error is returned unchanged.
    pub fn scoped<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Pipeline) -> Result<T>,
    {
        let mut guard = ScopeGuard {
            pipeline: self,
            error: None,
        };
        let result = f(&mut *guard.pipeline);
        if let Err(e) = &result {
            guard.error = Some(format!("{e:#}"));
        }
        result
    }

    fn finish_scope(&mut self, error: Option<&str>) {
        if let Some(error) = error {
            self.log.error(format_args!("Unhandled error in pipeline scope: {error}"));
            if self.abort_on_error {
                self.log.error("Aborting all the jobs (exception raised)");
                self.abort();
            }
        }
        self.log.close();
    }
}

/// Runs the scope finalizer on every exit path, including unwinding.
struct ScopeGuard<'p> {
    pipeline: &'p mut Pipeline,
    error: Option<String>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && self.error.is_none() {
            self.error = Some("panic".to_owned());
        }
        let error = self.error.take();
        self.pipeline.finish_scope(error.as_deref());
    }
}

// GATEWAY ACCESS ////////////////
impl Pipeline {
    fn exec_submit(&mut self, invocation: &Invocation, script: &str) -> Result<Output> {
        self.log.info(format_args!("{invocation} / {script}"));
        let output = self
            .gateway
            .submit(invocation, script)
            .context("while submitting job")?;
        Ok(output)
    }

    fn exec_control(&mut self, invocation: &Invocation) -> Result<Output> {
        self.log.info(format_args!("{invocation} / None"));
        Ok(self.gateway.control(invocation)?)
    }

    fn exec_listing(&mut self, invocation: &Invocation) -> Result<Output> {
        self.log.info(format_args!("{invocation} / None"));
        let output = self
            .gateway
            .list_queue(invocation)
            .context("while listing the scheduler queue")?;
        Ok(output)
    }
}
