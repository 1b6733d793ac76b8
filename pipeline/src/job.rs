use std::fmt;

use serde::{Deserialize, Serialize};

use scheduler::ArgStyle;
use util::IdVec;

use crate::{Arguments, TemplateResolver};

util::typed_id!(
    /// Index of a job within its pipeline.
    JobId,
    u32
);

/// Lifecycle of a job as this process believes it to be.
///
/// Cancellation is terminal too and shares `Completed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    #[default]
    Created,
    Running,
    Completed,
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> u8 {
        match status {
            JobStatus::Created => 0,
            JobStatus::Running => 1,
            JobStatus::Completed => 2,
        }
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = String;
    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::Created),
            1 => Ok(Self::Running),
            2 => Ok(Self::Completed),
            x => Err(format!("invalid job status {x} (expected 0, 1 or 2)")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job \"{0}\" has already been submitted")]
    DoubleSubmission(String),
    #[error("Job \"{job}\" depends on \"{dependency}\", which has not been submitted yet")]
    DependencyNotSubmitted { job: String, dependency: String },
    #[error("Cannot start job \"{job}\" after {attempts} attempts: {stderr}")]
    Submission {
        job: String,
        attempts: u32,
        stderr: String,
    },
    #[error("Job \"{0}\" has no scheduler job id")]
    NotSubmitted(String),
    #[error("Unknown job {0}")]
    UnknownJob(JobId),
}

/// Options for [`crate::Pipeline::create_job`].
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub(crate) name: String,
    pub(crate) arguments: Option<Arguments>,
    pub(crate) dependencies: Vec<JobId>,
    pub(crate) failure_dependencies: Vec<JobId>,
    pub(crate) workdir: Option<String>,
    pub(crate) outdir: Option<String>,
    pub(crate) errdir: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
            dependencies: Vec::with_capacity(0),
            failure_dependencies: Vec::with_capacity(0),
            workdir: None,
            outdir: None,
            errdir: None,
        }
    }

    /// Local overrides, folded into the pipeline's context for this and all later jobs.
    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Start only after all of `jobs` finish successfully.
    pub fn after_ok(mut self, jobs: impl IntoIterator<Item = JobId>) -> Self {
        self.dependencies.extend(jobs);
        self
    }

    /// Start only after all of `jobs` fail.
    pub fn after_not_ok(mut self, jobs: impl IntoIterator<Item = JobId>) -> Self {
        self.failure_dependencies.extend(jobs);
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn outdir(mut self, dir: impl Into<String>) -> Self {
        self.outdir = Some(dir.into());
        self
    }

    pub fn errdir(mut self, dir: impl Into<String>) -> Self {
        self.errdir = Some(dir.into());
        self
    }
}

/// A single schedulable unit.
///
/// Jobs live in their pipeline's arena; dependency edges are ids into that arena.
#[derive(Debug, Clone)]
pub struct Job {
    pub(crate) name: String,
    /// Scheduler-argument templates
    pub(crate) scheduler_args: Vec<String>,
    /// Jobs that must succeed before this one starts (`afterok`)
    pub(crate) dependencies: Vec<JobId>,
    /// Jobs that must fail before this one starts (`afternotok`)
    pub(crate) failure_dependencies: Vec<JobId>,
    /// Directory templates until submission, resolved paths after.
    pub(crate) workdir: String,
    pub(crate) outdir: String,
    pub(crate) errdir: String,
    pub(crate) arguments: Arguments,
    pub(crate) moab_job_name: Option<String>,
    pub(crate) moab_job_id: Option<String>,
    pub(crate) status: JobStatus,
    /// Resolved command text actually submitted
    pub(crate) command: Option<String>,
}

/// Everything needed to hand one job to the submit tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub script: String,
    pub args: Vec<String>,
    pub workdir: String,
    pub outdir: String,
    pub errdir: String,
    pub dependency_ids: Vec<String>,
    pub failure_dependency_ids: Vec<String>,
}

impl Job {
    pub(crate) fn new(spec: JobSpec, arguments: Arguments) -> Self {
        let workdir = spec
            .workdir
            .unwrap_or_else(|| arguments.dir_or_default(crate::arguments::WORKDIR_KEY));
        let outdir = spec
            .outdir
            .unwrap_or_else(|| arguments.dir_or_default(crate::arguments::OUTDIR_KEY));
        let errdir = spec
            .errdir
            .unwrap_or_else(|| arguments.dir_or_default(crate::arguments::ERRDIR_KEY));
        Self {
            name: spec.name,
            scheduler_args: arguments.scheduler_args(),
            dependencies: spec.dependencies,
            failure_dependencies: spec.failure_dependencies,
            workdir,
            outdir,
            errdir,
            arguments,
            moab_job_name: None,
            moab_job_id: None,
            status: JobStatus::Created,
            command: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Full job name as printed by the submit tool, e.g. `"1234.master"`.
    pub fn moab_job_name(&self) -> Option<&str> {
        self.moab_job_name.as_deref()
    }

    /// Scheduler job id, present once submitted.
    pub fn moab_job_id(&self) -> Option<&str> {
        self.moab_job_id.as_deref()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn dependencies(&self) -> &[JobId] {
        &self.dependencies
    }

    pub fn failure_dependencies(&self) -> &[JobId] {
        &self.failure_dependencies
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    pub fn outdir(&self) -> &str {
        &self.outdir
    }

    pub fn errdir(&self) -> &str {
        &self.errdir
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn scheduler_args(&self) -> &[String] {
        &self.scheduler_args
    }

    /// Check preconditions, resolve every template, and build the submit arguments.
    /// Does not touch the scheduler or change any state.
    pub fn prepare_submission(
        &self,
        command: &str,
        hold: bool,
        jobs: &IdVec<JobId, Job>,
        style: ArgStyle,
        max_rounds: usize,
    ) -> anyhow::Result<Submission> {
        if self.status != JobStatus::Created {
            return Err(JobError::DoubleSubmission(self.name.clone()).into());
        }
        let dependency_ids = self.submitted_ids(&self.dependencies, jobs)?;
        let failure_dependency_ids = self.submitted_ids(&self.failure_dependencies, jobs)?;

        let resolver = TemplateResolver::new(&self.arguments)
            .with_job_name(&self.name)
            .with_max_rounds(max_rounds);

        let script = resolver.resolve(command)?;
        let mut args = resolver.resolve_all(&self.scheduler_args)?;

        if !dependency_ids.is_empty() {
            let clause = format!("depend=afterok:{}", dependency_ids.join(":"));
            style.push_option(&mut args, "-l", &clause);
        }
        if !failure_dependency_ids.is_empty() {
            let clause = format!("depend=afternotok:{}", failure_dependency_ids.join(":"));
            style.push_option(&mut args, "-l", &clause);
        }

        let workdir = resolver.resolve(&self.workdir)?;
        let errdir = resolver.resolve(&self.errdir)?;
        let outdir = resolver.resolve(&self.outdir)?;
        style.push_quoted_option(&mut args, "-d", &workdir);
        style.push_quoted_option(&mut args, "-e", &errdir);
        style.push_quoted_option(&mut args, "-o", &outdir);

        if hold {
            args.push("-h".to_owned());
        }

        Ok(Submission {
            script,
            args,
            workdir,
            outdir,
            errdir,
            dependency_ids,
            failure_dependency_ids,
        })
    }

    /// Record a successful submission.
    pub(crate) fn mark_submitted(&mut self, moab_job_name: &str, submission: Submission) {
        let moab_job_id = scheduler::base_job_id(moab_job_name).to_owned();
        self.moab_job_name = Some(moab_job_name.to_owned());
        self.moab_job_id = Some(moab_job_id);
        self.status = JobStatus::Running;
        self.command = Some(submission.script);
        self.workdir = submission.workdir;
        self.outdir = submission.outdir;
        self.errdir = submission.errdir;
    }

    fn submitted_ids(&self, deps: &[JobId], jobs: &IdVec<JobId, Job>) -> Result<Vec<String>, JobError> {
        deps.iter()
            .map(|&dep| {
                let dep = jobs.try_get(dep).ok_or(JobError::UnknownJob(dep))?;
                dep.moab_job_id
                    .clone()
                    .ok_or_else(|| JobError::DependencyNotSubmitted {
                        job: self.name.clone(),
                        dependency: dep.name.clone(),
                    })
            })
            .collect()
    }
}
