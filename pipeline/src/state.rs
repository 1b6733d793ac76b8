//! Saving a pipeline to disk and loading it back in a later process.
//!
//! The document is a JSON object with sorted keys and four-space indentation, so
//! successive saves diff cleanly. Dependency edges can't be stored as references,
//! so each job lists the scheduler ids of its dependencies; on load, every job is
//! rebuilt first and the ids are linked back to jobs afterwards.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use util::{HashMap, Hasher, IdVec};

use crate::job::{Job, JobId, JobStatus};
use crate::{Arguments, Pipeline};

/// File read when `load_state` is pointed at a directory.
pub const STATE_FILE_NAME: &str = "pipeline.json";

const INDENT: &[u8] = b"    ";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid pipeline state document: {0}")]
    Corrupt(String),
    #[error("Job \"{job}\" depends on job id \"{dependency}\", which is not in the document")]
    UnknownDependency { job: String, dependency: String },
    #[error("Job id \"{0}\" appears more than once in the document")]
    DuplicateJobId(String),
    #[error("Cannot save dependency of job \"{job}\" on \"{dependency}\": it was never submitted")]
    UnsubmittedDependency { job: String, dependency: String },
}

// NB field order is the serialized key order, and must stay sorted.

#[derive(Debug, Serialize, Deserialize)]
struct PipelineRecord {
    arguments: Arguments,
    jobs: Vec<JobRecord>,
    join_command_arguments: bool,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    command: Option<String>,
    #[serde(default)]
    dependences: Vec<String>,
    errdir: String,
    moab_job_id: Option<String>,
    moab_job_name: Option<String>,
    name: String,
    #[serde(default)]
    notokdependences: Vec<String>,
    outdir: String,
    status: JobStatus,
    workdir: String,
}

impl Pipeline {
    /// Write the pipeline to the path named by `template` (resolved against the context).
    /// Returns the resolved path.
    pub fn save_state(&self, template: &str) -> Result<PathBuf> {
        let path = PathBuf::from(self.resolve(template)?);
        let record = self.to_record()?;

        let file = File::create(&path).with_context(|| format!("creating state file {path:?}"))?;
        let mut writer = BufWriter::new(file);
        write_record(&record, &mut writer)
            .and_then(|_| writer.flush().map_err(serde_json::Error::io))
            .with_context(|| format!("writing state file {path:?}"))?;

        log::info!("saved pipeline {:?} with {} jobs to {path:?}", self.name, self.jobs.len());
        Ok(path)
    }

    /// The state document as a string, exactly as `save_state` would write it.
    pub fn state_to_string(&self) -> Result<String> {
        let record = self.to_record()?;
        let mut buf = Vec::with_capacity(256 + 256 * self.jobs.len());
        write_record(&record, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Rebuild a pipeline from a state file, or from `<dir>/pipeline.json` if `path` is a directory.
    ///
    /// The loaded pipeline uses the real scheduler tools; swap them with `with_gateway`.
    pub fn load_state<P: AsRef<Path>>(path: P) -> Result<Pipeline> {
        let mut path = path.as_ref().to_path_buf();
        if path.is_dir() {
            path.push(STATE_FILE_NAME);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading state file {path:?}"))?;
        let pipeline = Self::state_from_str(&text)
            .with_context(|| format!("while loading pipeline state from {path:?}"))?;
        log::info!(
            "loaded pipeline {:?} with {} jobs from {path:?}",
            pipeline.name,
            pipeline.jobs.len()
        );
        Ok(pipeline)
    }

    /// Rebuild a pipeline from the text of a state document.
    pub fn state_from_str(text: &str) -> Result<Pipeline> {
        let record: PipelineRecord =
            serde_json::from_str(text).map_err(|e| StateError::Corrupt(e.to_string()))?;
        Self::from_record(record)
    }

    fn to_record(&self) -> Result<PipelineRecord, StateError> {
        let jobs = self
            .jobs
            .iter()
            .map(|job| {
                Ok(JobRecord {
                    command: job.command.clone(),
                    dependences: self.dependency_ids(job, &job.dependencies)?,
                    errdir: job.errdir.clone(),
                    moab_job_id: job.moab_job_id.clone(),
                    moab_job_name: job.moab_job_name.clone(),
                    name: job.name.clone(),
                    notokdependences: self.dependency_ids(job, &job.failure_dependencies)?,
                    outdir: job.outdir.clone(),
                    status: job.status,
                    workdir: job.workdir.clone(),
                })
            })
            .collect::<Result<_, StateError>>()?;

        Ok(PipelineRecord {
            arguments: self.arguments.clone(),
            jobs,
            join_command_arguments: self.style.joins(),
            name: self.name.clone(),
        })
    }

    fn dependency_ids(&self, job: &Job, deps: &[JobId]) -> Result<Vec<String>, StateError> {
        deps.iter()
            .map(|&dep| {
                let dep = self.jobs.get(dep);
                dep.moab_job_id
                    .clone()
                    .ok_or_else(|| StateError::UnsubmittedDependency {
                        job: job.name.clone(),
                        dependency: dep.name.clone(),
                    })
            })
            .collect()
    }

    fn from_record(record: PipelineRecord) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(record.name, record.join_command_arguments, record.arguments);

        // first pass: which job owns each scheduler id.
        let mut by_moab_id: HashMap<String, JobId> =
            HashMap::with_capacity_and_hasher(record.jobs.len(), Hasher::default());
        for (idx, job) in record.jobs.iter().enumerate() {
            if job.status == JobStatus::Running && job.moab_job_id.is_none() {
                return Err(StateError::Corrupt(format!(
                    "job \"{}\" is running but has no scheduler job id",
                    job.name
                ))
                .into());
            }
            if let Some(moab_job_id) = &job.moab_job_id {
                if by_moab_id.insert(moab_job_id.clone(), idx.into()).is_some() {
                    return Err(StateError::DuplicateJobId(moab_job_id.clone()).into());
                }
            }
        }

        // second pass: rebuild jobs with their edges linked.
        let link = |job: &JobRecord, ids: &[String]| -> Result<Vec<JobId>, StateError> {
            ids.iter()
                .map(|id| {
                    by_moab_id
                        .get(id)
                        .copied()
                        .ok_or_else(|| StateError::UnknownDependency {
                            job: job.name.clone(),
                            dependency: id.clone(),
                        })
                })
                .collect()
        };

        let scheduler_args = pipeline.arguments.scheduler_args();
        let mut jobs = IdVec::with_capacity(record.jobs.len());
        for job in &record.jobs {
            let dependencies = link(job, &job.dependences)?;
            let failure_dependencies = link(job, &job.notokdependences)?;
            jobs.push(Job {
                name: job.name.clone(),
                scheduler_args: scheduler_args.clone(),
                dependencies,
                failure_dependencies,
                workdir: job.workdir.clone(),
                outdir: job.outdir.clone(),
                errdir: job.errdir.clone(),
                arguments: pipeline.arguments.clone(),
                moab_job_name: job.moab_job_name.clone(),
                moab_job_id: job.moab_job_id.clone(),
                status: job.status,
                command: job.command.clone(),
            });
        }
        pipeline.jobs = jobs;
        Ok(pipeline)
    }
}

fn write_record<W: Write>(record: &PipelineRecord, writer: W) -> serde_json::Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
    record.serialize(&mut ser)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    const STATE: &str = r#"{
    "arguments": {
        "basedir": "/home/me/run",
        "msub_arguments": [
            "-N {job_name}"
        ],
        "outdir": "{basedir}"
    },
    "jobs": [
        {
            "command": "echo first",
            "dependences": [],
            "errdir": "/home/me/run",
            "moab_job_id": "100",
            "moab_job_name": "100.master",
            "name": "first",
            "notokdependences": [],
            "outdir": "/home/me/run",
            "status": 1,
            "workdir": "."
        },
        {
            "command": "echo second",
            "dependences": [
                "100"
            ],
            "errdir": ".",
            "moab_job_id": "101",
            "moab_job_name": "101.master",
            "name": "second",
            "notokdependences": [],
            "outdir": ".",
            "status": 2,
            "workdir": "."
        },
        {
            "command": null,
            "errdir": ".",
            "moab_job_id": null,
            "moab_job_name": null,
            "name": "third",
            "outdir": ".",
            "status": 0,
            "workdir": "."
        }
    ],
    "join_command_arguments": true,
    "name": "mypipeline"
}"#;

    #[test]
    fn test_load_links_dependencies() -> Result<()> {
        let pipeline = Pipeline::state_from_str(STATE)?;
        assert_eq!("mypipeline", pipeline.name());
        assert!(pipeline.joins_command_arguments());
        assert_eq!(3, pipeline.len());

        let second = pipeline.job(JobId::from(1));
        assert_eq!(JobStatus::Completed, second.status());
        assert_eq!(&[JobId::from(0)], second.dependencies());
        assert_eq!(vec!["-N {job_name}"], second.scheduler_args());

        let third = pipeline.job(JobId::from(2));
        assert_eq!(None, third.moab_job_id());
        assert!(third.dependencies().is_empty());
        assert!(third.failure_dependencies().is_empty());
        Ok(())
    }

    #[test]
    fn test_rewrite_is_stable() -> Result<()> {
        let pipeline = Pipeline::state_from_str(STATE)?;
        let written = pipeline.state_to_string()?;
        // the only difference from the input is that empty edge lists are always written:
        let reloaded = Pipeline::state_from_str(&written)?;
        assert_eq!(written, reloaded.state_to_string()?);
        assert!(written.starts_with("{\n    \"arguments\": {\n        \"basedir\""));
        Ok(())
    }

    /// Keys of every object, grouped by object, in the order they were written.
    fn key_groups(text: &str) -> Vec<Vec<String>> {
        let mut open: Vec<Vec<String>> = Vec::new();
        let mut groups = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some((key, _)) = line.strip_prefix('"').and_then(|l| l.split_once("\":")) {
                if let Some(keys) = open.last_mut() {
                    keys.push(key.to_owned());
                }
            }
            if line.ends_with('{') {
                open.push(Vec::new());
            } else if line.starts_with('}') {
                groups.extend(open.pop());
            }
        }
        groups
    }

    #[test]
    fn test_keys_are_sorted() -> Result<()> {
        let empty = Pipeline::new("x", true, Arguments::new()).state_to_string()?;
        assert_eq!(
            vec![vec!["arguments", "jobs", "join_command_arguments", "name"]],
            key_groups(&empty)
        );

        let written = Pipeline::state_from_str(STATE)?.state_to_string()?;
        let groups = key_groups(&written);
        // top level, arguments, and three jobs:
        assert_eq!(5, groups.len());
        for keys in groups {
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(sorted, keys);
        }
        Ok(())
    }

    #[test]
    fn test_running_job_without_id() {
        // "third" was never submitted:
        let text = STATE.replace("\"status\": 0", "\"status\": 1");
        assert_ne!(STATE, text);
        let err = Pipeline::state_from_str(&text).unwrap_err();
        assert!(matches!(err.downcast_ref::<StateError>(), Some(StateError::Corrupt(_))));
    }

    #[test]
    fn test_dangling_dependency() {
        let text = STATE.replace("\"100\"\n            ]", "\"999\"\n            ]");
        let err = Pipeline::state_from_str(&text).unwrap_err();
        match err.downcast_ref::<StateError>() {
            Some(StateError::UnknownDependency { job, dependency }) => {
                assert_eq!("second", job);
                assert_eq!("999", dependency);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_documents() {
        let cases = vec![
            String::new(),
            "[]".to_owned(),
            "{\"name\": \"x\"}".to_owned(),
            STATE.replace("\"status\": 2", "\"status\": 7"),
            STATE.replace("\"101\",", "\"100\","),
        ];
        for text in &cases {
            let err = Pipeline::state_from_str(text).unwrap_err();
            assert!(err.downcast_ref::<StateError>().is_some(), "{text}");
        }
    }

    #[test]
    fn test_save_and_load_dir() -> Result<()> {
        let dir = tempdir()?;
        let mut pipeline = Pipeline::state_from_str(STATE)?;
        pipeline.arguments = pipeline
            .arguments
            .merge(Some(&Arguments::new().with("rundir", dir.path().to_str().unwrap())));

        let path = pipeline.save_state("{rundir}/pipeline.json")?;
        assert_eq!(dir.path().join(STATE_FILE_NAME), path);

        let loaded = Pipeline::load_state(dir.path())?;
        assert_eq!(pipeline.state_to_string()?, loaded.state_to_string()?);
        assert_eq!(fs::read_to_string(&path)?, loaded.state_to_string()?);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(Pipeline::load_state("/nonexistent/qpipe/state.json").is_err());
    }
}
