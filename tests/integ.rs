use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use clap::Parser;
use tempfile::tempdir;

use pipeline::{Arguments, JobError, JobSpec, JobStatus, Pipeline, StateError};
use qpipe::{App, Args, Settings};
use scheduler::{Error as GatewayError, Gateway, Invocation, Output};

/// Everything the fake scheduler has seen, plus what it will answer.
#[derive(Default)]
struct Scheduler {
    next_id: u32,
    submitted: Vec<(Vec<String>, String)>,
    controlled: Vec<Vec<String>>,
    reject_next: VecDeque<String>,
    listing: String,
}

#[derive(Clone, Default)]
struct FakeScheduler(Rc<RefCell<Scheduler>>);

impl FakeScheduler {
    fn starting_at(next_id: u32) -> Self {
        let fake = Self::default();
        fake.0.borrow_mut().next_id = next_id;
        fake
    }
}

impl Gateway for FakeScheduler {
    fn submit(&mut self, cmd: &Invocation, script: &str) -> Result<Output, GatewayError> {
        let mut s = self.0.borrow_mut();
        s.submitted.push((cmd.args.clone(), script.to_owned()));
        if let Some(stderr) = s.reject_next.pop_front() {
            return Ok(Output::new("", stderr));
        }
        let id = s.next_id;
        s.next_id += 1;
        Ok(Output::new(format!("{id}.master.cluster\n"), ""))
    }

    fn control(&mut self, cmd: &Invocation) -> Result<Output, GatewayError> {
        self.0.borrow_mut().controlled.push(cmd.args.clone());
        Ok(Output::new("ok\n", ""))
    }

    fn list_queue(&mut self, _cmd: &Invocation) -> Result<Output, GatewayError> {
        Ok(Output::new(self.0.borrow().listing.clone(), ""))
    }
}

fn listing(rows: &[(&str, &str)]) -> String {
    let mut text = String::from(
        "Job ID                    Name             User            Time Use S Queue\n\
         ------------------------- ---------------- --------------- -------- - -----\n",
    );
    for (id, state) in rows {
        text.push_str(&format!("{id}.master.cluster  task  someone  00:00:01 {state} batch\n"));
    }
    text
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_owned()
}

/// Build and submit a three-job diamond-ish pipeline inside a scope, saving its state.
fn submit_pipeline(rundir: &Path, fake: &FakeScheduler) -> Result<Pipeline> {
    let args = Arguments::new()
        .with("basedir", path_str(rundir))
        .with("outdir", "{basedir}/out")
        .with("threads", 4i64)
        .with("msub_arguments", vec!["-N {job_name}", "-l nodes=1:ppn={threads}"]);
    let mut p = Pipeline::new("integ", true, args).with_gateway(Box::new(fake.clone()));

    p.scoped(|p| {
        p.log_to_file("{basedir}/logs/pipeline.log", true)?;
        let align = p.create_job(JobSpec::new("align"))?;
        let call = p.create_job(
            JobSpec::new("call")
                .after_ok([align])
                .arguments(Arguments::new().with("threads", 8i64)),
        )?;
        let report = p.create_job(JobSpec::new("report").after_not_ok([call]).after_ok([align]))?;

        p.submit(align, "run_align --out {outdir}/{job_name}.bam")?;
        p.submit_held(call, "run_call -t {threads}")?;
        p.submit(report, "mail -s {job_name} me")?;
        assert!(p.release(call));
        p.save_state("{basedir}/pipeline.json")?;
        Ok(())
    })?;
    Ok(p)
}

#[test]
fn test_submit_save_reload() -> Result<()> {
    let dir = tempdir()?;
    let fake = FakeScheduler::starting_at(100);
    let mut p = submit_pipeline(dir.path(), &fake)?;

    {
        let s = fake.0.borrow();
        assert_eq!(3, s.submitted.len());
        let (align_args, align_script) = &s.submitted[0];
        assert_eq!(
            &format!("run_align --out {}/out/align.bam", path_str(dir.path())),
            align_script
        );
        assert_eq!("-l nodes=1:ppn=4", align_args[1]);

        let (call_args, _) = &s.submitted[1];
        assert_eq!("-N call", call_args[0]);
        assert_eq!("-l nodes=1:ppn=8", call_args[1]);
        assert!(call_args.contains(&"-l depend=afterok:100".to_owned()));
        assert_eq!(Some(&"-h".to_owned()), call_args.last());

        let (report_args, _) = &s.submitted[2];
        assert!(report_args.contains(&"-l depend=afterok:100".to_owned()));
        assert!(report_args.contains(&"-l depend=afternotok:101".to_owned()));

        assert_eq!(vec![vec!["-u", "all", "101"]], s.controlled);
    }
    assert!(!p.log().is_open());

    let log = std::fs::read_to_string(dir.path().join("logs/pipeline.log"))?;
    assert!(log.lines().all(|l| l.starts_with("I: ") || l.starts_with("E: ")));
    assert!(log.contains("I: Running 100\n"));
    assert!(log.contains("I: dep: [\"100\"]\n"));
    assert!(log.contains("I: notok dep: [\"101\"]\n"));

    // a later process picks the pipeline back up from its directory:
    let mut reloaded = Pipeline::load_state(dir.path())?.with_gateway(Box::new(fake.clone()));
    assert_eq!(p.state_to_string()?, reloaded.state_to_string()?);
    let names: Vec<&str> = reloaded.jobs().map(|(_, job)| job.name()).collect();
    assert_eq!(vec!["align", "call", "report"], names);
    for ((_, before), (_, after)) in p.jobs().zip(reloaded.jobs()) {
        assert_eq!(before.moab_job_id(), after.moab_job_id());
        assert_eq!(before.status(), after.status());
        assert_eq!(before.command(), after.command());
    }
    let report = reloaded.find_job("report").unwrap();
    let deps: Vec<Option<&str>> = reloaded
        .job(report)
        .failure_dependencies()
        .iter()
        .map(|&id| reloaded.job(id).moab_job_id())
        .collect();
    assert_eq!(vec![Some("101")], deps);

    fake.0.borrow_mut().listing = listing(&[("101", "R"), ("102", "H")]);
    let counts = reloaded.checkjobs()?;
    assert_eq!((1, 1, 1), (counts.queued, counts.running, counts.completed));
    Ok(())
}

#[test]
fn test_scope_error_aborts_submitted_jobs() -> Result<()> {
    let dir = tempdir()?;
    let fake = FakeScheduler::starting_at(7);
    fake.0.borrow_mut().reject_next.extend(std::iter::repeat("busy\n".to_owned()).take(3));

    let args = Arguments::new().with("basedir", path_str(dir.path()));
    let mut p = Pipeline::new("failing", false, args).with_gateway(Box::new(fake.clone()));
    let result = p.scoped(|p| {
        p.log_to_file("{basedir}/run.log", false)?;
        let first = p.create_job(JobSpec::new("first"))?;
        let second = p.create_job(JobSpec::new("second").after_ok([first]))?;
        // all three attempts are rejected:
        p.submit(first, "true")?;
        p.submit(second, "true")?;
        Ok(())
    });

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JobError>(),
        Some(JobError::Submission { attempts: 3, .. })
    ));
    assert!(p.jobs().all(|(_, job)| job.status() == JobStatus::Completed));
    // nothing was ever submitted, so nothing needed cancelling:
    assert!(fake.0.borrow().controlled.is_empty());

    let log = std::fs::read_to_string(dir.path().join("run.log"))?;
    assert_eq!(3, log.lines().filter(|l| l.starts_with("E: msub attempt")).count());
    assert!(log.ends_with("E: Aborting all the jobs (exception raised)\n"));

    // unsubmitted dependency edges can't be saved:
    let mut edges = Pipeline::new("edges", false, Arguments::new()).with_gateway(Box::new(fake));
    let a = edges.create_job(JobSpec::new("a"))?;
    edges.create_job(JobSpec::new("b").after_ok([a]))?;
    let err = edges.state_to_string().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::UnsubmittedDependency { .. })
    ));
    Ok(())
}

fn run_cli(argv: &[&str]) -> Result<()> {
    let args = Args::try_parse_from(argv)?;
    let settings: Settings = args.try_into()?;
    App::new(settings).run()
}

#[test]
fn test_cli_against_shell_tools() -> Result<()> {
    let dir = tempdir()?;
    let fake = FakeScheduler::starting_at(100);
    submit_pipeline(dir.path(), &fake)?;

    let state = path_str(&dir.path().join("pipeline.json"));
    let listing_file = dir.path().join("qstat.txt");
    std::fs::write(&listing_file, listing(&[("100", "R")]))?;
    let queue_cmd = format!("cat {}", path_str(&listing_file));

    run_cli(&["qp", "status", &state, "--queue-cmd", &queue_cmd])?;
    run_cli(&["qp", "abort", &state, "--control-cmd", "true"])?;

    std::fs::write(&listing_file, listing(&[]))?;
    run_cli(&["qp", "wait", &state, "--interval", "1", "--queue-cmd", &queue_cmd])?;

    // the listing tool is missing entirely:
    let missing = path_str(&dir.path().join("no-such-qstat"));
    assert!(run_cli(&["qp", "status", &state, "--queue-cmd", &missing]).is_err());
    Ok(())
}
