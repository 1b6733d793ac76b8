use anyhow::{Context, Result};
use colored::Colorize;

use pipeline::{wait_for_pipeline, JobCounts, JobStatus, Pipeline};

use crate::settings::{Action, Settings};
use crate::ui::Ui;

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app, using settings to determine which action to take.
    pub fn run(mut self) -> Result<()> {
        let pipeline = self.load_pipeline()?;
        match self.settings.action {
            Action::Status => self.status(pipeline).map(|_| ()),
            Action::Abort => self.abort(pipeline),
            Action::Wait(interval) => {
                let mut pipeline = pipeline;
                self.ui.start_timer();
                let ui = &self.ui;
                let counts = wait_for_pipeline(&mut pipeline, interval, |counts| {
                    ui.print_progress(counts)
                })
                .with_context(|| format!("while waiting for pipeline {:?}", pipeline.name()))?;
                self.ui.print_elapsed("Pipeline finished");
                self.ui.print_status(&counts);
                Ok(())
            }
        }
    }

    /// Count jobs against the live queue and print the totals.
    pub fn status(&self, mut pipeline: Pipeline) -> Result<JobCounts> {
        let counts = pipeline
            .checkjobs()
            .with_context(|| format!("while checking jobs of pipeline {:?}", pipeline.name()))?;
        self.ui.print_status(&counts);
        Ok(counts)
    }

    /// Cancel everything, then close the pipeline down.
    pub fn abort(&self, mut pipeline: Pipeline) -> Result<()> {
        let submitted = pipeline
            .jobs()
            .filter(|(_, job)| job.moab_job_id().is_some())
            .count();
        pipeline.abort();
        pipeline.log().close();

        let cancelled = pipeline
            .jobs()
            .filter(|(_, job)| job.status() == JobStatus::Completed)
            .count();
        log::info!("{cancelled} of {} jobs marked completed", pipeline.len());
        eprintln!(
            "{} {submitted} submitted jobs of pipeline {:?}.",
            "Aborted".red(),
            pipeline.name()
        );
        Ok(())
    }

    fn load_pipeline(&self) -> Result<Pipeline> {
        self.ui
            .verbose_progress_debug("Loading pipeline state", &self.settings.state);
        let pipeline = Pipeline::load_state(&self.settings.state)?
            .with_commands(self.settings.commands.clone());
        self.ui.done();
        log::debug!("loaded {pipeline:?}");
        Ok(pipeline)
    }
}
