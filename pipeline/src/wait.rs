use std::time::Duration;

use anyhow::Result;

use crate::{JobCounts, Pipeline};

/// Poll the scheduler until none of the pipeline's jobs are queued or running.
///
/// Sleeps `interval` before every check, so a freshly submitted pipeline gets a
/// chance to show up in the queue. `on_check` sees the counts after each check.
pub fn wait_for_pipeline<F>(pipeline: &mut Pipeline, interval: Duration, mut on_check: F) -> Result<JobCounts>
where
    F: FnMut(&JobCounts),
{
    loop {
        std::thread::sleep(interval);
        let counts = pipeline.checkjobs()?;
        on_check(&counts);
        if counts.is_finished() {
            pipeline.log().info("Completed!");
            return Ok(counts);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Arguments;
    use scheduler::SchedulerCommands;

    #[test]
    fn test_empty_listing_finishes() -> Result<()> {
        let commands = SchedulerCommands {
            queue: "true".to_owned(),
            ..SchedulerCommands::default()
        };
        let mut pipeline = Pipeline::new("empty", true, Arguments::new()).with_commands(commands);
        let mut checks = 0;
        let counts = wait_for_pipeline(&mut pipeline, Duration::from_millis(1), |_| checks += 1)?;
        assert_eq!(1, checks);
        assert_eq!(JobCounts::default(), counts);
        Ok(())
    }
}
