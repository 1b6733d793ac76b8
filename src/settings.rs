use std::path::PathBuf;
use std::time::Duration;

use scheduler::SchedulerCommands;

use crate::args::{Args, Command};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Pipeline state {0:?} does not exist")]
    StateNotFound(PathBuf),
    #[error("Poll interval must be at least one second")]
    ZeroInterval,
    #[error("Scheduler tool name for {0} is empty")]
    EmptyTool(&'static str),
}

/// What the user asked us to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Status,
    Abort,
    Wait(Duration),
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub state: PathBuf,
    pub action: Action,
    pub verbose: u8,
    pub commands: SchedulerCommands,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let (state, action) = match args.command {
            Command::Status { state } => (state, Action::Status),
            Command::Abort { state } => (state, Action::Abort),
            Command::Wait { state, interval } => {
                if interval == 0 {
                    return Err(Error::ZeroInterval.into());
                }
                (state, Action::Wait(Duration::from_secs(interval)))
            }
        };

        let state = PathBuf::from(state);
        if !state.exists() {
            return Err(Error::StateNotFound(state).into());
        }

        // anything not given on the command line or in the env keeps its default:
        let mut commands = SchedulerCommands::default();
        override_tool(&mut commands.submit, args.submit_cmd, "submission")?;
        override_tool(&mut commands.control, args.control_cmd, "job control")?;
        override_tool(&mut commands.status, args.status_cmd, "job status")?;
        override_tool(&mut commands.queue, args.queue_cmd, "queue listing")?;

        Ok(Self {
            state,
            action,
            verbose: args.verbose,
            commands,
        })
    }
}

fn override_tool(tool: &mut String, value: Option<String>, what: &'static str) -> Result<(), Error> {
    if let Some(value) = value {
        if value.trim().is_empty() {
            return Err(Error::EmptyTool(what));
        }
        *tool = value;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use clap::Parser;

    #[test]
    fn test_wait_settings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let state = dir.path().to_str().unwrap_or_default().to_owned();
        let args = Args::try_parse_from([
            "qp", "-vv", "wait", &state, "--interval", "5", "--queue-cmd", "showq",
        ])?;
        let settings = Settings::try_from(args)?;
        assert_eq!(Action::Wait(Duration::from_secs(5)), settings.action);
        assert_eq!(2, settings.verbose);
        assert_eq!("showq", settings.commands.queue);
        assert_eq!("msub", settings.commands.submit);
        Ok(())
    }

    #[test]
    fn test_bad_settings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let state = dir.path().to_str().unwrap_or_default().to_owned();

        let args = Args::try_parse_from(["qp", "wait", &state, "-i", "0"])?;
        assert!(Settings::try_from(args).is_err());

        let args = Args::try_parse_from(["qp", "status", "/nonexistent/qpipe/state.json"])?;
        let err = Settings::try_from(args).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::StateNotFound(_))));

        let args = Args::try_parse_from(["qp", "abort", &state, "--control-cmd", " "])?;
        assert!(Settings::try_from(args).is_err());

        // malformed invocations are rejected by clap:
        assert!(Args::try_parse_from(["qp", "status"]).is_err());
        assert!(Args::try_parse_from(["qp", "resubmit", &state]).is_err());
        Ok(())
    }
}
