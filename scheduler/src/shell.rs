use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use crate::{ArgStyle, Error, Gateway, Invocation, Output};

const SHELL: &str = "sh";

/// [`Gateway`] that spawns the scheduler tools as child processes.
#[derive(Debug, Default, Clone)]
pub struct ShellGateway;

impl ShellGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Gateway for ShellGateway {
    fn submit(&mut self, cmd: &Invocation, script: &str) -> Result<Output, Error> {
        run(cmd, Some(script))
    }

    fn control(&mut self, cmd: &Invocation) -> Result<Output, Error> {
        run(cmd, None)
    }

    fn list_queue(&mut self, cmd: &Invocation) -> Result<Output, Error> {
        run(cmd, None)
    }
}

/// Run `line` through `sh -c` on the local host.
pub fn run_shell(line: &str) -> Result<Output, Error> {
    let mut command = Command::new(SHELL);
    command.arg("-c").arg(line);
    spawn_and_wait(command, line, None)
}

fn run(cmd: &Invocation, stdin: Option<&str>) -> Result<Output, Error> {
    match cmd.style {
        ArgStyle::Joined => {
            let line = cmd.command_line();
            let mut command = Command::new(SHELL);
            command.arg("-c").arg(&line);
            spawn_and_wait(command, &line, stdin)
        }
        ArgStyle::Discrete => {
            let mut command = Command::new(&cmd.tool);
            command.args(&cmd.args);
            spawn_and_wait(command, &cmd.tool, stdin)
        }
    }
}

fn spawn_and_wait(mut command: Command, label: &str, stdin: Option<&str>) -> Result<Output, Error> {
    log::debug!("Running command `{label}`");
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| Error::Spawn(label.to_owned(), e))?;

    // feed stdin from its own thread so a chatty child can't deadlock us:
    let writer = match (stdin, child.stdin.take()) {
        (Some(text), Some(mut pipe)) => {
            let text = text.to_owned();
            Some(thread::spawn(move || pipe.write_all(text.as_bytes())))
        }
        _ => None,
    };

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Communicate(label.to_owned(), e))?;

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            // the child is allowed to exit without reading all of its input:
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                log::debug!("`{label}` closed stdin early")
            }
            Ok(Err(e)) => return Err(Error::Communicate(label.to_owned(), e)),
            Err(_) => log::error!("stdin writer thread for `{label}` panicked"),
        }
    }

    log::trace!(
        "`{label}` finished with {}\nStdout\n{}Stderr\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );

    Ok(Output {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
