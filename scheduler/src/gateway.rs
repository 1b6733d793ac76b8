use crate::{Error, Invocation};

/// Captured output of one scheduler command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// The scheduler tools report failure on stderr; exit codes are not reliable.
    pub fn succeeded(&self) -> bool {
        self.stderr.is_empty()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// The only point of contact with the external scheduler.
///
/// Every call blocks until the underlying tool exits.
pub trait Gateway {
    /// Run a submission, feeding `script` on stdin.
    fn submit(&mut self, cmd: &Invocation, script: &str) -> Result<Output, Error>;

    /// Run a control or status command that takes no stdin.
    fn control(&mut self, cmd: &Invocation) -> Result<Output, Error>;

    /// Run the queue listing command.
    fn list_queue(&mut self, cmd: &Invocation) -> Result<Output, Error>;
}

impl<G: Gateway + ?Sized> Gateway for Box<G> {
    fn submit(&mut self, cmd: &Invocation, script: &str) -> Result<Output, Error> {
        (**self).submit(cmd, script)
    }

    fn control(&mut self, cmd: &Invocation) -> Result<Output, Error> {
        (**self).control(cmd)
    }

    fn list_queue(&mut self, cmd: &Invocation) -> Result<Output, Error> {
        (**self).list_queue(cmd)
    }
}
