use std::fmt;

/// How arguments are handed to the scheduler tools.
///
/// Some sites need the whole command line to go through a shell
/// (e.g. when the tools are wrapper functions or need login-shell setup);
/// others need a plain argument vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgStyle {
    /// Tool and arguments are joined into one line and run by `sh -c`.
    Joined,
    /// Tool is executed directly, each argument its own token.
    Discrete,
}

impl ArgStyle {
    pub fn from_join_flag(join: bool) -> Self {
        if join {
            Self::Joined
        } else {
            Self::Discrete
        }
    }

    pub fn joins(self) -> bool {
        matches!(self, Self::Joined)
    }

    /// Append `flag` with `value`: one token when joined, two otherwise.
    pub fn push_option(self, args: &mut Vec<String>, flag: &str, value: &str) {
        match self {
            Self::Joined => args.push(format!("{flag} {value}")),
            Self::Discrete => {
                args.push(flag.to_owned());
                args.push(value.to_owned());
            }
        }
    }

    /// Like `push_option`, but double-quotes the value when joined,
    /// so paths with spaces survive the shell.
    pub fn push_quoted_option(self, args: &mut Vec<String>, flag: &str, value: &str) {
        match self {
            Self::Joined => args.push(format!("{flag} \"{value}\"")),
            Self::Discrete => self.push_option(args, flag, value),
        }
    }
}

/// A single call to one of the scheduler tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: String,
    pub args: Vec<String>,
    pub style: ArgStyle,
}

impl Invocation {
    /// Tool and arguments as one space-separated line.
    pub fn command_line(&self) -> String {
        let mut line = String::with_capacity(
            self.tool.len() + self.args.iter().map(|a| a.len() + 1).sum::<usize>(),
        );
        line.push_str(&self.tool);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.style {
            ArgStyle::Joined => f.write_str(&self.command_line()),
            ArgStyle::Discrete => {
                let mut list = f.debug_list();
                list.entry(&self.tool);
                list.entries(&self.args);
                list.finish()
            }
        }
    }
}

/// Names of the scheduler's command-line tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerCommands {
    /// Accepts a job script on stdin and prints the new job's name
    pub submit: String,
    /// Releases holds on and cancels jobs
    pub control: String,
    /// Prints detailed status for one job
    pub status: String,
    /// Lists all live jobs
    pub queue: String,
}

impl Default for SchedulerCommands {
    fn default() -> Self {
        Self {
            submit: "msub".to_owned(),
            control: "mjobctl".to_owned(),
            status: "checkjob".to_owned(),
            queue: "qstat".to_owned(),
        }
    }
}

impl SchedulerCommands {
    /// Submit a job script with already-resolved `args`.
    pub fn submission(&self, args: Vec<String>, style: ArgStyle) -> Invocation {
        self.invocation(&self.submit, args, style)
    }

    /// Release all holds on `job_id`.
    pub fn release(&self, job_id: &str, style: ArgStyle) -> Invocation {
        let args = vec!["-u".to_owned(), "all".to_owned(), job_id.to_owned()];
        self.invocation(&self.control, args, style)
    }

    /// Cancel `job_id`.
    pub fn cancel(&self, job_id: &str, style: ArgStyle) -> Invocation {
        let args = vec!["-c".to_owned(), job_id.to_owned()];
        self.invocation(&self.control, args, style)
    }

    /// Verbose status of `job_id`.
    pub fn status(&self, job_id: &str, style: ArgStyle) -> Invocation {
        let mut args = Vec::with_capacity(2);
        style.push_option(&mut args, "-v", job_id);
        self.invocation(&self.status, args, style)
    }

    /// List every live job on the scheduler.
    pub fn queue_listing(&self, style: ArgStyle) -> Invocation {
        self.invocation(&self.queue, Vec::with_capacity(0), style)
    }

    fn invocation(&self, tool: &str, args: Vec<String>, style: ArgStyle) -> Invocation {
        Invocation {
            tool: tool.to_owned(),
            args,
            style,
        }
    }
}
