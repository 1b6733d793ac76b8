use clap::{Parser, Subcommand};

const CMD_NAME: &str = "qp";
const DEFAULT_POLL_INTERVAL: u64 = 60;

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Job submission tool
    #[arg(long, value_name = "CMD", global = true)]
    #[arg(env = "QP_SUBMIT_CMD")]
    pub submit_cmd: Option<String>,

    /// Job control tool (release holds, cancel)
    #[arg(long, value_name = "CMD", global = true)]
    #[arg(env = "QP_CONTROL_CMD")]
    pub control_cmd: Option<String>,

    /// Single-job status tool
    #[arg(long, value_name = "CMD", global = true)]
    #[arg(env = "QP_STATUS_CMD")]
    pub status_cmd: Option<String>,

    /// Queue listing tool
    #[arg(long, value_name = "CMD", global = true)]
    #[arg(env = "QP_QUEUE_CMD")]
    pub queue_cmd: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print how many of a saved pipeline's jobs are completed, running and idle
    Status {
        /// Pipeline state file, or a directory holding pipeline.json
        state: String,
    },
    /// Cancel every job of a saved pipeline
    Abort {
        /// Pipeline state file, or a directory holding pipeline.json
        state: String,
    },
    /// Poll the scheduler until a saved pipeline has finished
    Wait {
        /// Pipeline state file, or a directory holding pipeline.json
        state: String,

        /// Seconds to sleep between checks
        #[arg(short, long, value_name = "SECS", default_value_t = DEFAULT_POLL_INTERVAL)]
        #[arg(env = "QP_POLL_INTERVAL")]
        interval: u64,
    },
}
