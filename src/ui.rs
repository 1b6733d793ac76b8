use colored::Colorize;

use pipeline::JobCounts;
use util::Timer;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of how long we've been waiting
    timer: Timer,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            timer: Timer::now(),
        }
    }

    pub fn start_timer(&mut self) {
        self.timer.reset();
    }

    /// Final tallies, in the order a user scans for them.
    pub fn print_status(&self, counts: &JobCounts) {
        println!("{} {}", "Completed:".green(), counts.completed);
        println!("{} {}", "Running:".cyan(), counts.running);
        println!("{} {}", "Idles:".yellow(), counts.queued);
    }

    /// One line per check while waiting.
    pub fn print_progress(&self, counts: &JobCounts) {
        eprintln!(
            "[{}s] {} queued, {} running, {} completed",
            self.timer.elapsed_secs(),
            counts.queued,
            counts.running,
            counts.completed,
        );
    }

    pub fn print_elapsed(&self, what: &str) {
        eprintln!("{} after {}s.", what.green(), self.timer.elapsed_secs());
    }

    pub fn verbose_progress_debug<T: std::fmt::Debug>(&self, msg: &str, arg: T) {
        if self.verbose {
            eprint!("{} {:?}... ", msg.magenta(), arg);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }
}
