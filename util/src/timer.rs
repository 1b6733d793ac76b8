use std::time::{Duration, Instant};

/// Utility for keeping track of how long some operation has been going on.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new `Timer` started now.
    pub fn now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Reset internal timer to now.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Time since the timer was created or last reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time rounded down to whole seconds, for user-facing messages.
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

#[cfg(test)]
mod test {
    use super::Timer;
    #[test]
    fn test_reset() {
        let mut timer = Timer::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let before = timer.elapsed();
        timer.reset();
        assert!(timer.elapsed() <= before);
    }
}
