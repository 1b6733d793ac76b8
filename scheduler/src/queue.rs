/// State codes that mean "accepted but not running yet" (held, queued, transit, waiting, suspended).
const QUEUED_CODES: &[&str] = &["H", "Q", "T", "W", "S"];
const RUNNING_CODES: &[&str] = &["R"];

/// Column holding the state code in the queue listing.
const STATE_COLUMN: usize = 4;

/// Coarse job state as reported by the queue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Queued,
    Running,
    /// Exiting, completed, or anything else we don't recognize
    Other,
}

impl QueueState {
    pub fn from_code(code: &str) -> Self {
        if QUEUED_CODES.contains(&code) {
            Self::Queued
        } else if RUNNING_CODES.contains(&code) {
            Self::Running
        } else {
            Self::Other
        }
    }
}

/// One job line from the queue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry<'a> {
    /// Job id with any `.server` suffix removed
    pub job_id: &'a str,
    pub state: QueueState,
}

/// The scheduler's job id is the leading dot-delimited segment of its job name,
/// e.g. `"12345"` for `"12345.master.cluster"`.
pub fn base_job_id(job_name: &str) -> &str {
    job_name.split('.').next().unwrap_or(job_name)
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| c == '-' || c == ' ')
}

/// Parse a listing in the layout:
///
/// ```text
/// Job ID                    Name             User            Time Use S Queue
/// ------------------------- ---------------- --------------- -------- - -----
/// 1234.master               first_task       someone         00:00:01 R batch
/// ```
///
/// Everything up to and including the separator line is header. Lines with too
/// few columns are skipped.
pub fn parse_queue_listing(listing: &str) -> Vec<QueueEntry<'_>> {
    let mut entries = Vec::new();
    let mut in_header = true;
    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if in_header {
            if is_separator(line) {
                in_header = false;
            }
            continue;
        }
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() <= STATE_COLUMN {
            log::trace!("skipping short queue line: {line}");
            continue;
        }
        entries.push(QueueEntry {
            job_id: base_job_id(columns[0]),
            state: QueueState::from_code(columns[STATE_COLUMN]),
        });
    }
    entries
}
