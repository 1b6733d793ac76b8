const STATE_FIELD: &str = "State";

/// Find the value of the first `State:` field in the status tool's output.
/// Returns `None` if there isn't one (e.g. the job is unknown or output is empty).
pub fn parse_job_state(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name.trim() == STATE_FIELD).then(|| value.trim())
    })
}
