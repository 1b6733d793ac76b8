use std::fmt::Display;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Pipeline is already logging to {0:?}; cannot log to more than one file")]
    AlreadyConfigured(PathBuf),
}

/// The pipeline's operational log: `I: ` and `E: ` prefixed lines, flushed as written.
///
/// Lines are mirrored to the `log` facade, so they still show up on stderr
/// (at a high enough verbosity) when no file is configured.
#[derive(Debug, Default)]
pub struct PipelineLog {
    file: Option<(PathBuf, File)>,
}

impl PipelineLog {
    /// Start writing to `path`, replacing any existing file. Creates parent dirs first if asked to.
    pub fn open(&mut self, path: &Path, create_parent_dirs: bool) -> Result<()> {
        if let Some((current, _)) = &self.file {
            return Err(LogError::AlreadyConfigured(current.clone()).into());
        }
        if create_parent_dirs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {parent:?}"))?;
            }
        }
        let file = File::create(path).with_context(|| format!("creating log file {path:?}"))?;
        self.file = Some((path.to_path_buf(), file));
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn info(&mut self, msg: impl Display) {
        log::debug!("{msg}");
        self.write_line('I', &msg);
    }

    pub fn error(&mut self, msg: impl Display) {
        log::error!("{msg}");
        self.write_line('E', &msg);
    }

    /// Close the file; later lines only go to the `log` facade.
    pub fn close(&mut self) {
        if let Some((path, mut file)) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("error flushing pipeline log {path:?}: {e}");
            }
        }
    }

    fn write_line(&mut self, level: char, msg: &dyn Display) {
        if let Some((path, file)) = &mut self.file {
            // a broken log file shouldn't take the pipeline down with it:
            if let Err(e) = writeln!(file, "{level}: {msg}").and_then(|_| file.flush()) {
                log::warn!("error writing to pipeline log {path:?}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lines_and_close() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/dir/pipeline.log");

        let mut log = PipelineLog::default();
        log.info("not written anywhere yet");
        log.open(&path, true)?;
        log.info("msub attempt 1");
        log.error("Error cancelling job 12");
        log.close();
        log.info("after close");

        assert_eq!(
            "I: msub attempt 1\nE: Error cancelling job 12\n",
            fs::read_to_string(&path)?
        );
        assert!(!log.is_open());
        Ok(())
    }

    #[test]
    fn test_open_replaces_old_log() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pipeline.log");
        fs::write(&path, "I: from an earlier run\n")?;

        let mut log = PipelineLog::default();
        log.open(&path, false)?;
        log.info("fresh");
        log.close();
        assert_eq!("I: fresh\n", fs::read_to_string(&path)?);
        Ok(())
    }

    #[test]
    fn test_single_file() -> Result<()> {
        let dir = tempdir()?;
        let mut log = PipelineLog::default();
        log.open(&dir.path().join("a.log"), false)?;
        let err = log.open(&dir.path().join("b.log"), false).unwrap_err();
        assert!(err.downcast_ref::<LogError>().is_some());
        assert_eq!(Some(dir.path().join("a.log").as_path()), log.path());
        Ok(())
    }

    #[test]
    fn test_missing_parent() -> Result<()> {
        let dir = tempdir()?;
        let mut log = PipelineLog::default();
        assert!(log.open(&dir.path().join("no/such/dir.log"), false).is_err());
        assert!(!log.is_open());
        Ok(())
    }
}
