use syntax::Segment;

use crate::Arguments;

/// Default bound on substitution rounds before we give up on a template.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Name bound to the job's own name during job-scoped resolution.
pub const JOB_NAME_KEY: &str = "job_name";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template \"{template}\" did not settle after {rounds} substitution rounds (circular or too deeply nested)")]
    Recursive { template: String, rounds: usize },
    #[error("Unknown placeholder \"{{{name}}}\" in template \"{template}\"")]
    Unresolved { name: String, template: String },
    #[error("Invalid template \"{template}\"")]
    Malformed {
        template: String,
        #[source]
        source: syntax::Error,
    },
}

/// Expands placeholders against an argument context until the text stops changing.
///
/// Each round parses the current text and substitutes every placeholder once, so a
/// value may itself contain placeholders (e.g. `outdir = "{basedir}/out"`).
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    arguments: &'a Arguments,
    job_name: Option<&'a str>,
    max_rounds: usize,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(arguments: &'a Arguments) -> Self {
        Self {
            arguments,
            job_name: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Bind `{job_name}`; takes precedence over a context key of the same name.
    pub fn with_job_name(mut self, job_name: &'a str) -> Self {
        self.job_name = Some(job_name);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Resolve `template` to its fixed point.
    ///
    /// Up to `max_rounds` rounds may change the text; one more round must then leave it
    /// unchanged, otherwise we fail with [`TemplateError::Recursive`].
    pub fn resolve(&self, template: &str) -> Result<String, TemplateError> {
        let mut current = template.to_owned();
        for _ in 0..=self.max_rounds {
            let next = self.substitute(&current)?;
            if next == current {
                return Ok(next);
            }
            current = next;
        }
        Err(TemplateError::Recursive {
            template: template.to_owned(),
            rounds: self.max_rounds,
        })
    }

    /// Resolve each template in order.
    pub fn resolve_all<S: AsRef<str>>(&self, templates: &[S]) -> Result<Vec<String>, TemplateError> {
        templates.iter().map(|t| self.resolve(t.as_ref())).collect()
    }

    /// A single left-to-right substitution pass.
    fn substitute(&self, text: &str) -> Result<String, TemplateError> {
        let segments = syntax::parse(text).map_err(|source| TemplateError::Malformed {
            template: text.to_owned(),
            source,
        })?;

        let mut out = String::with_capacity(text.len());
        for segment in segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Brace(c) => out.push(c),
                Segment::Placeholder(name) => self.push_value(name, text, &mut out)?,
            }
        }
        Ok(out)
    }

    fn push_value(&self, name: &str, text: &str, out: &mut String) -> Result<(), TemplateError> {
        use std::fmt::Write;
        if let (JOB_NAME_KEY, Some(job_name)) = (name, self.job_name) {
            out.push_str(job_name);
            return Ok(());
        }
        match self.arguments.get(name) {
            Some(value) => {
                // writing to a String can't fail:
                let _ = write!(out, "{value}");
                Ok(())
            }
            None => Err(TemplateError::Unresolved {
                name: name.to_owned(),
                template: text.to_owned(),
            }),
        }
    }
}
