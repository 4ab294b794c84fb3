use crate::error::ModError;
use camino::Utf8PathBuf;
use std::fmt;

/// Outcome of a best-effort batch operation.
///
/// Every item is attempted; a failing item is recorded and the batch moves on.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<Utf8PathBuf>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub item: Utf8PathBuf,
    pub error: ModError,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, item: Utf8PathBuf) {
        self.succeeded.push(item);
    }

    pub fn record_failure(&mut self, item: Utf8PathBuf, error: ModError) {
        tracing::warn!("{}: {}", item, error);
        self.failures.push(BatchFailure { item, error });
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate outcome, e.g. `4 succeeded / 1 failed`.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded / {} failed",
            self.success_count(),
            self.failure_count()
        )
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure.error)?;
        }
        Ok(())
    }
}
