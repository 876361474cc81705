//! Error types for artifact materialization.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by stage callables.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while materializing an artifact.
///
/// Lock contention is not an error; it is reported as
/// [`Outcome::Locked`](crate::Outcome::Locked).
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The input path does not exist. Raised before any lock is taken.
    #[error("input not found: {path}")]
    MissingInput { path: PathBuf },

    /// The stage failed to read its input.
    #[error("failed to read {input}: {source}")]
    Read {
        input: PathBuf,
        #[source]
        source: BoxError,
    },

    /// A compute step failed.
    #[error("step '{step}' failed for {output}: {source}")]
    Compute {
        step: String,
        output: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The stage failed to write its result.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// A published artifact or cached intermediate could not be loaded back.
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// A filesystem primitive (marker, rename, directory) failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for materialization operations.
pub type Result<T> = std::result::Result<T, MaterializeError>;

impl MaterializeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the stage error that caused this failure, if any.
    pub fn stage_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Read { source, .. }
            | Self::Compute { source, .. }
            | Self::Write { source, .. }
            | Self::Load { source, .. } => Some(source.as_ref()),
            Self::MissingInput { .. } | Self::Io { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MaterializeError::MissingInput {
            path: PathBuf::from("/data/raw/subjects.csv"),
        };
        assert_eq!(err.to_string(), "input not found: /data/raw/subjects.csv");

        let err = MaterializeError::Compute {
            step: "filter".to_string(),
            output: PathBuf::from("out.parquet"),
            source: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "step 'filter' failed for out.parquet: boom"
        );
    }

    #[test]
    fn test_stage_error_is_reachable() {
        let cause = anyhow::anyhow!("bad row");
        let err = MaterializeError::Read {
            input: PathBuf::from("in.csv"),
            source: cause.into(),
        };
        let source = err.stage_error().expect("stage error");
        assert_eq!(source.to_string(), "bad row");

        let err = MaterializeError::io("x.lock", std::io::Error::other("denied"));
        assert!(err.stage_error().is_none());
    }
}
