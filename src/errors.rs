use std::{io, path::PathBuf};
use thiserror::Error;

/// An error from the units harness.
///
/// Errors abort the whole run. Anything that goes wrong with a single case
/// and is part of the expected vocabulary (bad exit status, diff, timeout)
/// is an [`Outcome`](crate::executor::results::Outcome) instead.
#[derive(Debug, Error)]
pub enum UnitsError {
    /// A tool the run depends on cannot be found on `PATH`.
    #[error("{0} command is not available")]
    MissingTool(String),

    /// Malformed command line argument.
    #[error("{0}")]
    Usage(String),

    /// Failed to read or parse `units.toml`.
    #[error("Failed to parse {}: {msg}", path.display())]
    Config { path: PathBuf, msg: String },

    /// The configuration was written for a different version of the tool.
    #[error("units version mismatch. Configuration requires: {required}, tool version: {actual}.")]
    VersionMismatch { required: String, actual: String },

    /// I/O failure attributed to a specific path.
    #[error("{}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A worker task panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The run was interrupted before all cases finished.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UnitsError {
    /// Attach a path to an I/O error.
    pub fn at(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| UnitsError::Path { path, source }
    }
}

// Helper method to collapse nested Results
pub trait RichResult<T, E> {
    fn collapse(self) -> Result<T, E>;
}

impl<T, E> RichResult<T, E> for Result<Result<T, E>, E> {
    fn collapse(self) -> Result<T, E> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e),
        }
    }
}
