use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = SvError> = std::result::Result<T, E>;

/// An I/O error with the path that triggered it attached.
#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct SvIoError {
    io: io::Error,
    path: PathBuf,
}

impl SvIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<SvIoError> for io::Error {
    fn from(err: SvIoError) -> Self {
        err.io
    }
}

/// Various error types for the front-end infrastructure.
///
/// User-visible language diagnostics are *not* represented here; those go
/// through [`crate::diagnostics::ErrorContainer`]. This type covers the
/// failures that abort an operation outright: unreadable files, malformed
/// caches, bad configuration.
#[derive(Debug, Error)]
pub enum SvError {
    #[error(transparent)]
    Io(#[from] SvIoError),
    #[error("file could not be resolved: \"{0}\"")]
    FileNotFound(PathBuf),
    #[error("no input files were provided")]
    NoInput,
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    /// General purpose message
    #[error("{0}")]
    Message(String),
}

impl SvError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        SvIoError::new(err, path).into()
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Message(msg.to_string())
    }
}

#[allow(unused_macros)]
macro_rules! format_err {
    ($($tt:tt)*) => {
        $crate::error::SvError::msg(format!($($tt)*))
    };
}

#[allow(unused_macros)]
macro_rules! bail {
    ($($tt:tt)*) => { return Err(format_err!($($tt)*)) };
}
