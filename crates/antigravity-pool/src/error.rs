//! Error types for pool storage operations

/// Errors from reading, writing or locating the accounts file.
///
/// Loading never surfaces these to callers (a bad file means "no prior
/// state"); they are logged. Saving returns them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("storage parse error: {0}")]
    Parse(String),

    #[error("unsupported storage version: {0}")]
    UnsupportedVersion(String),

    #[error("config directory unavailable: {0}")]
    ConfigDir(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
