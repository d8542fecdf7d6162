//! CLI error types

use thiserror::Error;

/// Errors surfaced by the `antigravity-accounts` binary.
///
/// `Usage` is the only variant that prints the usage text; everything else
/// is reported through `anyhow` with context.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Usage(String),

    #[error("no account at index {0}")]
    NoSuchAccount(usize),

    #[error("account storage: {0}")]
    Storage(#[from] antigravity_pool::Error),

    #[error("bootstrap credential: {0}")]
    Credential(#[from] antigravity_auth::Error),
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("default_retry_after_ms must be greater than 0".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: default_retry_after_ms must be greater than 0"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(io_err.to_string().starts_with("I/O error:"), "got: {io_err}");

        assert_eq!(Error::NoSuchAccount(4).to_string(), "no account at index 4");
    }

    #[test]
    fn wrapped_errors_keep_source_message() {
        let err: Error = antigravity_pool::Error::ConfigDir("no home".into()).into();
        assert!(err.to_string().contains("no home"), "got: {err}");

        let err: Error = antigravity_auth::Error::InvalidCredentials("type is api".into()).into();
        assert!(err.to_string().starts_with("bootstrap credential:"), "got: {err}");
    }
}
