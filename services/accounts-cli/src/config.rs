//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! A missing default config file means "all defaults"; a missing file that
//! was asked for explicitly is an error.

use antigravity_pool::AccountStorage;
use antigravity_pool::paths::{DEFAULT_ACCOUNTS_FILE, DEFAULT_APP_DIR};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "antigravity-accounts.toml";

/// Env var overriding `[storage] path`.
pub const ACCOUNTS_PATH_ENV: &str = "ANTIGRAVITY_ACCOUNTS_PATH";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Where the accounts file lives
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Explicit accounts file; bypasses config-root resolution when set.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

/// Rotation tuning
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RotationConfig {
    /// Limit duration used by `mark-limited` when no `--retry-after-ms` is given.
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,
}

/// Bootstrap credential source
#[derive(Debug, Default, Deserialize)]
pub struct BootstrapConfig {
    /// JSON file holding `{type: "oauth", refresh, access?, expires?}`.
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
}

fn default_app_dir() -> String {
    DEFAULT_APP_DIR.to_string()
}

fn default_file_name() -> String {
    DEFAULT_ACCOUNTS_FILE.to_string()
}

fn default_retry_after_ms() -> u64 {
    60_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            app_dir: default_app_dir(),
            file_name: default_file_name(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            default_retry_after_ms: default_retry_after_ms(),
        }
    }
}

impl StorageConfig {
    /// Storage handle for the configured accounts file.
    pub fn open(&self) -> antigravity_pool::Result<AccountStorage> {
        match &self.path {
            Some(path) => Ok(AccountStorage::new(path)),
            None => AccountStorage::at(&self.app_dir, &self.file_name),
        }
    }
}

impl RotationConfig {
    /// `default_retry_after_ms` as the signed millisecond value the pool takes.
    pub fn default_retry_after(&self) -> i64 {
        i64::try_from(self.default_retry_after_ms).unwrap_or(i64::MAX)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.finish()
    }

    /// Load `DEFAULT_CONFIG_FILE` if present, otherwise start from defaults.
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            Config::default().finish()
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// `None` means neither was given and the default file applies.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        std::env::var("CONFIG_PATH").ok().map(PathBuf::from)
    }

    fn finish(mut self) -> Result<Self> {
        if let Some(path) = std::env::var_os(ACCOUNTS_PATH_ENV).filter(|p| !p.is_empty()) {
            self.storage.path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.rotation.default_retry_after_ms == 0 {
            return Err(Error::Config(
                "default_retry_after_ms must be greater than 0".into(),
            ));
        }
        if self.storage.path.is_none() {
            if self.storage.app_dir.trim().is_empty() {
                return Err(Error::Config("app_dir must not be empty".into()));
            }
            if self.storage.file_name.trim().is_empty() {
                return Err(Error::Config("file_name must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(ACCOUNTS_PATH_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[storage]
app_dir = "myapp"
file_name = "pool.json"

[rotation]
default_retry_after_ms = 5000

[bootstrap]
credential_file = "/etc/antigravity/credential.json"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert!(config.storage.path.is_none());
        assert_eq!(config.storage.app_dir, "myapp");
        assert_eq!(config.storage.file_name, "pool.json");
        assert_eq!(config.rotation.default_retry_after(), 5000);
        assert_eq!(
            config.bootstrap.credential_file.as_deref(),
            Some(Path::new("/etc/antigravity/credential.json"))
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(ACCOUNTS_PATH_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.app_dir, "opencode");
        assert_eq!(config.storage.file_name, "antigravity-accounts.json");
        assert_eq!(config.rotation.default_retry_after_ms, 60_000);
        assert!(config.bootstrap.credential_file.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(Error::Toml(_))));
    }

    #[test]
    fn test_zero_retry_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[rotation]\ndefault_retry_after_ms = 0\n");

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("default_retry_after_ms"), "got: {err}");
    }

    #[test]
    fn test_empty_file_name_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(ACCOUNTS_PATH_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[storage]\nfile_name = \"\"\n");

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("file_name"), "got: {err}");
    }

    #[test]
    fn test_accounts_path_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[storage]\npath = \"/from/file.json\"\n");

        unsafe { set_env(ACCOUNTS_PATH_ENV, "/from/env.json") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(ACCOUNTS_PATH_ENV) };

        assert_eq!(config.storage.path.as_deref(), Some(Path::new("/from/env.json")));
        let storage = config.storage.open().unwrap();
        assert_eq!(storage.path(), Path::new("/from/env.json"));
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("CONFIG_PATH", "/env/config.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/config.toml")),
            Some(PathBuf::from("/cli/config.toml"))
        );
        assert_eq!(
            Config::resolve_path(None),
            Some(PathBuf::from("/env/config.toml"))
        );

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), None);
    }
}
