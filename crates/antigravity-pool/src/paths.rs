//! Accounts file location
//!
//! `<config_root>/<app_dir>/<file_name>`, where the config root is
//! `%APPDATA%` (else `<home>/AppData/Roaming`) on Windows and
//! `$XDG_CONFIG_HOME` (else `<home>/.config`) everywhere else.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Application directory under the config root.
pub const DEFAULT_APP_DIR: &str = "opencode";

/// Accounts file name inside the application directory.
pub const DEFAULT_ACCOUNTS_FILE: &str = "antigravity-accounts.json";

/// Resolve the platform config root from the process environment.
pub fn config_root() -> Result<PathBuf> {
    resolve_config_root(
        cfg!(windows),
        |key| {
            std::env::var_os(key)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        },
        dirs::home_dir(),
    )
}

/// Full path of the accounts file.
pub fn accounts_path(app_dir: &str, file_name: &str) -> Result<PathBuf> {
    Ok(config_root()?.join(app_dir).join(file_name))
}

fn resolve_config_root(
    windows: bool,
    env: impl Fn(&str) -> Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    let (var, fallback): (&str, &[&str]) = if windows {
        ("APPDATA", &["AppData", "Roaming"])
    } else {
        ("XDG_CONFIG_HOME", &[".config"])
    };

    if let Some(root) = env(var) {
        return Ok(root);
    }

    let home = home.ok_or_else(|| {
        Error::ConfigDir(format!("{var} is unset and no home directory could be determined"))
    })?;
    Ok(fallback.iter().fold(home, |path, segment| path.join(segment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn no_env(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn unix_prefers_xdg_config_home() {
        let root = resolve_config_root(
            false,
            |key| (key == "XDG_CONFIG_HOME").then(|| PathBuf::from("/xdg")),
            Some(PathBuf::from("/home/u")),
        )
        .unwrap();
        assert_eq!(root, Path::new("/xdg"));
    }

    #[test]
    fn unix_falls_back_to_dot_config() {
        let root = resolve_config_root(false, no_env, Some(PathBuf::from("/home/u"))).unwrap();
        assert_eq!(root, Path::new("/home/u/.config"));
    }

    #[test]
    fn windows_prefers_appdata() {
        let root = resolve_config_root(
            true,
            |key| (key == "APPDATA").then(|| PathBuf::from("C:/Users/u/AppData/Roaming")),
            Some(PathBuf::from("C:/Users/u")),
        )
        .unwrap();
        assert_eq!(root, Path::new("C:/Users/u/AppData/Roaming"));
    }

    #[test]
    fn windows_falls_back_to_roaming_under_home() {
        let root = resolve_config_root(true, no_env, Some(PathBuf::from("/home/u"))).unwrap();
        assert_eq!(root, Path::new("/home/u/AppData/Roaming"));
    }

    #[test]
    fn windows_ignores_xdg() {
        let root = resolve_config_root(
            true,
            |key| (key == "XDG_CONFIG_HOME").then(|| PathBuf::from("/xdg")),
            Some(PathBuf::from("/home/u")),
        )
        .unwrap();
        assert_eq!(root, Path::new("/home/u/AppData/Roaming"));
    }

    #[test]
    fn missing_home_without_env_is_error() {
        let err = resolve_config_root(false, no_env, None).unwrap_err();
        assert!(err.to_string().contains("XDG_CONFIG_HOME"), "got: {err}");
    }
}
