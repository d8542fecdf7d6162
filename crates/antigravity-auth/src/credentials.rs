//! Bootstrap OAuth credential
//!
//! The host hands the pool a single credential it already holds (for
//! example the one stored by its own auth flow). The pool uses it to seed
//! an empty pool, or to attach a live access token to the matching stored
//! account. Access tokens are wrapped in `AccessToken` so they never show
//! up in logs.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::constants::OAUTH_CREDENTIAL_TYPE;
use crate::error::{Error, Result};
use crate::parts::{RefreshParts, parse_refresh_parts};

/// Short-lived bearer token. Redacted in Debug/Display, zeroized on drop.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw token (use sparingly)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Drop for AccessToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An OAuth credential as the host stores it.
///
/// `refresh` is the opaque packed string (see `parts`). `expires` is a unix
/// timestamp in milliseconds (absolute, not a delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredential {
    /// Always "oauth"
    #[serde(rename = "type")]
    pub credential_type: String,
    pub refresh: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

impl OAuthCredential {
    pub fn new(refresh: impl Into<String>, access: Option<AccessToken>, expires: Option<i64>) -> Self {
        Self {
            credential_type: OAUTH_CREDENTIAL_TYPE.to_string(),
            refresh: refresh.into(),
            access,
            expires,
        }
    }

    /// Decode the packed refresh string.
    pub fn parts(&self) -> RefreshParts {
        parse_refresh_parts(&self.refresh)
    }
}

/// Load a bootstrap credential from a JSON file.
///
/// A missing file is not an error: the host simply has no credential yet.
/// A credential whose `type` is not "oauth" is rejected.
pub async fn load_credential(path: &Path) -> Result<Option<OAuthCredential>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "bootstrap credential file not found");
            return Ok(None);
        }
        Err(e) => return Err(Error::Io(format!("reading credential file: {e}"))),
    };

    let credential: OAuthCredential = serde_json::from_str(&contents)
        .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;

    if credential.credential_type != OAUTH_CREDENTIAL_TYPE {
        return Err(Error::InvalidCredentials(format!(
            "expected credential type \"{OAUTH_CREDENTIAL_TYPE}\", got \"{}\"",
            credential.credential_type
        )));
    }

    info!(path = %path.display(), "loaded bootstrap credential");
    Ok(Some(credential))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_redacts_debug_and_display() {
        let token = AccessToken::new("ya29.secret");
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
        assert_eq!(token.expose(), "ya29.secret");
    }

    #[test]
    fn credential_debug_does_not_leak_access_token() {
        let credential = OAuthCredential::new("r1|p1", Some(AccessToken::new("at-1")), Some(123));
        let debug = format!("{credential:?}");
        assert!(!debug.contains("at-1"), "got: {debug}");
    }

    #[test]
    fn credential_json_shape() {
        let credential = OAuthCredential::new("r1|p1", Some(AccessToken::new("at-1")), Some(123));
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["type"], "oauth");
        assert_eq!(json["refresh"], "r1|p1");
        assert_eq!(json["access"], "at-1");
        assert_eq!(json["expires"], 123);
    }

    #[test]
    fn parts_decodes_refresh_string() {
        let credential = OAuthCredential::new("r1|p1", None, None);
        let parts = credential.parts();
        assert_eq!(parts.refresh_token, "r1");
        assert_eq!(parts.project_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn load_credential_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_credential(&dir.path().join("auth.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn load_credential_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        tokio::fs::write(
            &path,
            r#"{"type":"oauth","refresh":"r9|p9|m9","access":"at-9","expires":42}"#,
        )
        .await
        .unwrap();

        let credential = load_credential(&path).await.unwrap().unwrap();
        assert_eq!(credential.refresh, "r9|p9|m9");
        assert_eq!(credential.access.as_ref().unwrap().expose(), "at-9");
        assert_eq!(credential.expires, Some(42));
    }

    #[tokio::test]
    async fn load_credential_rejects_non_oauth_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        tokio::fs::write(&path, r#"{"type":"api","refresh":"r1"}"#)
            .await
            .unwrap();

        let err = load_credential(&path).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err}");
    }

    #[tokio::test]
    async fn load_credential_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = load_credential(&path).await.unwrap_err();
        assert!(matches!(err, Error::CredentialParse(_)), "got: {err}");
    }
}
