//! Versioned accounts file
//!
//! The accounts file is a single JSON document. Three schema versions exist
//! in the wild:
//!
//! - v1: one `isRateLimited` flag + `rateLimitResetTime` per account
//! - v2: `rateLimitResetTimes` with `claude` and `gemini` slots
//! - v3: `rateLimitResetTimes` keyed by quota key, plus `activeIndexByFamily`
//!
//! Loading parses whatever version is on disk into `VersionedStorage`,
//! steps it forward one version at a time until it is v3, re-persists if a
//! migration happened, then normalizes it: records without a refresh token
//! are dropped, duplicates by email collapse to the most recently used one,
//! and `activeIndex` is clamped into range.
//!
//! A missing, unreadable or malformed file is never an error for callers:
//! `load` logs and returns `None` ("no prior state").

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::paths::{self, DEFAULT_ACCOUNTS_FILE, DEFAULT_APP_DIR};
use crate::quota::{ModelRateLimitResetTimes, RateLimitResetTimes, millis_from_value};

/// Schema version written by `save`.
pub const CURRENT_VERSION: u32 = 3;

/// Why an account became the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchReason {
    RateLimit,
    Initial,
    Rotation,
}

impl std::str::FromStr for SwitchReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rate-limit" => Ok(SwitchReason::RateLimit),
            "initial" => Ok(SwitchReason::Initial),
            "rotation" => Ok(SwitchReason::Rotation),
            other => Err(format!("unknown switch reason: {other}")),
        }
    }
}

/// Fields shared by every schema version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "lenient")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub managed_project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub added_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub last_used: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub last_switch_reason: Option<SwitchReason>,
}

/// v1 account record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountV1 {
    #[serde(flatten)]
    pub record: AccountRecord,
    #[serde(default, deserialize_with = "lenient")]
    pub is_rate_limited: Option<bool>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub rate_limit_reset_time: Option<i64>,
}

/// v2 per-family reset slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LegacyResetTimes {
    #[serde(default, deserialize_with = "lenient_millis")]
    pub claude: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub gemini: Option<i64>,
}

/// v2 account record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountV2 {
    #[serde(flatten)]
    pub record: AccountRecord,
    #[serde(default, deserialize_with = "lenient")]
    pub rate_limit_reset_times: Option<LegacyResetTimes>,
}

/// v3 account record, as written by `save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub managed_project_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub added_at: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_used: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub last_switch_reason: Option<SwitchReason>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_times: Option<RateLimitResetTimes>,
    /// Model-scoped limits; absent from files written before they existed.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub model_rate_limit_reset_times: Option<ModelRateLimitResetTimes>,
}

impl StoredAccount {
    /// A record carrying only a refresh token.
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self::from_record(
            AccountRecord {
                email: None,
                refresh_token: refresh_token.into(),
                project_id: None,
                managed_project_id: None,
                added_at: None,
                last_used: None,
                last_switch_reason: None,
            },
            None,
        )
    }

    fn from_record(record: AccountRecord, reset_times: Option<RateLimitResetTimes>) -> Self {
        Self {
            email: record.email,
            refresh_token: record.refresh_token,
            project_id: record.project_id,
            managed_project_id: record.managed_project_id,
            added_at: record.added_at,
            last_used: record.last_used,
            last_switch_reason: record.last_switch_reason,
            rate_limit_reset_times: reset_times,
            model_rate_limit_reset_times: None,
        }
    }

    fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|email| !email.is_empty())
    }

    /// Ordering key for deduplication: most recently used, then most recently added.
    fn recency(&self) -> (i64, i64) {
        (self.last_used.unwrap_or(0), self.added_at.unwrap_or(0))
    }
}

/// Per-family current index as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveIndexByFamily {
    #[serde(default, deserialize_with = "lenient_index", skip_serializing_if = "Option::is_none")]
    pub claude: Option<usize>,
    #[serde(default, deserialize_with = "lenient_index", skip_serializing_if = "Option::is_none")]
    pub gemini: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageV1 {
    pub accounts: Vec<AccountV1>,
    pub active_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageV2 {
    pub accounts: Vec<AccountV2>,
    pub active_index: usize,
}

/// The current accounts document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStorageV3 {
    pub version: u32,
    pub accounts: Vec<StoredAccount>,
    pub active_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_index_by_family: Option<ActiveIndexByFamily>,
}

impl AccountStorageV3 {
    pub fn new(
        accounts: Vec<StoredAccount>,
        active_index: usize,
        active_index_by_family: Option<ActiveIndexByFamily>,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            accounts,
            active_index,
            active_index_by_family,
        }
    }
}

/// An accounts document at whichever version it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedStorage {
    V1(StorageV1),
    V2(StorageV2),
    V3(AccountStorageV3),
}

impl VersionedStorage {
    /// Parse a raw JSON document.
    ///
    /// Account records that don't match the schema for their version (for
    /// example a missing or non-string `refreshToken`) are dropped
    /// individually rather than failing the whole document.
    pub fn parse(value: Value) -> Result<Self> {
        let Value::Object(mut doc) = value else {
            return Err(Error::Parse("document is not a JSON object".into()));
        };

        let accounts = match doc.remove("accounts") {
            Some(Value::Array(accounts)) => accounts,
            _ => return Err(Error::Parse("accounts is not an array".into())),
        };
        let active_index = doc.get("activeIndex").and_then(index_from_value).unwrap_or(0);

        match doc.get("version").and_then(Value::as_u64) {
            Some(1) => Ok(VersionedStorage::V1(StorageV1 {
                accounts: parse_records(accounts),
                active_index,
            })),
            Some(2) => Ok(VersionedStorage::V2(StorageV2 {
                accounts: parse_records(accounts),
                active_index,
            })),
            Some(3) => {
                let by_family = doc
                    .remove("activeIndexByFamily")
                    .and_then(|value| serde_json::from_value(value).ok());
                Ok(VersionedStorage::V3(AccountStorageV3::new(
                    parse_records(accounts),
                    active_index,
                    by_family,
                )))
            }
            _ => Err(Error::UnsupportedVersion(
                doc.get("version").cloned().unwrap_or(Value::Null).to_string(),
            )),
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            VersionedStorage::V1(_) => 1,
            VersionedStorage::V2(_) => 2,
            VersionedStorage::V3(_) => 3,
        }
    }

    /// Advance one schema version. v3 is returned unchanged.
    pub fn migrate_step(self, now: i64) -> Self {
        match self {
            VersionedStorage::V1(v1) => VersionedStorage::V2(migrate_v1_to_v2(v1, now)),
            VersionedStorage::V2(v2) => VersionedStorage::V3(migrate_v2_to_v3(v2, now)),
            latest @ VersionedStorage::V3(_) => latest,
        }
    }

    /// Step forward until the document is current.
    pub fn into_latest(self, now: i64) -> AccountStorageV3 {
        let mut doc = self;
        loop {
            match doc {
                VersionedStorage::V3(latest) => return latest,
                older => doc = older.migrate_step(now),
            }
        }
    }
}

/// v1 → v2: a still-active limit applies to both families.
pub fn migrate_v1_to_v2(v1: StorageV1, now: i64) -> StorageV2 {
    let accounts = v1
        .accounts
        .into_iter()
        .map(|account| {
            let reset = account
                .rate_limit_reset_time
                .filter(|reset| account.is_rate_limited == Some(true) && *reset > now);
            AccountV2 {
                record: account.record,
                rate_limit_reset_times: reset.map(|reset| LegacyResetTimes {
                    claude: Some(reset),
                    gemini: Some(reset),
                }),
            }
        })
        .collect();

    StorageV2 {
        accounts,
        active_index: v1.active_index,
    }
}

/// v2 → v3: `claude` carries over, `gemini` becomes `gemini-antigravity`.
/// Expired timestamps are dropped.
pub fn migrate_v2_to_v3(v2: StorageV2, now: i64) -> AccountStorageV3 {
    let accounts = v2
        .accounts
        .into_iter()
        .map(|account| {
            let legacy = account.rate_limit_reset_times.unwrap_or_default();
            let reset_times = RateLimitResetTimes {
                claude: legacy.claude.filter(|reset| *reset > now),
                gemini_antigravity: legacy.gemini.filter(|reset| *reset > now),
                gemini_cli: None,
            };
            let reset_times = (!reset_times.is_empty()).then_some(reset_times);
            StoredAccount::from_record(account.record, reset_times)
        })
        .collect();

    AccountStorageV3::new(accounts, v2.active_index, None)
}

/// Keep one account per email: the one with the greatest
/// `(lastUsed, addedAt)`, first occurrence on ties. Accounts without an
/// email are always kept. Original order is preserved.
pub fn deduplicate_accounts_by_email(accounts: Vec<StoredAccount>) -> Vec<StoredAccount> {
    let mut newest: HashMap<&str, usize> = HashMap::new();
    for (i, account) in accounts.iter().enumerate() {
        let Some(email) = account.email.as_deref().filter(|_| account.has_email()) else {
            continue;
        };
        match newest.get(email) {
            Some(&kept) if account.recency() <= accounts[kept].recency() => {}
            _ => {
                newest.insert(email, i);
            }
        }
    }
    let keep: HashSet<usize> = newest.into_values().collect();

    accounts
        .into_iter()
        .enumerate()
        .filter(|(i, account)| !account.has_email() || keep.contains(i))
        .map(|(_, account)| account)
        .collect()
}

/// Drop token-less records, deduplicate and clamp `activeIndex`.
pub fn normalize(mut doc: AccountStorageV3) -> AccountStorageV3 {
    let before = doc.accounts.len();
    doc.accounts.retain(|account| !account.refresh_token.is_empty());
    doc.accounts = deduplicate_accounts_by_email(doc.accounts);
    if doc.accounts.len() != before {
        debug!(
            before,
            after = doc.accounts.len(),
            "dropped invalid or duplicate accounts"
        );
    }

    doc.active_index = match doc.accounts.len() {
        0 => 0,
        len => doc.active_index.min(len - 1),
    };
    doc
}

/// File-backed accounts document.
///
/// Single-process, last-writer-wins: nothing coordinates concurrent
/// writers of the same file.
#[derive(Debug, Clone)]
pub struct AccountStorage {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl AccountStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Storage whose migrations judge expiry against `clock`.
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    /// `<config_root>/opencode/antigravity-accounts.json`
    pub fn default_location() -> Result<Self> {
        Self::at(DEFAULT_APP_DIR, DEFAULT_ACCOUNTS_FILE)
    }

    /// `<config_root>/<app_dir>/<file_name>`
    pub fn at(app_dir: &str, file_name: &str) -> Result<Self> {
        Ok(Self::new(paths::accounts_path(app_dir, file_name)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, migrate and normalize the accounts document.
    ///
    /// Returns `None` when there is no usable prior state. A migrated
    /// document is written back once; failure to do so is logged and the
    /// in-memory result is still returned.
    pub async fn load(&self) -> Option<AccountStorageV3> {
        let versioned = match self.read_document().await {
            Ok(Some(versioned)) => versioned,
            Ok(None) => {
                debug!(path = %self.path.display(), "accounts file not found");
                return None;
            }
            Err(e @ (Error::Parse(_) | Error::UnsupportedVersion(_))) => {
                warn!(path = %self.path.display(), error = %e, "ignoring invalid accounts file");
                return None;
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to load accounts file");
                return None;
            }
        };

        let source_version = versioned.version();
        let doc = versioned.into_latest(self.clock.now_millis());

        if source_version < CURRENT_VERSION {
            info!(
                from = source_version,
                to = CURRENT_VERSION,
                "migrating account storage"
            );
            match self.save(&doc).await {
                Ok(()) => info!("account storage migration complete"),
                Err(e) => warn!(error = %e, "failed to persist migrated account storage"),
            }
        }

        let doc = normalize(doc);
        info!(
            path = %self.path.display(),
            accounts = doc.accounts.len(),
            "loaded account storage"
        );
        Some(doc)
    }

    /// Write the full document, creating the parent directory first.
    pub async fn save(&self, doc: &AccountStorageV3) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Io(format!("creating accounts directory: {e}")))?;
        }
        write_atomic(&self.path, doc).await
    }

    /// Delete the accounts file. A missing file is fine; other failures are logged.
    pub async fn clear(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "cleared account storage"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to clear account storage")
            }
        }
    }

    async fn read_document(&self) -> Result<Option<VersionedStorage>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(format!("reading accounts file: {e}"))),
        };
        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing accounts file: {e}")))?;
        VersionedStorage::parse(value).map(Some)
    }
}

/// Write the document atomically (temp file + rename) with 0600 permissions,
/// since it contains refresh tokens.
async fn write_atomic(path: &Path, doc: &AccountStorageV3) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| Error::Parse(format!("serializing accounts: {e}")))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Io("accounts path has no file name".into()))?
        .to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp accounts file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting accounts file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp accounts file: {e}")))?;

    debug!(path = %path.display(), accounts = doc.accounts.len(), "persisted accounts");
    Ok(())
}

fn parse_records<T: DeserializeOwned>(values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(position = i, error = %e, "dropping invalid account record");
                None
            }
        })
        .collect()
}

fn index_from_value(value: &Value) -> Option<usize> {
    millis_from_value(value).map(|n| n as usize)
}

/// Optional field that becomes `None` instead of failing when malformed.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}

fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_from_value))
}

fn lenient_index<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(index_from_value))
}
