//! Multi-account pool for Antigravity OAuth credentials
//!
//! Keeps several Google accounts and picks one per request so that rate
//! limits on one account do not stall the others. Selection is sticky per
//! model family (claude, gemini): the current account keeps serving until it
//! is rate limited, then round robin picks the next eligible one. Limits are
//! tracked per quota key and optionally per model, and expire on their own.
//!
//! Account lifecycle:
//! 1. `AccountStorage::load()` reads the accounts file, migrating v1/v2 to v3
//! 2. `AccountManager` builds the pool (or seeds it from a bootstrap credential)
//! 3. Host asks `get_current_or_next_for_family()` for an account per request
//! 4. Upstream 429 → `mark_rate_limited()` for the quota key the request used
//! 5. Reset time passes → limit cleared on the next eligibility check
//! 6. Host calls `save_to_disk()` after state changes it wants to keep

pub mod clock;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod paths;
pub mod quota;
pub mod storage;
pub mod toast;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use manager::{AccountId, AccountManager, ManagedAccount};
pub use quota::{
    HeaderStyle, ModelFamily, ModelRateLimitResetTimes, QuotaKey, RateLimitResetTimes,
    RateLimitState,
};
pub use storage::{
    AccountStorage, AccountStorageV3, ActiveIndexByFamily, StoredAccount, SwitchReason,
    VersionedStorage,
};
pub use toast::DEFAULT_TOAST_DEBOUNCE;
