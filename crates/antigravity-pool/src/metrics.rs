//! Pool counters
//!
//! Emitted through the `metrics` facade; they are no-ops until the host
//! installs a recorder.
//!
//! - `account_pool_rotations_total` (counter): label `family`
//! - `account_pool_rate_limits_total` (counter): label `quota_key`
//! - `account_pool_removals_total` (counter)

use crate::quota::{ModelFamily, QuotaKey};

/// Round-robin picked a (possibly different) account for `family`.
pub fn record_rotation(family: ModelFamily) {
    metrics::counter!("account_pool_rotations_total", "family" => family.as_str()).increment(1);
}

/// An account was reported rate limited on `key`.
pub fn record_rate_limit(key: QuotaKey) {
    metrics::counter!("account_pool_rate_limits_total", "quota_key" => key.as_str()).increment(1);
}

/// An account was removed from the pool.
pub fn record_removal() {
    metrics::counter!("account_pool_removals_total").increment(1);
}
