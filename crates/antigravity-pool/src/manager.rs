//! Sticky account selection and per-quota rate-limit tracking
//!
//! The manager owns the live pool. Each model family keeps its own "current
//! account" cursor and sticks to it until that account is rate limited for
//! the family; then a shared round-robin cursor picks the next eligible
//! account. Round robin runs over the currently eligible subset, so the
//! effective target shifts as eligibility changes between calls.
//!
//! Rate limits expire on their own: every eligibility check first deletes
//! reset timestamps that are at or before "now", so an account becomes
//! usable again on the very next call after its limit passes.
//!
//! All mutation is synchronous and runs to completion. Only `load_from_disk`
//! and `save_to_disk` await; callers must not issue further operations on
//! the same manager while one of those is in flight.

use std::sync::Arc;
use std::time::Duration;

use antigravity_auth::{AccessToken, OAuthCredential, RefreshParts, format_refresh_parts};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::quota::{HeaderStyle, ModelFamily, QuotaKey, RateLimitState};
use crate::storage::{
    AccountStorage, AccountStorageV3, ActiveIndexByFamily, StoredAccount, SwitchReason,
};
use crate::toast::{DEFAULT_TOAST_DEBOUNCE, ToastDebouncer};

/// Stable identity of a managed account.
///
/// Unlike `ManagedAccount::index`, an id never changes when other accounts
/// are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(u64);

/// One account in the live pool.
#[derive(Debug, Clone)]
pub struct ManagedAccount {
    id: AccountId,
    /// Current position in the pool; renumbered on every removal.
    pub index: usize,
    pub email: Option<String>,
    pub added_at: i64,
    pub last_used: i64,
    pub parts: RefreshParts,
    /// Live access token, attached only from the bootstrap credential or a refresh.
    pub access: Option<AccessToken>,
    pub expires: Option<i64>,
    pub rate_limits: RateLimitState,
    pub last_switch_reason: Option<SwitchReason>,
}

impl ManagedAccount {
    pub fn id(&self) -> AccountId {
        self.id
    }

    fn to_stored(&self) -> StoredAccount {
        let base = self.rate_limits.base();
        let by_model = self.rate_limits.by_model();
        StoredAccount {
            email: self.email.clone(),
            refresh_token: self.parts.refresh_token.clone(),
            project_id: self.parts.project_id.clone(),
            managed_project_id: self.parts.managed_project_id.clone(),
            added_at: Some(self.added_at),
            last_used: Some(self.last_used),
            last_switch_reason: self.last_switch_reason,
            rate_limit_reset_times: (!base.is_empty()).then(|| base.clone()),
            model_rate_limit_reset_times: (!by_model.is_empty()).then(|| by_model.clone()),
        }
    }
}

/// Per-family "current account" positions; `None` means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FamilyCursors {
    claude: Option<usize>,
    gemini: Option<usize>,
}

impl FamilyCursors {
    fn get(&self, family: ModelFamily) -> Option<usize> {
        match family {
            ModelFamily::Claude => self.claude,
            ModelFamily::Gemini => self.gemini,
        }
    }

    fn slot_mut(&mut self, family: ModelFamily) -> &mut Option<usize> {
        match family {
            ModelFamily::Claude => &mut self.claude,
            ModelFamily::Gemini => &mut self.gemini,
        }
    }
}

/// In-memory multi-account manager with sticky, per-family selection.
///
/// The accounts file is the source of truth for the pool: when it exists
/// (even empty) the bootstrap credential never seeds it.
#[derive(Debug)]
pub struct AccountManager {
    accounts: Vec<ManagedAccount>,
    cursor: usize,
    current: FamilyCursors,
    toast: ToastDebouncer,
    clock: Arc<dyn Clock>,
    next_id: u64,
}

impl AccountManager {
    /// Build a pool from persisted state and/or a bootstrap credential.
    pub fn new(bootstrap: Option<&OAuthCredential>, stored: Option<AccountStorageV3>) -> Self {
        Self::with_clock(bootstrap, stored, Arc::new(SystemClock))
    }

    /// Same as `new`, reading time from `clock`.
    pub fn with_clock(
        bootstrap: Option<&OAuthCredential>,
        stored: Option<AccountStorageV3>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut manager = Self {
            accounts: Vec::new(),
            cursor: 0,
            current: FamilyCursors::default(),
            toast: ToastDebouncer::default(),
            clock,
            next_id: 0,
        };

        match stored {
            Some(stored) => manager.seed_from_storage(bootstrap, stored),
            None => manager.seed_from_bootstrap(bootstrap),
        }

        info!(accounts = manager.accounts.len(), "account pool initialized");
        manager
    }

    /// Load the accounts file through `storage` and build the pool from it.
    pub async fn load_from_disk(
        storage: &AccountStorage,
        bootstrap: Option<&OAuthCredential>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stored = storage.load().await;
        Self::with_clock(bootstrap, stored, clock)
    }

    fn seed_from_storage(&mut self, bootstrap: Option<&OAuthCredential>, stored: AccountStorageV3) {
        let now = self.now();
        let bootstrap_token = bootstrap
            .map(OAuthCredential::parts)
            .filter(RefreshParts::has_refresh_token)
            .map(|parts| parts.refresh_token);

        for record in stored.accounts {
            if record.refresh_token.is_empty() {
                continue;
            }
            let matches_bootstrap = bootstrap_token.as_deref() == Some(record.refresh_token.as_str());
            let (access, expires) = match bootstrap.filter(|_| matches_bootstrap) {
                Some(credential) => (credential.access.clone(), credential.expires),
                None => (None, None),
            };

            let id = self.allocate_id();
            let index = self.accounts.len();
            self.accounts.push(ManagedAccount {
                id,
                index,
                email: record.email,
                added_at: record.added_at.unwrap_or(now),
                last_used: record.last_used.unwrap_or(0),
                parts: RefreshParts {
                    refresh_token: record.refresh_token,
                    project_id: record.project_id,
                    managed_project_id: record.managed_project_id,
                },
                access,
                expires,
                rate_limits: RateLimitState::new(
                    record.rate_limit_reset_times.unwrap_or_default(),
                    record.model_rate_limit_reset_times.unwrap_or_default(),
                ),
                last_switch_reason: record.last_switch_reason,
            });
        }

        let len = self.accounts.len();
        if len == 0 {
            return;
        }
        self.cursor = stored.active_index % len;
        let by_family = stored.active_index_by_family.unwrap_or_default();
        self.current = FamilyCursors {
            claude: Some(by_family.claude.unwrap_or(self.cursor) % len),
            gemini: Some(by_family.gemini.unwrap_or(self.cursor) % len),
        };
    }

    fn seed_from_bootstrap(&mut self, bootstrap: Option<&OAuthCredential>) {
        let Some(credential) = bootstrap else {
            return;
        };
        let parts = credential.parts();
        if !parts.has_refresh_token() {
            debug!("bootstrap credential has no refresh token, pool stays empty");
            return;
        }

        let id = self.allocate_id();
        self.accounts.push(ManagedAccount {
            id,
            index: 0,
            email: None,
            added_at: self.now(),
            last_used: 0,
            parts,
            access: credential.access.clone(),
            expires: credential.expires,
            rate_limits: RateLimitState::default(),
            last_switch_reason: None,
        });
        self.cursor = 0;
        self.current = FamilyCursors {
            claude: Some(0),
            gemini: Some(0),
        };
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Live view of the pool in index order.
    pub fn accounts(&self) -> &[ManagedAccount] {
        &self.accounts
    }

    /// Deep copy of the pool.
    pub fn accounts_snapshot(&self) -> Vec<ManagedAccount> {
        self.accounts.clone()
    }

    pub fn account(&self, id: AccountId) -> Option<&ManagedAccount> {
        self.accounts.iter().find(|account| account.id == id)
    }

    /// The family's current account, if its cursor points inside the pool.
    pub fn current_account_for_family(&self, family: ModelFamily) -> Option<&ManagedAccount> {
        self.current
            .get(family)
            .and_then(|index| self.accounts.get(index))
    }

    /// Record a switch made outside automatic selection (e.g. a manual override).
    pub fn mark_switched(&mut self, id: AccountId, reason: SwitchReason, family: ModelFamily) -> bool {
        let Some(position) = self.position(id) else {
            return false;
        };
        self.accounts[position].last_switch_reason = Some(reason);
        *self.current.slot_mut(family) = Some(position);
        debug!(index = position, %family, ?reason, "account switched");
        true
    }

    /// Whether a toast for `index` should be shown, using the default window.
    pub fn should_show_account_toast(&self, index: usize) -> bool {
        self.should_show_account_toast_within(index, DEFAULT_TOAST_DEBOUNCE)
    }

    pub fn should_show_account_toast_within(&self, index: usize, window: Duration) -> bool {
        self.toast.should_show(index, window, self.now())
    }

    pub fn mark_toast_shown(&mut self, index: usize) {
        let now = self.now();
        self.toast.mark_shown(index, now);
    }

    /// Sticky selection: keep returning the family's current account while it
    /// is eligible for `(family, model)`, otherwise rotate and make the pick
    /// the new current account.
    pub fn get_current_or_next_for_family(
        &mut self,
        family: ModelFamily,
        model: Option<&str>,
    ) -> Option<&ManagedAccount> {
        let now = self.now();
        if let Some(index) = self.current.get(family).filter(|i| *i < self.accounts.len()) {
            let account = &mut self.accounts[index];
            account.rate_limits.clear_expired(now);
            if !account.rate_limits.is_limited_for_family(family, model, now) {
                account.last_used = now;
                return self.accounts.get(index);
            }
        }

        let next = self.next_position(family, model)?;
        *self.current.slot_mut(family) = Some(next);
        self.accounts.get(next)
    }

    /// Round-robin over accounts eligible for `(family, model)`.
    ///
    /// The shared cursor advances on every successful pick and is taken
    /// modulo the size of the eligible subset.
    pub fn get_next_for_family(
        &mut self,
        family: ModelFamily,
        model: Option<&str>,
    ) -> Option<&ManagedAccount> {
        let next = self.next_position(family, model)?;
        self.accounts.get(next)
    }

    fn next_position(&mut self, family: ModelFamily, model: Option<&str>) -> Option<usize> {
        let now = self.now();
        let eligible: Vec<usize> = self
            .accounts
            .iter_mut()
            .filter_map(|account| {
                account.rate_limits.clear_expired(now);
                (!account.rate_limits.is_limited_for_family(family, model, now)).then_some(account.index)
            })
            .collect();

        if eligible.is_empty() {
            debug!(%family, model, "no account available");
            return None;
        }

        let position = eligible[self.cursor % eligible.len()];
        self.cursor = self.cursor.wrapping_add(1);
        self.accounts[position].last_used = now;
        crate::metrics::record_rotation(family);
        debug!(%family, model, index = position, eligible = eligible.len(), "rotated account");
        Some(position)
    }

    /// Record that `id` hit a rate limit lasting `retry_after_ms` from now.
    ///
    /// With a model id the limit applies only to that model under the quota
    /// key; without one it blocks the whole key. `retry_after_ms` is not
    /// validated: a non-positive value leaves the account eligible.
    pub fn mark_rate_limited(
        &mut self,
        id: AccountId,
        retry_after_ms: i64,
        family: ModelFamily,
        header_style: HeaderStyle,
        model: Option<&str>,
    ) -> bool {
        let now = self.now();
        let Some(position) = self.position(id) else {
            return false;
        };
        let key = QuotaKey::for_request(family, header_style);
        let reset_at = now.saturating_add(retry_after_ms);
        self.accounts[position].rate_limits.mark(key, model, reset_at);
        crate::metrics::record_rate_limit(key);
        info!(
            index = position,
            quota_key = %key,
            model,
            retry_after_ms,
            "account rate limited"
        );
        true
    }

    /// Whether `id` is limited on the single quota key for `header_style`.
    pub fn is_rate_limited_for_header_style(
        &mut self,
        id: AccountId,
        family: ModelFamily,
        header_style: HeaderStyle,
        model: Option<&str>,
    ) -> bool {
        let now = self.now();
        let Some(account) = self.account_mut(id) else {
            return false;
        };
        account.rate_limits.clear_expired(now);
        account
            .rate_limits
            .is_limited(QuotaKey::for_request(family, header_style), model, now)
    }

    /// First header style `id` can still use for `(family, model)`:
    /// `antigravity`, then (gemini only) `gemini-cli`.
    pub fn get_available_header_style(
        &mut self,
        id: AccountId,
        family: ModelFamily,
        model: Option<&str>,
    ) -> Option<HeaderStyle> {
        let now = self.now();
        let account = self.account_mut(id)?;
        account.rate_limits.clear_expired(now);
        account.rate_limits.available_header_style(family, model, now)
    }

    /// How long until some account reopens for `family`.
    ///
    /// Zero when any account is eligible now, or when no account carries a
    /// relevant timestamp.
    pub fn get_min_wait_time_for_family(&mut self, family: ModelFamily) -> Duration {
        let now = self.now();
        let mut any_eligible = false;
        for account in &mut self.accounts {
            account.rate_limits.clear_expired(now);
            any_eligible |= !account.rate_limits.is_limited_for_family(family, None, now);
        }
        if any_eligible {
            return Duration::ZERO;
        }

        self.accounts
            .iter()
            .filter_map(|account| account.rate_limits.family_wait_millis(family, now))
            .min()
            .map(|wait| Duration::from_millis(wait as u64))
            .unwrap_or(Duration::ZERO)
    }

    /// Remove `id` from the pool, renumber the rest and repair cursors.
    ///
    /// Returns false (and changes nothing) if the account is not in the pool.
    pub fn remove_account(&mut self, id: AccountId) -> bool {
        let Some(removed) = self.position(id) else {
            return false;
        };

        self.accounts.remove(removed);
        for (index, account) in self.accounts.iter_mut().enumerate() {
            account.index = index;
        }
        crate::metrics::record_removal();

        let len = self.accounts.len();
        if len == 0 {
            self.cursor = 0;
            self.current = FamilyCursors::default();
            info!(index = removed, "removed last account from pool");
            return true;
        }

        if self.cursor > removed {
            self.cursor -= 1;
        }
        self.cursor %= len;

        for family in ModelFamily::ALL {
            let slot = self.current.slot_mut(family);
            if let Some(current) = *slot {
                let shifted = if current > removed { current - 1 } else { current };
                *slot = (shifted < len).then_some(shifted);
            }
        }

        info!(index = removed, remaining = len, "removed account from pool");
        true
    }

    /// Replace credentials of `id` after a token refresh.
    pub fn update_from_auth(&mut self, id: AccountId, credential: &OAuthCredential) -> bool {
        let Some(account) = self.account_mut(id) else {
            return false;
        };
        account.parts = credential.parts();
        account.access = credential.access.clone();
        account.expires = credential.expires;
        true
    }

    /// Rebuild the host-side credential for `id`.
    pub fn to_auth_details(&self, id: AccountId) -> Option<OAuthCredential> {
        let account = self.account(id)?;
        Some(OAuthCredential::new(
            format_refresh_parts(&account.parts),
            account.access.clone(),
            account.expires,
        ))
    }

    /// Serialize the pool as a v3 document.
    ///
    /// Unset per-family cursors are written as 0, and `activeIndex` mirrors
    /// the claude cursor.
    pub fn to_storage(&self) -> AccountStorageV3 {
        let claude = self.current.claude.unwrap_or(0);
        let gemini = self.current.gemini.unwrap_or(0);
        AccountStorageV3::new(
            self.accounts.iter().map(ManagedAccount::to_stored).collect(),
            claude,
            Some(ActiveIndexByFamily {
                claude: Some(claude),
                gemini: Some(gemini),
            }),
        )
    }

    /// Write the pool through `storage`. In-memory state is unaffected by failure.
    pub async fn save_to_disk(&self, storage: &AccountStorage) -> Result<()> {
        storage.save(&self.to_storage()).await
    }

    fn position(&self, id: AccountId) -> Option<usize> {
        self.accounts.iter().position(|account| account.id == id)
    }

    fn account_mut(&mut self, id: AccountId) -> Option<&mut ManagedAccount> {
        self.accounts.iter_mut().find(|account| account.id == id)
    }

    fn allocate_id(&mut self) -> AccountId {
        let id = AccountId(self.next_id);
        self.next_id += 1;
        id
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}
