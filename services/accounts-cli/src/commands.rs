//! Command execution against the persisted account pool
//!
//! Each run loads the pool from disk, applies one command and writes the
//! pool back only when the command changed something worth keeping.

use std::sync::Arc;

use antigravity_auth::OAuthCredential;
use antigravity_pool::{
    AccountId, AccountManager, AccountStorage, Clock, ManagedAccount, ModelFamily, QuotaKey,
    RateLimitState, SystemClock,
};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::cli::Command;
use crate::config::RotationConfig;
use crate::error::{Error, Result};

/// Result of applying a command to a loaded pool.
struct Outcome {
    output: Value,
    persist: bool,
}

impl Outcome {
    fn read(output: Value) -> Self {
        Self {
            output,
            persist: false,
        }
    }

    fn write(output: Value) -> Self {
        Self {
            output,
            persist: true,
        }
    }
}

#[derive(Debug)]
pub struct Runner {
    storage: AccountStorage,
    bootstrap: Option<OAuthCredential>,
    rotation: RotationConfig,
    clock: Arc<dyn Clock>,
}

impl Runner {
    pub fn new(
        storage: AccountStorage,
        bootstrap: Option<OAuthCredential>,
        rotation: RotationConfig,
    ) -> Self {
        Self::with_clock(storage, bootstrap, rotation, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: AccountStorage,
        bootstrap: Option<OAuthCredential>,
        rotation: RotationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            bootstrap,
            rotation,
            clock,
        }
    }

    /// Execute `command` and return its JSON result.
    pub async fn run(&self, command: &Command) -> Result<Value> {
        debug!(command = command.name(), path = %self.storage.path().display(), "running command");
        match command {
            Command::Help => Ok(Value::Null),
            Command::Clear => {
                self.storage.clear().await;
                Ok(json!({ "path": self.storage.path().display().to_string(), "cleared": true }))
            }
            Command::Migrate => self.migrate().await,
            _ => {
                let mut manager = AccountManager::load_from_disk(
                    &self.storage,
                    self.bootstrap.as_ref(),
                    self.clock.clone(),
                )
                .await;
                let outcome = self.apply(&mut manager, command)?;
                if outcome.persist {
                    manager.save_to_disk(&self.storage).await?;
                    info!(
                        command = command.name(),
                        accounts = manager.account_count(),
                        "saved account pool"
                    );
                }
                Ok(outcome.output)
            }
        }
    }

    async fn migrate(&self) -> Result<Value> {
        let Some(doc) = self.storage.load().await else {
            return Ok(json!({
                "path": self.storage.path().display().to_string(),
                "found": false,
                "accounts": 0,
            }));
        };
        self.storage.save(&doc).await?;
        Ok(json!({
            "path": self.storage.path().display().to_string(),
            "found": true,
            "version": doc.version,
            "accounts": doc.accounts.len(),
        }))
    }

    fn apply(&self, manager: &mut AccountManager, command: &Command) -> Result<Outcome> {
        let now = self.clock.now_millis();
        match command {
            Command::List => Ok(Outcome::read(json!({
                "path": self.storage.path().display().to_string(),
                "accounts": manager
                    .accounts()
                    .iter()
                    .map(|account| describe(account, now))
                    .collect::<Vec<_>>(),
                "current": {
                    "claude": manager
                        .current_account_for_family(ModelFamily::Claude)
                        .map(|a| a.index),
                    "gemini": manager
                        .current_account_for_family(ModelFamily::Gemini)
                        .map(|a| a.index),
                },
            }))),

            Command::Select { family, model } => {
                let model = model.as_deref();
                let picked = manager
                    .get_current_or_next_for_family(*family, model)
                    .map(|account| (account.id(), account.index, account.email.clone()));

                let Some((id, index, email)) = picked else {
                    let wait = manager.get_min_wait_time_for_family(*family);
                    return Ok(Outcome::read(json!({
                        "family": family,
                        "index": null,
                        "waitMs": wait.as_millis() as u64,
                    })));
                };

                // Toast debouncing is left to long-lived hosts: a one-shot run
                // starts with a fresh debouncer every time.
                let header_style = manager.get_available_header_style(id, *family, model);
                Ok(Outcome::write(json!({
                    "family": family,
                    "model": model,
                    "index": index,
                    "email": email,
                    "headerStyle": header_style,
                })))
            }

            Command::MarkLimited {
                index,
                family,
                retry_after_ms,
                header_style,
                model,
            } => {
                let id = account_at(manager, *index)?;
                let retry_after_ms =
                    retry_after_ms.unwrap_or_else(|| self.rotation.default_retry_after());
                manager.mark_rate_limited(id, retry_after_ms, *family, *header_style, model.as_deref());
                Ok(Outcome::write(json!({
                    "index": index,
                    "quotaKey": QuotaKey::for_request(*family, *header_style),
                    "model": model,
                    "resetAt": now.saturating_add(retry_after_ms),
                })))
            }

            Command::Switch {
                index,
                family,
                reason,
            } => {
                let id = account_at(manager, *index)?;
                manager.mark_switched(id, *reason, *family);
                Ok(Outcome::write(json!({
                    "index": index,
                    "family": family,
                    "reason": reason,
                })))
            }

            Command::Remove { index } => {
                let id = account_at(manager, *index)?;
                manager.remove_account(id);
                Ok(Outcome::write(json!({
                    "removed": index,
                    "remaining": manager.account_count(),
                })))
            }

            Command::Wait { family } => {
                let wait = manager.get_min_wait_time_for_family(*family);
                Ok(Outcome::read(json!({
                    "family": family,
                    "waitMs": wait.as_millis() as u64,
                })))
            }

            Command::Help | Command::Migrate | Command::Clear => Ok(Outcome::read(Value::Null)),
        }
    }
}

fn account_at(manager: &AccountManager, index: usize) -> Result<AccountId> {
    manager
        .accounts()
        .get(index)
        .map(ManagedAccount::id)
        .ok_or(Error::NoSuchAccount(index))
}

/// Public view of one account; refresh tokens are never printed.
fn describe(account: &ManagedAccount, now: i64) -> Value {
    json!({
        "index": account.index,
        "email": account.email,
        "projectId": account.parts.project_id,
        "addedAt": account.added_at,
        "lastUsed": account.last_used,
        "lastSwitchReason": account.last_switch_reason,
        "rateLimitResetTimes": active_limits(&account.rate_limits, now),
        "modelRateLimitResetTimes": active_model_limits(&account.rate_limits, now),
    })
}

fn active_limits(limits: &RateLimitState, now: i64) -> Value {
    let active: Map<String, Value> = limits
        .base()
        .iter()
        .filter(|(_, reset)| **reset > now)
        .map(|(key, reset)| (key.as_str().to_string(), json!(reset)))
        .collect();
    Value::Object(active)
}

fn active_model_limits(limits: &RateLimitState, now: i64) -> Value {
    let active: Map<String, Value> = limits
        .by_model()
        .iter()
        .filter_map(|(key, models)| {
            let models: Map<String, Value> = models
                .iter()
                .filter(|(_, reset)| **reset > now)
                .map(|(model, reset)| (model.clone(), json!(reset)))
                .collect();
            (!models.is_empty()).then(|| (key.as_str().to_string(), Value::Object(models)))
        })
        .collect();
    Value::Object(active)
}
