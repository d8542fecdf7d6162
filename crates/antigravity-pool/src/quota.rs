//! Quota model: families, header styles and rate-limit buckets
//!
//! A request targets a model family and is sent with a header style. The
//! pair maps to exactly one quota key, which is the bucket an upstream rate
//! limit is charged against:
//!
//! | family | header style  | quota key            |
//! |--------|---------------|----------------------|
//! | claude | any           | `claude`             |
//! | gemini | `gemini-cli`  | `gemini-cli`         |
//! | gemini | `antigravity` | `gemini-antigravity` |
//!
//! Limits can also be scoped to a single model id under a quota key. A
//! base-level limit blocks every model under that key; a model-level limit
//! blocks only that model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Coarse provider grouping, each with its own sticky cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Claude,
    Gemini,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::Claude, ModelFamily::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Claude => "claude",
            ModelFamily::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(ModelFamily::Claude),
            "gemini" => Ok(ModelFamily::Gemini),
            other => Err(format!("unknown model family: {other}")),
        }
    }
}

/// Request variant used to reach an upstream; gemini has one quota per style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderStyle {
    #[default]
    Antigravity,
    GeminiCli,
}

impl HeaderStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderStyle::Antigravity => "antigravity",
            HeaderStyle::GeminiCli => "gemini-cli",
        }
    }
}

impl fmt::Display for HeaderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "antigravity" => Ok(HeaderStyle::Antigravity),
            "gemini-cli" => Ok(HeaderStyle::GeminiCli),
            other => Err(format!("unknown header style: {other}")),
        }
    }
}

/// Finest-grained rate-limit bucket on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaKey {
    Claude,
    GeminiAntigravity,
    GeminiCli,
}

impl QuotaKey {
    pub const ALL: [QuotaKey; 3] = [
        QuotaKey::Claude,
        QuotaKey::GeminiAntigravity,
        QuotaKey::GeminiCli,
    ];

    /// Bucket charged for a request of `family` sent with `style`.
    pub fn for_request(family: ModelFamily, style: HeaderStyle) -> Self {
        match (family, style) {
            (ModelFamily::Claude, _) => QuotaKey::Claude,
            (ModelFamily::Gemini, HeaderStyle::GeminiCli) => QuotaKey::GeminiCli,
            (ModelFamily::Gemini, HeaderStyle::Antigravity) => QuotaKey::GeminiAntigravity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKey::Claude => "claude",
            QuotaKey::GeminiAntigravity => "gemini-antigravity",
            QuotaKey::GeminiCli => "gemini-cli",
        }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optional value per quota key, serialized with the quota key names.
///
/// Slots are read independently: a malformed value drops only its own slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: SlotValue"))]
pub struct QuotaSlots<T> {
    #[serde(
        default,
        deserialize_with = "lenient_slot",
        skip_serializing_if = "Option::is_none"
    )]
    pub claude: Option<T>,
    #[serde(
        rename = "gemini-antigravity",
        default,
        deserialize_with = "lenient_slot",
        skip_serializing_if = "Option::is_none"
    )]
    pub gemini_antigravity: Option<T>,
    #[serde(
        rename = "gemini-cli",
        default,
        deserialize_with = "lenient_slot",
        skip_serializing_if = "Option::is_none"
    )]
    pub gemini_cli: Option<T>,
}

/// A value stored in a quota slot, read leniently from JSON.
pub trait SlotValue: Sized {
    fn from_json(value: Value) -> Option<Self>;
}

impl SlotValue for i64 {
    fn from_json(value: Value) -> Option<Self> {
        millis_from_value(&value)
    }
}

/// Per-model entries are kept or dropped one by one; an empty map is absent.
impl SlotValue for BTreeMap<String, i64> {
    fn from_json(value: Value) -> Option<Self> {
        let Value::Object(models) = value else {
            return None;
        };
        let models: Self = models
            .into_iter()
            .filter_map(|(model, reset)| millis_from_value(&reset).map(|reset| (model, reset)))
            .collect();
        (!models.is_empty()).then_some(models)
    }
}

fn lenient_slot<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: SlotValue,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(T::from_json))
}

/// Any JSON number as unix milliseconds, floored, negatives clamped to zero.
pub(crate) fn millis_from_value(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n.max(0));
    }
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .map(|n| n.max(0.0).floor() as i64)
}

impl<T> QuotaSlots<T> {
    pub fn get(&self, key: QuotaKey) -> Option<&T> {
        match key {
            QuotaKey::Claude => self.claude.as_ref(),
            QuotaKey::GeminiAntigravity => self.gemini_antigravity.as_ref(),
            QuotaKey::GeminiCli => self.gemini_cli.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, key: QuotaKey) -> &mut Option<T> {
        match key {
            QuotaKey::Claude => &mut self.claude,
            QuotaKey::GeminiAntigravity => &mut self.gemini_antigravity,
            QuotaKey::GeminiCli => &mut self.gemini_cli,
        }
    }

    pub fn is_empty(&self) -> bool {
        QuotaKey::ALL.iter().all(|key| self.get(*key).is_none())
    }

    /// Occupied slots in `QuotaKey::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (QuotaKey, &T)> {
        QuotaKey::ALL
            .into_iter()
            .filter_map(move |key| self.get(key).map(|value| (key, value)))
    }
}

/// Reset timestamps (unix ms) per quota key.
pub type RateLimitResetTimes = QuotaSlots<i64>;

/// Reset timestamps (unix ms) per quota key, then per model id.
pub type ModelRateLimitResetTimes = QuotaSlots<BTreeMap<String, i64>>;

/// Live rate-limit state of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    base: RateLimitResetTimes,
    by_model: ModelRateLimitResetTimes,
}

impl RateLimitState {
    pub fn new(base: RateLimitResetTimes, by_model: ModelRateLimitResetTimes) -> Self {
        Self { base, by_model }
    }

    pub fn base(&self) -> &RateLimitResetTimes {
        &self.base
    }

    pub fn by_model(&self) -> &ModelRateLimitResetTimes {
        &self.by_model
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.by_model.is_empty()
    }

    /// Base reset time for `key`, expired or not.
    pub fn reset_time(&self, key: QuotaKey) -> Option<i64> {
        self.base.get(key).copied()
    }

    /// Record a limit on `key` (or on `model` under `key`) lasting until `reset_at`.
    pub fn mark(&mut self, key: QuotaKey, model: Option<&str>, reset_at: i64) {
        match model {
            None => *self.base.slot_mut(key) = Some(reset_at),
            Some(model) => {
                self.by_model
                    .slot_mut(key)
                    .get_or_insert_with(BTreeMap::new)
                    .insert(model.to_string(), reset_at);
            }
        }
    }

    /// Delete every entry whose reset time is at or before `now`.
    pub fn clear_expired(&mut self, now: i64) {
        for key in QuotaKey::ALL {
            let base = self.base.slot_mut(key);
            if base.is_some_and(|reset| reset <= now) {
                *base = None;
            }

            let models = self.by_model.slot_mut(key);
            if let Some(map) = models.as_mut() {
                map.retain(|_, reset| *reset > now);
                if map.is_empty() {
                    *models = None;
                }
            }
        }
    }

    /// Whether `key` is limited for `model`, checking the model scope first
    /// and then the base key.
    pub fn is_limited(&self, key: QuotaKey, model: Option<&str>, now: i64) -> bool {
        let model_limited = model
            .and_then(|model| self.by_model.get(key).and_then(|map| map.get(model)))
            .is_some_and(|reset| now < *reset);
        model_limited || self.base.get(key).is_some_and(|reset| now < *reset)
    }

    /// Claude needs its single key open; gemini is limited only when both
    /// sub-quotas are.
    pub fn is_limited_for_family(&self, family: ModelFamily, model: Option<&str>, now: i64) -> bool {
        match family {
            ModelFamily::Claude => self.is_limited(QuotaKey::Claude, model, now),
            ModelFamily::Gemini => {
                self.is_limited(QuotaKey::GeminiAntigravity, model, now)
                    && self.is_limited(QuotaKey::GeminiCli, model, now)
            }
        }
    }

    /// First usable header style in fixed preference order.
    pub fn available_header_style(
        &self,
        family: ModelFamily,
        model: Option<&str>,
        now: i64,
    ) -> Option<HeaderStyle> {
        [HeaderStyle::Antigravity, HeaderStyle::GeminiCli]
            .into_iter()
            .take(match family {
                ModelFamily::Claude => 1,
                ModelFamily::Gemini => 2,
            })
            .find(|style| !self.is_limited(QuotaKey::for_request(family, *style), model, now))
    }

    /// Milliseconds until the family reopens on this account, if it has any
    /// relevant base timestamp. Gemini reopens when either sub-quota does.
    pub fn family_wait_millis(&self, family: ModelFamily, now: i64) -> Option<i64> {
        let remaining = |key: QuotaKey| self.reset_time(key).map(|reset| (reset - now).max(0));
        match family {
            ModelFamily::Claude => remaining(QuotaKey::Claude),
            ModelFamily::Gemini => [QuotaKey::GeminiAntigravity, QuotaKey::GeminiCli]
                .into_iter()
                .filter_map(remaining)
                .min(),
        }
    }
}
