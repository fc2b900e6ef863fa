use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One upstream credential. Counters are meaningful only while `usage_date`
/// equals the current usage day; stale stamps read as zero (lazy reset).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialRecord {
    pub secret: String,
    pub name: String,
    pub usage: u64,
    pub usage_date: String,
    pub model_usage: BTreeMap<String, u64>,
    pub category_usage: CategoryUsage,
    pub error_status: Option<PermanentError>,
    pub consecutive_429: BTreeMap<String, u32>,
}

impl CredentialRecord {
    pub fn new(secret: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryUsage {
    pub pro: u64,
    pub flash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentError {
    Unauthorized,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Pro,
    Flash,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub category: ModelCategory,
    /// Daily limit for `Custom` models; absent or zero means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<u64>,
    /// Per-model override of the shared category quota for `Pro`/`Flash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_quota: Option<u64>,
}

/// Shared daily limits per category; absent or zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryQuotas {
    pub pro: Option<u64>,
    pub flash: Option<u64>,
}

/// A proxy access key as stored; the bearer value itself is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessKey {
    pub name: Option<String>,
    pub safety_enabled: bool,
}

impl Default for AccessKey {
    fn default() -> Self {
        Self {
            name: None,
            safety_enabled: true,
        }
    }
}
