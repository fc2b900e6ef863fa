use gemrelay_store::records::{CategoryQuotas, CredentialRecord, ModelCategory, ModelConfig};

/// The counter a quota applies to: one model's own counter, or the shared
/// counter of its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaScope {
    Model(String),
    Category(QuotaCategory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCategory {
    Pro,
    Flash,
}

impl QuotaScope {
    /// Stable key for the per-scope consecutive-429 counters.
    pub fn key(&self) -> String {
        match self {
            Self::Model(model) => format!("model:{model}"),
            Self::Category(QuotaCategory::Pro) => "category:pro".to_owned(),
            Self::Category(QuotaCategory::Flash) => "category:flash".to_owned(),
        }
    }

    pub fn usage(&self, record: &CredentialRecord) -> u64 {
        match self {
            Self::Model(model) => record.model_usage.get(model).copied().unwrap_or(0),
            Self::Category(QuotaCategory::Pro) => record.category_usage.pro,
            Self::Category(QuotaCategory::Flash) => record.category_usage.flash,
        }
    }

    pub fn set_usage(&self, record: &mut CredentialRecord, value: u64) {
        match self {
            Self::Model(model) => {
                record.model_usage.insert(model.clone(), value);
            }
            Self::Category(QuotaCategory::Pro) => record.category_usage.pro = value,
            Self::Category(QuotaCategory::Flash) => record.category_usage.flash = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuota {
    pub scope: QuotaScope,
    pub limit: u64,
}

/// Per-model quotas win over the shared category quota; an absent or zero
/// limit means unlimited (no resolved quota).
pub fn resolve(
    model: &str,
    config: &ModelConfig,
    category_quotas: &CategoryQuotas,
) -> Option<ResolvedQuota> {
    let limited = |limit: Option<u64>| limit.filter(|limit| *limit > 0);
    match config.category {
        ModelCategory::Custom => limited(config.quota).map(|limit| ResolvedQuota {
            scope: QuotaScope::Model(model.to_owned()),
            limit,
        }),
        ModelCategory::Pro | ModelCategory::Flash => {
            if let Some(limit) = limited(config.individual_quota) {
                return Some(ResolvedQuota {
                    scope: QuotaScope::Model(model.to_owned()),
                    limit,
                });
            }
            let category = match config.category {
                ModelCategory::Pro => QuotaCategory::Pro,
                _ => QuotaCategory::Flash,
            };
            let limit = match category {
                QuotaCategory::Pro => category_quotas.pro,
                QuotaCategory::Flash => category_quotas.flash,
            };
            limited(limit).map(|limit| ResolvedQuota {
                scope: QuotaScope::Category(category),
                limit,
            })
        }
    }
}
