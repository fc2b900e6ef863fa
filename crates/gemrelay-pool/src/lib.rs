pub mod day;
pub mod quota;
pub mod selector;
pub mod usage;

pub use quota::{QuotaCategory, QuotaScope, ResolvedQuota};
pub use selector::{KeyPool, PoolError, SelectedKey};
pub use usage::Bookkeeper;

/// Back-to-back quota-exhaustion responses tolerated per (credential,
/// model-or-category) before the counter is forced to its limit.
pub const CONSECUTIVE_429_LIMIT: u32 = 3;
