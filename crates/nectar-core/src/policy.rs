// ── Fetch policies ──
//
// Rules governing whether cached data is trusted and whether a network
// fetch is still issued. Semantics follow the common client-cache
// vocabulary; `CacheFirst` is the default.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a query combines cached data with network fetches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Adopt ready cached data and skip the fetch; fetch otherwise.
    #[default]
    CacheFirst,
    /// Use cached data if present; fail with missing-cache-data otherwise.
    /// Never fetches.
    CacheOnly,
    /// Adopt ready cached data immediately and fetch unconditionally anyway.
    CacheAndNetwork,
    /// Ignore cached data; always fetch.
    NetworkOnly,
    /// Always fetch through a fresh resource that is never registered in
    /// the cache.
    NoCache,
}
