//! Storage tier router.
//!
//! Pure decision function: given size, scope and access pattern, selects the
//! backend tier. No I/O.

use serde::{Deserialize, Serialize};

use crate::reference::{Scope, StoreTier};

/// Default tier thresholds in bytes.
pub const MEMORY_MAX: u64 = 10 * 1024;
pub const KV_MAX: u64 = 1024 * 1024;
pub const OBJECT_MAX: u64 = 10 * 1024 * 1024;

/// How the stored data will be accessed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    /// Single read after write.
    #[default]
    ReadOnce,
    /// Multiple reads during execution.
    ReadMulti,
    /// Needs filtering; implies the queryable tier.
    Query,
}

/// Explicit tier choice in a step's output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TierSpec {
    /// Fall through to automatic selection.
    #[default]
    Auto,
    Memory,
    Kv,
    Object,
    BlobA,
    BlobB,
    Db,
}

/// Step output `store` block.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputStoreSpec {
    #[serde(default)]
    pub kind: TierSpec,
    /// Data must support filtering downstream.
    #[serde(default)]
    pub queryable: bool,
}

/// Static per-tier defaults used to seed configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TierDefaults {
    pub max_bytes: Option<u64>,
    pub ttl_seconds: Option<u64>,
    pub bucket: Option<&'static str>,
    pub prefix: Option<&'static str>,
}

/// Automatic storage tier selection.
///
/// Tier thresholds (defaults):
/// - memory: <= 10KB, step scope only
/// - kv: <= 1MB
/// - object: <= 10MB
/// - above: configured default cloud-blob tier
/// - query access pattern: db, regardless of size
#[derive(Debug, Clone)]
pub struct StorageRouter {
    default_cloud_tier: StoreTier,
    prefer_kv_for_small: bool,
    memory_max: u64,
    kv_max: u64,
    object_max: u64,
}

impl Default for StorageRouter {
    fn default() -> Self {
        Self {
            default_cloud_tier: StoreTier::BlobA,
            prefer_kv_for_small: false,
            memory_max: MEMORY_MAX,
            kv_max: KV_MAX,
            object_max: OBJECT_MAX,
        }
    }
}

impl StorageRouter {
    pub fn new(default_cloud_tier: StoreTier, prefer_kv_for_small: bool) -> Self {
        Self {
            default_cloud_tier,
            prefer_kv_for_small,
            ..Self::default()
        }
    }

    /// Override the tier size thresholds.
    pub fn with_thresholds(mut self, memory_max: u64, kv_max: u64, object_max: u64) -> Self {
        self.memory_max = memory_max.max(1);
        self.kv_max = kv_max.max(1);
        self.object_max = object_max.max(1);
        self
    }

    /// Tier used for payloads above the object threshold.
    pub fn default_cloud_tier(&self) -> StoreTier {
        self.default_cloud_tier
    }

    /// Select the storage tier, in priority order:
    /// 1. explicit `force_tier` override
    /// 2. query access pattern -> db
    /// 3. step-scoped small data -> memory (unless kv is preferred for small)
    /// 4. size thresholds: kv, object, default cloud tier
    ///
    /// `content_type` is reserved for format-aware placement and does not
    /// currently influence the decision.
    pub fn select_tier(
        &self,
        size_bytes: u64,
        scope: Scope,
        access_pattern: AccessPattern,
        _content_type: Option<&str>,
        force_tier: Option<StoreTier>,
    ) -> StoreTier {
        if let Some(tier) = force_tier {
            return tier;
        }

        if access_pattern == AccessPattern::Query {
            return StoreTier::Db;
        }

        if scope == Scope::Step && size_bytes <= self.memory_max && !self.prefer_kv_for_small {
            return StoreTier::Memory;
        }

        if size_bytes <= self.kv_max {
            return StoreTier::Kv;
        }

        if size_bytes <= self.object_max {
            return StoreTier::Object;
        }

        self.default_cloud_tier
    }

    /// Select the tier from a step's declared output configuration.
    ///
    /// An explicit tier name short-circuits; `auto` falls through to
    /// `select_tier`, treating `queryable` outputs as the query pattern.
    pub fn select_tier_for_output(
        &self,
        estimated_bytes: u64,
        output: &OutputStoreSpec,
        scope: Scope,
    ) -> StoreTier {
        match output.kind {
            TierSpec::Auto => {
                let access_pattern = if output.queryable {
                    AccessPattern::Query
                } else {
                    AccessPattern::ReadOnce
                };
                self.select_tier(estimated_bytes, scope, access_pattern, None, None)
            }
            TierSpec::Memory => StoreTier::Memory,
            TierSpec::Kv => StoreTier::Kv,
            TierSpec::Object => StoreTier::Object,
            TierSpec::BlobA => StoreTier::BlobA,
            TierSpec::BlobB => StoreTier::BlobB,
            TierSpec::Db => StoreTier::Db,
        }
    }

    /// Default configuration for a storage tier.
    pub fn tier_defaults(&self, tier: StoreTier) -> TierDefaults {
        match tier {
            StoreTier::Memory => TierDefaults {
                max_bytes: Some(self.memory_max),
                ttl_seconds: Some(300),
                bucket: None,
                prefix: None,
            },
            StoreTier::Kv => TierDefaults {
                max_bytes: Some(self.kv_max),
                ttl_seconds: Some(3_600),
                bucket: Some("baton_result_refs"),
                prefix: None,
            },
            StoreTier::Object => TierDefaults {
                max_bytes: Some(self.object_max),
                ttl_seconds: Some(1_800),
                bucket: Some("baton_result_objects"),
                prefix: None,
            },
            StoreTier::BlobA | StoreTier::BlobB => TierDefaults {
                max_bytes: None,
                ttl_seconds: Some(7_200),
                bucket: Some("baton-results"),
                prefix: Some("results/"),
            },
            StoreTier::Db => TierDefaults {
                max_bytes: None,
                ttl_seconds: Some(7_200),
                bucket: None,
                prefix: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let router = StorageRouter::default();
        assert_eq!(
            router.select_tier(5_000, Scope::Step, AccessPattern::ReadOnce, None, None),
            StoreTier::Memory,
        );
        assert_eq!(
            router.select_tier(500_000, Scope::Execution, AccessPattern::ReadOnce, None, None),
            StoreTier::Kv,
        );
        assert_eq!(
            router.select_tier(5_000_000, Scope::Execution, AccessPattern::ReadOnce, None, None),
            StoreTier::Object,
        );
        assert_eq!(
            router.select_tier(50_000_000, Scope::Execution, AccessPattern::ReadOnce, None, None),
            StoreTier::BlobA,
        );
    }

    #[test]
    fn test_prefer_kv_for_small_skips_memory() {
        let router = StorageRouter::new(StoreTier::BlobA, true);
        assert_eq!(
            router.select_tier(5_000, Scope::Step, AccessPattern::ReadOnce, None, None),
            StoreTier::Kv,
        );
        // Execution scope never lands in memory either way.
        let router = StorageRouter::default();
        assert_eq!(
            router.select_tier(5_000, Scope::Execution, AccessPattern::ReadOnce, None, None),
            StoreTier::Kv,
        );
    }

    #[test]
    fn test_query_pattern_always_selects_db() {
        let router = StorageRouter::default();
        assert_eq!(
            router.select_tier(50_000_000, Scope::Execution, AccessPattern::Query, None, None),
            StoreTier::Db,
        );
    }

    #[test]
    fn test_force_tier_wins() {
        let router = StorageRouter::default();
        assert_eq!(
            router.select_tier(
                5,
                Scope::Step,
                AccessPattern::ReadOnce,
                None,
                Some(StoreTier::BlobB),
            ),
            StoreTier::BlobB,
        );
    }

    #[test]
    fn test_output_spec_short_circuits_or_falls_through() {
        let router = StorageRouter::default();

        let explicit = OutputStoreSpec {
            kind: TierSpec::BlobB,
            queryable: false,
        };
        assert_eq!(
            router.select_tier_for_output(10, &explicit, Scope::Execution),
            StoreTier::BlobB,
        );

        let queryable = OutputStoreSpec {
            kind: TierSpec::Auto,
            queryable: true,
        };
        assert_eq!(
            router.select_tier_for_output(10, &queryable, Scope::Execution),
            StoreTier::Db,
        );

        let auto = OutputStoreSpec::default();
        assert_eq!(
            router.select_tier_for_output(500_000, &auto, Scope::Execution),
            StoreTier::Kv,
        );
    }

    #[test]
    fn test_custom_cloud_tier() {
        let router = StorageRouter::new(StoreTier::BlobB, true);
        assert_eq!(
            router.select_tier(50_000_000, Scope::Execution, AccessPattern::ReadOnce, None, None),
            StoreTier::BlobB,
        );
    }
}
