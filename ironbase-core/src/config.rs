// ironbase-core/src/config.rs
// Typed, layered startup configuration: defaults -> config file -> environment.
// Every tunable named in the design (WAL batching, memtable threshold, bloom
// filter FPR, cache capacity, compaction cadence, HNSW defaults) lives here,
// validated once at construction rather than at first use.

use crate::error::{Error, Result};
use crate::vector::DistanceMetric;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Max records buffered before the WAL group-commit flush.
    pub wal_batch_size: usize,
    /// Max time between WAL flushes when the buffer is non-empty (milliseconds).
    pub wal_flush_interval_ms: u64,
    /// Active memtable byte-size threshold that triggers a flush.
    pub memtable_size_threshold: usize,
    /// Target false-positive rate for per-SSTable bloom filters.
    pub bloom_false_positive_rate: f64,
    /// Bounded LRU read-through cache capacity (entries).
    pub cache_capacity: usize,
    /// Background compaction sweep interval (milliseconds).
    pub compaction_interval_ms: u64,
    /// Compaction triggers once the SSTable count reaches this threshold.
    pub compaction_sstable_threshold: usize,
    /// HNSW `M`: max neighbors per node per layer above 0 (M0 = 2*M).
    pub hnsw_m: usize,
    /// HNSW `ef_construction`: candidate list size during insert.
    pub hnsw_ef_construction: usize,
    /// HNSW distance metric.
    pub hnsw_distance_metric: DistanceMetric,
    /// HNSW snapshot is saved to disk every N inserts.
    pub vector_snapshot_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wal_batch_size: 500,
            wal_flush_interval_ms: 10,
            // 256 MiB: resolves the source's 1 MB/256 MB discrepancy in favor
            // of the production figure (see DESIGN.md open-question log).
            memtable_size_threshold: 256 * 1024 * 1024,
            bloom_false_positive_rate: 0.01,
            cache_capacity: 10_000,
            compaction_interval_ms: 10_000,
            compaction_sstable_threshold: 3,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_distance_metric: DistanceMetric::Cosine,
            vector_snapshot_interval: 1_000,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn wal_flush_interval(&self) -> Duration {
        Duration::from_millis(self.wal_flush_interval_ms)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_millis(self.compaction_interval_ms)
    }

    pub fn hnsw_m0(&self) -> usize {
        self.hnsw_m * 2
    }

    /// Layer an optional config file (JSON) and environment variables
    /// (`IRONBASE_<FIELD>` uppercased) on top of the defaults, validating the
    /// final result. Matches the defaults -> file -> env override order.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let from_file: PartialConfig = serde_json::from_str(&text)?;
                from_file.apply(&mut cfg);
            }
        }

        apply_env_overrides(&mut cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wal_batch_size == 0 {
            return Err(Error::config("wal_batch_size must be > 0"));
        }
        if self.memtable_size_threshold == 0 {
            return Err(Error::config("memtable_size_threshold must be > 0"));
        }
        if !(0.0..1.0).contains(&self.bloom_false_positive_rate) {
            return Err(Error::config(
                "bloom_false_positive_rate must be in (0, 1)",
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::config("cache_capacity must be > 0"));
        }
        if self.compaction_sstable_threshold < 2 {
            return Err(Error::config("compaction_sstable_threshold must be >= 2"));
        }
        if self.hnsw_m == 0 {
            return Err(Error::config("hnsw_m must be > 0"));
        }
        if self.hnsw_ef_construction == 0 {
            return Err(Error::config("hnsw_ef_construction must be > 0"));
        }
        if self.vector_snapshot_interval == 0 {
            return Err(Error::config("vector_snapshot_interval must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    wal_batch_size: Option<usize>,
    wal_flush_interval_ms: Option<u64>,
    memtable_size_threshold: Option<usize>,
    bloom_false_positive_rate: Option<f64>,
    cache_capacity: Option<usize>,
    compaction_interval_ms: Option<u64>,
    compaction_sstable_threshold: Option<usize>,
    hnsw_m: Option<usize>,
    hnsw_ef_construction: Option<usize>,
    hnsw_distance_metric: Option<DistanceMetric>,
    vector_snapshot_interval: Option<usize>,
}

impl PartialConfig {
    fn apply(self, cfg: &mut Config) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            };
        }
        set!(wal_batch_size);
        set!(wal_flush_interval_ms);
        set!(memtable_size_threshold);
        set!(bloom_false_positive_rate);
        set!(cache_capacity);
        set!(compaction_interval_ms);
        set!(compaction_sstable_threshold);
        set!(hnsw_m);
        set!(hnsw_ef_construction);
        set!(hnsw_distance_metric);
        set!(vector_snapshot_interval);
    }
}

fn apply_env_overrides(cfg: &mut Config) -> Result<()> {
    fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
        match std::env::var(name) {
            Ok(val) => val
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::config(format!("invalid value for {name}"))),
            Err(_) => Ok(None),
        }
    }

    if let Some(v) = parse_env::<usize>("IRONBASE_WAL_BATCH_SIZE")? {
        cfg.wal_batch_size = v;
    }
    if let Some(v) = parse_env::<u64>("IRONBASE_WAL_FLUSH_INTERVAL_MS")? {
        cfg.wal_flush_interval_ms = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_MEMTABLE_SIZE_THRESHOLD")? {
        cfg.memtable_size_threshold = v;
    }
    if let Some(v) = parse_env::<f64>("IRONBASE_BLOOM_FALSE_POSITIVE_RATE")? {
        cfg.bloom_false_positive_rate = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_CACHE_CAPACITY")? {
        cfg.cache_capacity = v;
    }
    if let Some(v) = parse_env::<u64>("IRONBASE_COMPACTION_INTERVAL_MS")? {
        cfg.compaction_interval_ms = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_COMPACTION_SSTABLE_THRESHOLD")? {
        cfg.compaction_sstable_threshold = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_HNSW_M")? {
        cfg.hnsw_m = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_HNSW_EF_CONSTRUCTION")? {
        cfg.hnsw_ef_construction = v;
    }
    if let Some(v) = parse_env::<usize>("IRONBASE_VECTOR_SNAPSHOT_INTERVAL")? {
        cfg.vector_snapshot_interval = v;
    }
    Ok(())
}

/// Builder mirroring the small-typed-config-with-builder-methods convention
/// used elsewhere in this codebase (e.g. `DurabilityMode`/`FindOptions`).
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn wal_batch_size(mut self, v: usize) -> Self {
        self.cfg.wal_batch_size = v;
        self
    }

    pub fn wal_flush_interval_ms(mut self, v: u64) -> Self {
        self.cfg.wal_flush_interval_ms = v;
        self
    }

    pub fn memtable_size_threshold(mut self, v: usize) -> Self {
        self.cfg.memtable_size_threshold = v;
        self
    }

    pub fn cache_capacity(mut self, v: usize) -> Self {
        self.cfg.cache_capacity = v;
        self
    }

    pub fn compaction_interval_ms(mut self, v: u64) -> Self {
        self.cfg.compaction_interval_ms = v;
        self
    }

    pub fn compaction_sstable_threshold(mut self, v: usize) -> Self {
        self.cfg.compaction_sstable_threshold = v;
        self
    }

    pub fn hnsw_m(mut self, v: usize) -> Self {
        self.cfg.hnsw_m = v;
        self
    }

    pub fn hnsw_ef_construction(mut self, v: usize) -> Self {
        self.cfg.hnsw_ef_construction = v;
        self
    }

    pub fn hnsw_distance_metric(mut self, v: DistanceMetric) -> Self {
        self.cfg.hnsw_distance_metric = v;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_memtable_threshold() {
        let cfg = Config::builder().memtable_size_threshold(0).build();
        assert!(cfg.is_err());
    }

    #[test]
    fn rejects_invalid_bloom_rate() {
        let mut cfg = Config::default();
        cfg.bloom_false_positive_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = Config::builder().hnsw_m(32).cache_capacity(500).build().unwrap();
        assert_eq!(cfg.hnsw_m, 32);
        assert_eq!(cfg.hnsw_m0(), 64);
        assert_eq!(cfg.cache_capacity, 500);
    }

    #[test]
    fn env_override_applies_and_validates() {
        std::env::set_var("IRONBASE_HNSW_M", "8");
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.hnsw_m, 8);
        std::env::remove_var("IRONBASE_HNSW_M");
    }
}
