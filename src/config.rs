//! Configuration for bucketcache

use crate::storage::size_classes;
use serde::Deserialize;

/// Bytes per MiB
const MIB: usize = 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
}

/// UDP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,

    /// Number of worker tasks, each with its own request engine (0 = number of CPUs)
    pub workers: usize,

    /// Receive buffer size per worker (bytes)
    pub recv_buffer_size: usize,

    /// Initial reply buffer capacity per worker (bytes)
    pub send_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:11211".to_string(),
            workers: 0,
            recv_buffer_size: 65536,
            send_buffer_size: 16384,
        }
    }
}

impl ServerConfig {
    /// Worker count with 0 resolved to the available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// Cache engine configuration (bucket allocator and sharded index)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory budget for item pages in MiB
    pub memory_limit_mb: usize,

    /// Page size in bytes
    pub page_size: usize,

    /// Item size of the smallest class in bytes
    pub min_item_size: usize,

    /// Ratio between consecutive class sizes
    pub growth_factor: f64,

    /// Number of size classes
    pub max_classes: usize,

    /// Index has 2^shard_bits shards
    ///
    /// Each empty shard costs 32 bytes on 64-bit targets, allocated at startup
    /// on top of `memory_limit_mb`: the default of 24 bits takes 512 MiB.
    /// Around 16 bits (2 MiB) suits small budgets and tests.
    pub shard_bits: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 1024,
            page_size: MIB,
            min_item_size: 512,
            growth_factor: 1.25,
            max_classes: 16,
            shard_bits: 24,
        }
    }
}

impl CacheConfig {
    /// Memory budget in bytes
    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb.saturating_mul(MIB)
    }

    /// Check that the allocator and index can be built from these settings
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(crate::BucketCacheError::Config(msg));

        if self.page_size == 0 {
            return invalid("page_size must be non-zero".to_string());
        }
        if self.min_item_size == 0 {
            return invalid("min_item_size must be non-zero".to_string());
        }
        if self.growth_factor.is_nan() || self.growth_factor <= 1.0 {
            return invalid(format!(
                "growth_factor must be greater than 1.0, got {}",
                self.growth_factor
            ));
        }
        if self.max_classes == 0 {
            return invalid("max_classes must be non-zero".to_string());
        }
        if !(1..=28).contains(&self.shard_bits) {
            return invalid(format!(
                "shard_bits must be within 1..=28, got {}",
                self.shard_bits
            ));
        }

        let classes = size_classes(self.min_item_size, self.growth_factor, self.max_classes);
        for pair in classes.windows(2) {
            if pair[1] <= pair[0] {
                return invalid(format!(
                    "growth_factor {} does not separate classes at {} bytes",
                    self.growth_factor, pair[0]
                ));
            }
        }
        if let Some(&largest) = classes.last()
            && largest > self.page_size
        {
            return invalid(format!(
                "largest size class ({largest} bytes) exceeds page_size ({} bytes)",
                self.page_size
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::BucketCacheError::Config(format!("Failed to read config file: {e}"))
        })?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::BucketCacheError::Config(format!("Failed to parse config: {e}")))?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BUCKETCACHE_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Ok(workers) = std::env::var("BUCKETCACHE_WORKERS")
            && let Ok(n) = workers.parse()
        {
            config.server.workers = n;
        }

        if let Ok(limit) = std::env::var("BUCKETCACHE_MEMORY_LIMIT_MB")
            && let Ok(n) = limit.parse()
        {
            config.cache.memory_limit_mb = n;
        }

        if let Ok(bits) = std::env::var("BUCKETCACHE_SHARD_BITS")
            && let Ok(n) = bits.parse()
        {
            config.cache.shard_bits = n;
        }

        config.cache.validate()?;
        Ok(config)
    }
}
