//! Configuration for the ledger

use crate::settlement::SettlementCheck;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TAB_LEDGER_";

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Persistence backend
    pub storage: StorageConfig,

    /// Writer task configuration
    pub actor: ActorConfig,

    /// Settlement predicate semantics
    pub settlement: SettlementConfig,

    /// Output formatting
    pub presentation: PresentationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "tab-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            actor: ActorConfig::default(),
            settlement: SettlementConfig::default(),
            presentation: PresentationConfig::default(),
        }
    }
}

/// Which gateway backs the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// RocksDB under `data_dir`
    #[default]
    Rocksdb,
    /// Process memory; nothing survives a restart
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" => Ok(StorageBackend::Rocksdb),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(crate::Error::Config(format!("Unknown storage backend: {}", other))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: StorageBackend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB tuning
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("./data/tab-ledger"),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Writer task configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size; senders wait when it is full
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
        }
    }
}

/// Settlement configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// How "repaid" and "confirmed" predicates read an activity
    pub check: SettlementCheck,
}

/// Presentation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Decimal places for amounts handed to callers
    pub decimal_places: u32,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self { decimal_places: 2 }
    }
}

impl Config {
    /// Config for tests and embedding: in-memory storage
    pub fn in_memory() -> Self {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Self::from_vars(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(backend) = var("STORAGE_BACKEND") {
            config.storage.backend = backend.parse()?;
        }

        if let Some(data_dir) = var("DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(capacity) = var("MAILBOX_CAPACITY") {
            config.actor.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid mailbox capacity {}: {}", capacity, e))
            })?;
        }

        if let Some(check) = var("SETTLEMENT_CHECK") {
            config.settlement.check = match check.trim().to_ascii_lowercase().as_str() {
                "payer_entries" => SettlementCheck::PayerEntries,
                "literal_all_entries" => SettlementCheck::LiteralAllEntries,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown settlement check: {}",
                        other
                    )))
                }
            };
        }

        if let Some(places) = var("DECIMAL_PLACES") {
            config.presentation.decimal_places = places.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid decimal places {}: {}", places, e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actor.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        // rust_decimal keeps at most 28 fractional digits
        if self.presentation.decimal_places > 28 {
            return Err(crate::Error::Config(
                "presentation.decimal_places must be at most 28".to_string(),
            ));
        }
        Ok(())
    }
}
