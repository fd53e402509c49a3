//! Configuration for a Tessera coordinator.
//!
//! Every section has a usable [`Default`], and all sections deserialize
//! with `#[serde(default)]`, so a config file only needs the fields it
//! changes. Durations are stored as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::{NodeAddress, RoleType};

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("[{code}] invalid config: {0}", code = crate::error_codes::INVALID_CONFIG)]
    Invalid(String),

    /// The config document could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Snapshot sequencer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Number of stores expected in the commit quorum at startup.
    ///
    /// `Some(n)` seeds the quorum with store ids `0..n`; the watermark does
    /// not advance until all of them have reported. `None` lets every store
    /// that reports participate, until discovery supplies a quorum.
    pub store_count: Option<u32>,
    /// How many write-snapshot ids are reserved per persisted ceiling.
    pub id_reservation: u64,
    /// Interval between background writes of snapshot progress.
    pub persist_interval_ms: u64,
    /// Interval of the automatic write-snapshot advance.
    ///
    /// Stores only report closed snapshots, so without the advance nothing
    /// tagged with the open id commits. `None` leaves advancing to the
    /// caller.
    pub snapshot_increase_interval_ms: Option<u64>,
}

impl SequencerConfig {
    /// Background persist interval.
    #[must_use]
    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    /// Automatic advance interval, if enabled.
    #[must_use]
    pub fn snapshot_increase_interval(&self) -> Option<Duration> {
        self.snapshot_increase_interval_ms.map(Duration::from_millis)
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            store_count: None,
            id_reservation: 1_000,
            persist_interval_ms: 1_000,
            snapshot_increase_interval_ms: Some(1_000),
        }
    }
}

/// Schema manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Number of graph partitions DDL operations are fanned out to.
    pub partition_count: u32,
    /// Fixed delay before a failed recovery is retried.
    pub recovery_backoff_ms: u64,
}

impl SchemaConfig {
    /// Delay between recovery attempts.
    #[must_use]
    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_ms)
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            partition_count: 1,
            recovery_backoff_ms: 1_000,
        }
    }
}

/// Cluster discovery settings for the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Role the local node registers under.
    pub role: RoleType,
    /// Index of the local node within its role.
    pub node_index: u32,
    /// Address other nodes use to reach the local node.
    pub address: NodeAddress,
    /// Roles whose membership is watched.
    pub watched_roles: Vec<RoleType>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            role: RoleType::Coordinator,
            node_index: 0,
            address: NodeAddress::new("127.0.0.1", 55_500),
            watched_roles: RoleType::ALL.to_vec(),
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Snapshot sequencer settings.
    pub sequencer: SequencerConfig,
    /// Schema manager settings.
    pub schema: SchemaConfig,
    /// Discovery settings.
    pub discovery: DiscoveryConfig,
}

impl CoordinatorConfig {
    /// Parse a JSON config document and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sequencer.id_reservation == 0 {
            return Err(ConfigError::Invalid(
                "sequencer.id_reservation must be at least 1".into(),
            ));
        }
        if self.sequencer.persist_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sequencer.persist_interval_ms must be positive".into(),
            ));
        }
        if self.sequencer.snapshot_increase_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "sequencer.snapshot_increase_interval_ms must be positive".into(),
            ));
        }
        if self.schema.partition_count == 0 {
            return Err(ConfigError::Invalid(
                "schema.partition_count must be at least 1".into(),
            ));
        }
        if self.discovery.address.host.is_empty() {
            return Err(ConfigError::Invalid("discovery.address.host is empty".into()));
        }
        Ok(())
    }
}
