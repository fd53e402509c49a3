//! Tessera structured error code registry.
//!
//! Operator-facing log lines carry a stable `TSR-NNNN` code so that they
//! can be grepped across versions. Codes are never reused.
//!
//! | Range | Category |
//! |-------|----------|
//! | `TSR-0xxx` | Configuration |
//! | `TSR-1xxx` | Meta store / persistence |
//! | `TSR-2xxx` | Snapshot sequencing |
//! | `TSR-3xxx` | Schema / DDL |
//! | `TSR-4xxx` | Discovery |

// ── Configuration (TSR-0xxx) ──

/// Invalid configuration value.
pub const INVALID_CONFIG: &str = "TSR-0001";

// ── Meta store (TSR-1xxx) ──

/// Persisting snapshot progress to the meta store failed.
pub const SNAPSHOT_PERSIST_FAILED: &str = "TSR-1001";

// ── Snapshot sequencing (TSR-2xxx) ──

/// The periodic write-snapshot advance failed.
pub const SNAPSHOT_ADVANCE_FAILED: &str = "TSR-2001";
/// A store report was older than what the store already reported.
pub const STALE_COMMIT_REPORT: &str = "TSR-2002";

// ── Schema / DDL (TSR-3xxx) ──

/// A DDL batch failed; the schema manager re-enters recovery.
pub const DDL_FAILED: &str = "TSR-3001";
/// Schema recovery failed and will be retried.
pub const SCHEMA_RECOVERY_FAILED: &str = "TSR-3002";

// ── Discovery (TSR-4xxx) ──

/// A membership listener panicked while handling a notification.
pub const DISCOVERY_LISTENER_PANICKED: &str = "TSR-4001";
/// The discovery backend connection degraded.
pub const DISCOVERY_BACKEND_DEGRADED: &str = "TSR-4002";
/// Removing the local registration on shutdown failed.
pub const DISCOVERY_DEREGISTER_FAILED: &str = "TSR-4003";
