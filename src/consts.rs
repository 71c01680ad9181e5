use std::time::Duration;

pub const DEFAULT_ENV_VAR_PREFIX: &str = "PLANKTON";
pub const DEFAULT_CONFIG_PATH: &str = "./plankton.yaml";

pub const IPFIX_VERSION: u16 = 10;
pub const NETFLOW_V5_VERSION: u16 = 5;

/// Exporters occasionally report interface indexes in the billions.
/// Anything at or above this is treated as not reported.
pub const EXPORT_INTERFACE_SANE_LIMIT: u32 = 10_000;

/// Caches are swept at most once per this many seconds of wall clock.
pub const CACHE_SWEEP_GATE_SECS: i64 = 1;

pub const SPILL_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);
