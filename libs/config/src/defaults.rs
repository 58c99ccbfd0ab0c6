//! Default values shared by the config loader and the runtime crates

/// Cluster-wide defaults
pub mod cluster {
    /// Root directory for every key and channel this cluster uses
    pub const NAMESPACE: &str = "server";

    /// Synchronous call timeout (milliseconds)
    pub const CALL_TIMEOUT_MS: u64 = 500;

    /// Service registration lease TTL (seconds)
    pub const SERVICE_TTL_SECS: i64 = 10;

    /// Backoff before re-opening a failed store watch (milliseconds)
    pub const WATCH_RETRY_MS: u64 = 1_000;

    pub const NODE_IP: &str = "127.0.0.1";
    pub const NODE_PORT: u16 = 31700;
}

/// Stub election defaults
pub mod stub {
    /// Slot lease TTL (seconds)
    pub const TTL_SECS: i64 = 30;

    /// Election loop poll interval (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 100;
}

pub const LOG_LEVEL: &str = "info";
