//! # Hive Cluster Configuration
//!
//! Configuration loading and defaults for every Hive process.
//!
//! ## Features
//!
//! - **Defaults**: namespace, call timeout, lease TTLs, stub poll interval
//! - **Loading**: optional TOML file plus `HIVE_` environment overrides
//! - **Validation**: rejects configurations the runtime cannot operate under
//!
//! ## Usage
//!
//! ```rust
//! use hive_config::ClusterConfig;
//!
//! let config = ClusterConfig::default();
//! assert_eq!(config.namespace, "server");
//! assert!(config.validate().is_ok());
//! ```

pub mod cluster_config;
pub mod defaults;

// Re-export commonly used types
pub use cluster_config::{ClusterConfig, NodeConfig, StubConfig, ENV_PREFIX};
