//! Cluster Configuration Module
//!
//! Loads the per-process cluster configuration from an optional TOML file with
//! `HIVE_`-prefixed environment overrides. Nested keys use a double
//! underscore, e.g. `HIVE_NODE__PORT=31701` or `HIVE_STUB__TTL_SECS=15`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use hive_types::{ClusterMember, ServiceType, SocketId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::defaults;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HIVE";

/// Top-level configuration for one cluster process
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Root directory for store keys and transport channels
    pub namespace: String,

    /// Identity of this process
    pub node: NodeConfig,

    pub call_timeout_ms: u64,
    pub service_ttl_secs: i64,

    pub stub: StubConfig,

    pub log_level: String,
}

/// This process's membership record
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub service_type: ServiceType,
    pub ip: String,
    pub port: u16,
    pub socket_id: SocketId,
}

/// Stub election settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StubConfig {
    pub ttl_secs: i64,
    pub poll_interval_ms: u64,

    /// Role name → cluster-wide slot target
    pub counts: HashMap<String, i64>,

    /// Roles this process contends for
    pub roles: Vec<String>,

    /// Role name → service type hosting it
    pub services: HashMap<String, ServiceType>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: defaults::cluster::NAMESPACE.to_string(),
            node: NodeConfig::default(),
            call_timeout_ms: defaults::cluster::CALL_TIMEOUT_MS,
            service_ttl_secs: defaults::cluster::SERVICE_TTL_SECS,
            stub: StubConfig::default(),
            log_level: defaults::LOG_LEVEL.to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::Game,
            ip: defaults::cluster::NODE_IP.to_string(),
            port: defaults::cluster::NODE_PORT,
            socket_id: 0,
        }
    }
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::stub::TTL_SECS,
            poll_interval_ms: defaults::stub::POLL_INTERVAL_MS,
            counts: HashMap::new(),
            roles: Vec::new(),
            services: HashMap::new(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from an optional file with `HIVE_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading cluster config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        } else {
            debug!("No config file given, using defaults and environment");
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ClusterConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClusterConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot operate under
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            bail!("namespace must not be empty");
        }
        if self.node.ip.trim().is_empty() {
            bail!("node.ip must not be empty");
        }
        if self.node.port == 0 {
            bail!("node.port must be non-zero");
        }
        if self.call_timeout_ms == 0 {
            bail!("call_timeout_ms must be non-zero");
        }
        if self.service_ttl_secs <= 0 {
            bail!("service_ttl_secs must be positive");
        }
        if self.stub.ttl_secs <= 0 {
            bail!("stub.ttl_secs must be positive");
        }
        if self.stub.poll_interval_ms == 0 {
            bail!("stub.poll_interval_ms must be non-zero");
        }
        for (role, target) in &self.stub.counts {
            if *target <= 0 {
                bail!("stub.counts.{} must be positive, got {}", role, target);
            }
        }
        for role in &self.stub.roles {
            if lookup_role(&self.stub.counts, role).is_none() {
                bail!("stub role '{}' has no target in stub.counts", role);
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn stub_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stub.poll_interval_ms)
    }

    /// Membership record this process registers under
    pub fn member(&self) -> ClusterMember {
        ClusterMember {
            service: self.node.service_type,
            ip: self.node.ip.clone(),
            port: self.node.port,
            socket_id: self.node.socket_id,
        }
    }

    /// Slot target for a stub role, if configured
    pub fn stub_target(&self, role: &str) -> Option<i64> {
        lookup_role(&self.stub.counts, role).copied()
    }

    /// Service type hosting a stub role; defaults to this node's service type
    pub fn stub_service(&self, role: &str) -> ServiceType {
        lookup_role(&self.stub.services, role)
            .copied()
            .unwrap_or(self.node.service_type)
    }
}

// The config crate may fold key case, so role tables match case-insensitively.
fn lookup_role<'a, V>(map: &'a HashMap<String, V>, role: &str) -> Option<&'a V> {
    map.get(role).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(role))
            .map(|(_, value)| value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.namespace, "server");
        assert_eq!(config.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.service_ttl_secs, 10);
        assert_eq!(config.stub.ttl_secs, 30);
        assert_eq!(config.stub.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("cluster.toml");

        let config_content = r#"
namespace = "test"
call_timeout_ms = 250

[node]
service_type = "gate"
ip = "10.0.0.5"
port = 4100

[stub]
roles = ["ChatMgr"]

[stub.counts]
ChatMgr = 3

[stub.services]
ChatMgr = "game"
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = ClusterConfig::load_with_prefix(Some(&config_path), "HIVECFGFILE").unwrap();

        assert_eq!(config.namespace, "test");
        assert_eq!(config.call_timeout_ms, 250);
        assert_eq!(config.node.service_type, ServiceType::Gate);
        assert_eq!(config.member().address(), "10.0.0.5:4100");
        assert_eq!(config.stub_target("ChatMgr"), Some(3));
        assert_eq!(config.stub_service("ChatMgr"), ServiceType::Game);
        assert_eq!(config.stub_service("Other"), ServiceType::Gate);
        // Untouched fields keep their defaults
        assert_eq!(config.stub.ttl_secs, 30);
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("HIVECFGENV_NODE__PORT", "31999");
        std::env::set_var("HIVECFGENV_CALL_TIMEOUT_MS", "750");

        let config = ClusterConfig::load_with_prefix(None, "HIVECFGENV").unwrap();
        assert_eq!(config.node.port, 31999);
        assert_eq!(config.call_timeout_ms, 750);

        std::env::remove_var("HIVECFGENV_NODE__PORT");
        std::env::remove_var("HIVECFGENV_CALL_TIMEOUT_MS");
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ClusterConfig::load_with_prefix(Some(&missing), "HIVECFGMISSING").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_stub_settings() {
        let err = ClusterConfig::from_toml_str(
            r#"
[stub]
roles = ["Guild"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Guild"));

        let err = ClusterConfig::from_toml_str(
            r#"
[stub.counts]
Guild = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_validate_rejects_empty_namespace() {
        assert!(ClusterConfig::from_toml_str("namespace = \"\"").is_err());
    }
}
