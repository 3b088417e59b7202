//! Monitor Configuration
//!
//! Configurable parameters for the peer monitoring service.
//! Default values match one observation cycle every 30 seconds with a grace
//! window wide enough to absorb a single missed cycle.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::split_host_port;

/// A trusted node whose RPC interface is polled for its peer table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    /// RPC address, `host:port`
    pub addr: String,

    /// RPC basic-auth username
    pub username: String,

    /// RPC basic-auth password
    pub password: String,
}

/// A relay node monitored directly instead of through gateway peer tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEndpoint {
    /// Control RPC address, `host:port`
    pub addr: String,

    /// RPC basic-auth username
    pub username: String,

    /// RPC basic-auth password
    pub password: String,

    /// Port the relay serves peers on; registry rows are keyed by this,
    /// not by the control port
    pub external_port: u16,
}

/// Main configuration for the peer monitoring service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    // === Timing ===

    /// Interval between observation cycles (seconds)
    pub cycle_interval_secs: u64,

    /// Time without a touch after which a peer row is swept offline (seconds)
    /// Should be 2x cycle_interval to allow one missed cycle
    pub stale_grace_secs: u64,

    /// Per-request timeout for gateway and relay RPC calls (seconds)
    pub rpc_timeout_secs: u64,

    // === Admission ===

    /// Lowest protocol version accepted as a healthy peer
    pub min_protocol_version: i64,

    // === Endpoints ===

    /// Gateways whose peer tables feed discovery
    pub gateways: Vec<GatewayEndpoint>,

    /// Relays probed directly each cycle
    pub relays: Vec<RelayEndpoint>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            // Timing
            cycle_interval_secs: 30,
            stale_grace_secs: 60, // one missed cycle of slack
            rpc_timeout_secs: 10,

            // Admission
            min_protocol_version: 70000,

            // Endpoints (populated from the config file)
            gateways: vec![],
            relays: vec![],
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_cycle_interval(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.cycle_interval_secs = secs;
        }
        self
    }

    pub fn with_stale_grace(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.stale_grace_secs = secs;
        }
        self
    }

    pub fn with_min_protocol_version(mut self, version: Option<i64>) -> Self {
        if let Some(version) = version {
            self.min_protocol_version = version;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be non-zero");
        }

        if self.stale_grace_secs <= self.cycle_interval_secs {
            anyhow::bail!(
                "stale_grace_secs ({}) must be greater than cycle_interval_secs ({})",
                self.stale_grace_secs,
                self.cycle_interval_secs
            );
        }

        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be non-zero");
        }

        for gateway in &self.gateways {
            if split_host_port(&gateway.addr).is_none() {
                anyhow::bail!("gateway addr ({}) must be host:port", gateway.addr);
            }
        }

        for relay in &self.relays {
            if split_host_port(&relay.addr).is_none() {
                anyhow::bail!("relay addr ({}) must be host:port", relay.addr);
            }
            if relay.external_port == 0 {
                anyhow::bail!("relay {} external_port must be non-zero", relay.addr);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_relay(addr: &str, external_port: u16) -> RelayEndpoint {
        RelayEndpoint {
            addr: addr.to_string(),
            username: "monitor".to_string(),
            password: "hunter2".to_string(),
            external_port,
        }
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.cycle_interval_secs, 30);
        assert_eq!(config.stale_grace_secs, 60);
        assert_eq!(config.min_protocol_version, 70000);
        assert!(config.gateways.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        assert!(config.validate().is_ok());

        // Invalid: grace window <= cycle interval
        config.stale_grace_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_relay_addrs() {
        let mut config = MonitorConfig::default();

        config.relays.push(test_relay("198.51.100.4:8332", 8333));
        assert!(config.validate().is_ok());

        config.relays.push(test_relay("not-an-address", 8333));
        assert!(config.validate().is_err());

        config.relays.pop();
        config.relays.push(test_relay("198.51.100.5:8332", 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = MonitorConfig::default()
            .with_cycle_interval(Some(15))
            .with_stale_grace(Some(45))
            .with_min_protocol_version(Some(70015));

        assert_eq!(config.cycle_interval_secs, 15);
        assert_eq!(config.stale_grace_secs, 45);
        assert_eq!(config.min_protocol_version, 70015);

        // None leaves the loaded value alone
        let config = config.with_cycle_interval(None);
        assert_eq!(config.cycle_interval_secs, 15);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodewatch.toml");

        let mut config = MonitorConfig::default();
        config.gateways.push(GatewayEndpoint {
            addr: "203.0.113.9:8332".to_string(),
            username: "monitor".to_string(),
            password: "hunter2".to_string(),
        });
        config.relays.push(test_relay("198.51.100.4:8332", 8333));
        config.save(&path).unwrap();

        let loaded = MonitorConfig::load(&path).unwrap();
        assert_eq!(loaded.cycle_interval_secs, config.cycle_interval_secs);
        assert_eq!(loaded.gateways.len(), 1);
        assert_eq!(loaded.gateways[0].addr, "203.0.113.9:8332");
        assert_eq!(loaded.relays[0].external_port, 8333);
    }
}
