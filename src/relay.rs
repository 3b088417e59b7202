//! Direct relay monitoring
//!
//! Relays are infrastructure nodes we run ourselves. Gateways see them as
//! ordinary peers, but their registry rows come from probing their control
//! RPC directly each cycle, keyed by the port they serve peers on rather
//! than the control port. Gateway discovery is told to stay away from relay
//! addresses so the two paths never fight over a row.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::{MonitorConfig, RelayEndpoint};
use crate::registry::PeerRegistry;
use crate::rpc::GatewayClient;
use crate::types::{split_host_port, PeerKey, PeerRecord, SESSION_UNSET};

/// What one cycle learned about one relay
#[derive(Debug, Clone)]
pub struct RelayObservation {
    pub relay: RelayEndpoint,

    /// Whether the control RPC answered at all
    pub reachable: bool,

    /// Self-reported (protocol version, user agent), when the version call
    /// succeeded
    pub version: Option<(i64, String)>,
}

/// Probes every configured relay and folds the results into the registry
pub struct RelayMonitor {
    config: Arc<MonitorConfig>,
    client: GatewayClient,

    /// Host halves of relay control addresses, for excluding relays from
    /// gateway discovery
    relay_ips: HashSet<String>,
}

impl RelayMonitor {
    pub fn new(config: Arc<MonitorConfig>, client: GatewayClient) -> Self {
        let relay_ips = config
            .relays
            .iter()
            .filter_map(|relay| split_host_port(&relay.addr).map(|(ip, _)| ip))
            .collect();

        Self {
            config,
            client,
            relay_ips,
        }
    }

    /// Whether an observed address belongs to one of our relays.
    pub fn covers_address(&self, ip: &str) -> bool {
        self.relay_ips.contains(ip)
    }

    /// Probe all configured relays concurrently.
    ///
    /// The reachability probe and the version call run in parallel per
    /// relay; a dead version call does not decide reachability. Results
    /// come back in configuration order.
    pub async fn observe_all(&self) -> Vec<RelayObservation> {
        let mut tasks = JoinSet::new();
        for (index, relay) in self.config.relays.iter().cloned().enumerate() {
            let client = self.client.clone();
            tasks.spawn(async move {
                let (version, reachable) =
                    tokio::join!(client.fetch_relay_version(&relay), client.probe_relay(&relay));
                (
                    index,
                    RelayObservation {
                        relay,
                        reachable,
                        version,
                    },
                )
            });
        }

        let mut observations = Vec::with_capacity(self.config.relays.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => observations.push(item),
                Err(e) => error!("Relay probe task failed: {}", e),
            }
        }
        observations.sort_by_key(|(index, _)| *index);
        observations.into_iter().map(|(_, obs)| obs).collect()
    }

    /// Fold one relay observation into the registry.
    ///
    /// A reachable relay upserts its row at (control ip, external port). An
    /// unreachable relay only downgrades an existing row; no row is created
    /// just to say a relay was never seen. Returns whether the relay counted
    /// as online this cycle.
    pub fn apply(
        &self,
        registry: &mut PeerRegistry,
        obs: &RelayObservation,
        now: u64,
    ) -> anyhow::Result<bool> {
        let Some((control_ip, _)) = split_host_port(&obs.relay.addr) else {
            warn!("Relay address {} does not split, skipping", obs.relay.addr);
            return Ok(false);
        };
        let key = PeerKey {
            ip: control_ip,
            port: obs.relay.external_port,
        };

        if obs.reachable {
            let record = match registry.get_peer(&key) {
                Some(existing) => {
                    let mut record = existing.clone();
                    if !record.online {
                        record.session_start = now;
                    }
                    record.online = true;
                    record.last_seen = now;
                    record.last_check = now;
                    if let Some((version, sub_version)) = &obs.version {
                        record.version = *version;
                        record.sub_version = sub_version.clone();
                    }
                    record
                }
                None => PeerRecord {
                    id: 0,
                    ip: key.ip.clone(),
                    port: key.port,
                    online: true,
                    last_seen: now,
                    session_start: now,
                    last_check: now,
                    version: obs.version.as_ref().map(|(v, _)| *v).unwrap_or(0),
                    sub_version: obs
                        .version
                        .as_ref()
                        .map(|(_, sv)| sv.clone())
                        .unwrap_or_default(),
                    is_relay: true,
                    bytes_sent_per_msg: None,
                },
            };
            registry.commit_peer(record, now, obs.version.clone())?;
            Ok(true)
        } else {
            if let Some(existing) = registry.get_peer(&key) {
                let mut record = existing.clone();
                record.online = false;
                record.last_check = now;
                record.session_start = SESSION_UNSET;
                registry.commit_peer(record, now, None)?;
            } else {
                debug!("Relay {} unreachable and has no row yet", key);
            }
            Ok(false)
        }
    }
}
