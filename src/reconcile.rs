//! Observation reconciliation
//!
//! The heart of the monitor: every cycle takes one timestamp, gathers the
//! peer tables of all gateways and the relay probes concurrently, then folds
//! everything into the registry under a single write lock. All rows written
//! in a cycle carry the same timestamp, so history stays alignable across
//! peers.
//!
//! A gateway that cannot be reached contributes nothing; its peers keep
//! their current state until the grace window sweeps them.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::registry::PeerRegistry;
use crate::relay::RelayMonitor;
use crate::rpc::{GatewayClient, RpcError};
use crate::types::{unix_now, PeerKey, PeerRecord, RawPeerInfo, SESSION_UNSET};
use crate::uptime;
use crate::validate;

/// Counters describing what one cycle did
#[derive(Debug, Default, Clone)]
pub struct CycleSummary {
    /// Gateways whose peer table was fetched
    pub gateways_reached: usize,

    /// Gateways that failed to answer
    pub gateways_failed: usize,

    /// Raw peer entries processed across all reached gateways
    pub observed: usize,

    /// Entries that passed admission
    pub admitted: usize,

    /// Admitted entries that created a new registry row
    pub created: usize,

    /// Entries that failed admission
    pub rejected: usize,

    /// Entries whose address would not split into host and port
    pub unaddressable: usize,

    /// Entries skipped because their address belongs to a relay
    pub relay_skipped: usize,

    /// Stale rows flipped from online to offline
    pub swept: usize,

    /// Already-offline stale rows re-affirmed with a history entry
    pub reaffirmed: usize,

    /// Relays that answered their probe
    pub relays_online: usize,

    /// Relays that did not
    pub relays_offline: usize,
}

/// Folds gateway and relay observations into the registry, one cycle at a time
pub struct Reconciler {
    config: Arc<MonitorConfig>,
    client: GatewayClient,
    registry: Arc<RwLock<PeerRegistry>>,
    relays: RelayMonitor,
}

impl Reconciler {
    pub fn new(
        config: Arc<MonitorConfig>,
        client: GatewayClient,
        registry: Arc<RwLock<PeerRegistry>>,
    ) -> Self {
        let relays = RelayMonitor::new(config.clone(), client.clone());
        Self {
            config,
            client,
            registry,
            relays,
        }
    }

    /// Run one observation cycle.
    ///
    /// All network I/O happens up front and concurrently; the registry write
    /// lock is only taken once the results are in.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        let now = unix_now();
        let mut summary = CycleSummary::default();

        let (gateway_batches, relay_observations) =
            tokio::join!(self.fetch_all_gateways(), self.relays.observe_all());

        let mut registry = self.registry.write().await;

        for (gateway, result) in gateway_batches {
            match result {
                Ok(sightings) => {
                    summary.gateways_reached += 1;
                    for raw in &sightings {
                        summary.observed += 1;
                        self.apply_observation(&mut registry, raw, now, &mut summary)?;
                    }
                }
                Err(e) => {
                    summary.gateways_failed += 1;
                    warn!("Gateway {} unreachable: {}", gateway, e);
                }
            }
        }

        self.sweep_stale(&mut registry, now, &mut summary)?;

        for observation in &relay_observations {
            if self.relays.apply(&mut registry, observation, now)? {
                summary.relays_online += 1;
            } else {
                summary.relays_offline += 1;
            }
        }

        Ok(summary)
    }

    /// Fetch every gateway's peer table concurrently, in configuration order.
    async fn fetch_all_gateways(&self) -> Vec<(String, Result<Vec<RawPeerInfo>, RpcError>)> {
        let mut tasks = JoinSet::new();
        for (index, gateway) in self.config.gateways.iter().cloned().enumerate() {
            let client = self.client.clone();
            tasks.spawn(async move {
                let result = client.fetch_observed_peers(&gateway).await;
                (index, gateway.addr, result)
            });
        }

        let mut batches = Vec::with_capacity(self.config.gateways.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => batches.push(item),
                Err(e) => error!("Gateway fetch task failed: {}", e),
            }
        }
        batches.sort_by_key(|(index, _, _)| *index);
        batches
            .into_iter()
            .map(|(_, addr, result)| (addr, result))
            .collect()
    }

    /// Fold one gateway sighting into the registry.
    fn apply_observation(
        &self,
        registry: &mut PeerRegistry,
        raw: &RawPeerInfo,
        now: u64,
        summary: &mut CycleSummary,
    ) -> anyhow::Result<()> {
        let Some(key) = PeerKey::parse(&raw.addr) else {
            debug!("Observed peer with unusable address {:?}", raw.addr);
            summary.unaddressable += 1;
            return Ok(());
        };

        // Relay rows belong to the relay monitor, whatever port a gateway
        // happens to see them on
        if self.relays.covers_address(&key.ip) {
            summary.relay_skipped += 1;
            return Ok(());
        }

        match validate::check_peer(raw, self.config.min_protocol_version) {
            Ok(version) => {
                summary.admitted += 1;
                let record = match registry.get_peer(&key) {
                    Some(existing) => {
                        let mut record = existing.clone();
                        if !record.online {
                            record.session_start = now;
                        }
                        record.online = true;
                        record.last_seen = now;
                        record.last_check = now;
                        record.version = version;
                        record.sub_version = raw.subver.clone();
                        record.bytes_sent_per_msg = Some(raw.bytessent_per_msg.clone());
                        record
                    }
                    None => {
                        summary.created += 1;
                        PeerRecord {
                            id: 0,
                            ip: key.ip.clone(),
                            port: key.port,
                            online: true,
                            last_seen: now,
                            session_start: now,
                            last_check: now,
                            version,
                            sub_version: raw.subver.clone(),
                            is_relay: false,
                            bytes_sent_per_msg: Some(raw.bytessent_per_msg.clone()),
                        }
                    }
                };
                registry.commit_peer(record, now, Some((version, raw.subver.clone())))?;
            }
            Err(reason) => {
                summary.rejected += 1;
                if let Some(existing) = registry.get_peer(&key) {
                    debug!("Peer {} rejected ({}), marking offline", key, reason);
                    let mut record = existing.clone();
                    record.online = false;
                    record.last_check = now;
                    // session_start is left alone here; only the stale sweep
                    // clears it
                    registry.commit_peer(record, now, None)?;
                } else {
                    debug!("Ignoring unknown peer {} ({})", key, reason);
                }
            }
        }
        Ok(())
    }

    /// Downgrade rows no cycle has touched within the grace window.
    ///
    /// Rows still marked online are flipped offline; rows already offline
    /// get their verdict re-affirmed in history without touching the row,
    /// so windowed uptime keeps seeing the peer as observed-and-down.
    fn sweep_stale(
        &self,
        registry: &mut PeerRegistry,
        now: u64,
        summary: &mut CycleSummary,
    ) -> anyhow::Result<()> {
        let cutoff = now.saturating_sub(self.config.stale_grace_secs);
        for peer in registry.stale_peers(cutoff) {
            if peer.online {
                let mut record = peer.clone();
                record.online = false;
                record.last_seen = now;
                record.last_check = now;
                record.session_start = SESSION_UNSET;
                registry.commit_peer(record, now, None)?;
                summary.swept += 1;
            } else {
                registry.append_history(peer.id, false, now)?;
                summary.reaffirmed += 1;
            }
        }
        Ok(())
    }
}

/// Run observation cycles forever at the configured interval.
pub async fn run_scheduler(
    config: Arc<MonitorConfig>,
    registry: Arc<RwLock<PeerRegistry>>,
) -> anyhow::Result<()> {
    let client = GatewayClient::new(Duration::from_secs(config.rpc_timeout_secs))?;
    let reconciler = Reconciler::new(config.clone(), client, registry.clone());

    let mut interval = tokio::time::interval(Duration::from_secs(config.cycle_interval_secs));

    loop {
        interval.tick().await;
        let started = Instant::now();

        match reconciler.run_cycle().await {
            Ok(summary) => {
                info!(
                    "🔄 Cycle finished in {:?}: {}/{} gateways, {} observed, {} admitted ({} new), {} rejected, relays {}/{} online",
                    started.elapsed(),
                    summary.gateways_reached,
                    summary.gateways_reached + summary.gateways_failed,
                    summary.observed,
                    summary.admitted,
                    summary.created,
                    summary.rejected,
                    summary.relays_online,
                    summary.relays_online + summary.relays_offline,
                );
                if summary.swept > 0 {
                    info!("🧹 Swept {} silent peers offline", summary.swept);
                }

                let reg = registry.read().await;
                let stats = reg.stats();
                info!(
                    "📊 Status: {}/{} peers online, {} relays, {} protocol versions",
                    stats.online_peers,
                    stats.total_peers,
                    stats.relay_count,
                    stats.distinct_versions
                );
                let now = unix_now();
                if let Some(longest) = reg
                    .peers()
                    .filter(|p| p.online)
                    .map(|p| uptime::instant_uptime(p, now))
                    .max()
                {
                    info!("⏱️  Longest live session: {}", uptime::format_uptime(longest));
                }
                debug!("Version distribution: {:?}", reg.version_distribution());
            }
            Err(e) => error!("Cycle failed: {}", e),
        }
    }
}
