//! Peer Registry Module
//!
//! Durable record of every peer the monitor has ever admitted, the
//! per-cycle liveness verdicts behind it, and the network-wide version
//! sighting log. Backed by RocksDB so restarts lose nothing.

mod storage;

pub use storage::PeerRegistry;

/// Snapshot of registry-wide counters for status reporting
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Total peer rows in the registry
    pub total_peers: usize,

    /// Rows currently marked online
    pub online_peers: usize,

    /// Rows maintained by the relay monitor
    pub relay_count: usize,

    /// Distinct protocol versions across all rows
    pub distinct_versions: usize,
}

impl Default for RegistryStats {
    fn default() -> Self {
        Self {
            total_peers: 0,
            online_peers: 0,
            relay_count: 0,
            distinct_versions: 0,
        }
    }
}
