//! Core types for the peer monitoring pipeline
//!
//! Records observed through gateway RPC arrive as loosely-typed JSON and are
//! normalized here. Durable registry rows are plain serde structs so they can
//! be persisted with bincode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Helper module for tolerant decoding of gateway RPC fields
///
/// Gateway implementations disagree on field types (numbers arriving as
/// strings, missing keys, null placeholders). A record with a surprising
/// field shape must still deserialize so the admission check can reject it
/// explicitly instead of the whole batch failing.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// Accept only an actual JSON integer; anything else becomes `None`.
    pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_i64())
    }

    /// Accept an integer or a string that parses as one.
    pub fn protocol_version<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    }

    /// Accept a string; anything else becomes the empty string.
    pub fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Accept an object of non-negative integer counters, dropping entries
    /// with unusable values.
    pub fn byte_counters<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, v)| v.as_u64().map(|n| (key, n)))
                .collect(),
            _ => BTreeMap::new(),
        })
    }
}

// =============================================================================
// ADDRESSES
// =============================================================================

/// Split a `host:port` address into its parts.
///
/// IPv6 addresses keep their brackets (`"[::1]:8333"` splits into `"[::1]"`
/// and `8333`) so the host half round-trips back into a dialable address.
pub fn split_host_port(addr: &str) -> Option<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        if host.is_empty() {
            return None;
        }
        Some((format!("[{host}]"), port.parse().ok()?))
    } else {
        let (host, port) = addr.split_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port.parse().ok()?))
    }
}

/// Identity of a peer row: the (ip, port) pair it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerKey {
    /// Host half of the observed address (IPv6 keeps brackets)
    pub ip: String,

    /// Port half of the observed address
    pub port: u16,
}

impl PeerKey {
    /// Parse an observed `host:port` string into a key.
    pub fn parse(addr: &str) -> Option<Self> {
        let (ip, port) = split_host_port(addr)?;
        Some(Self { ip, port })
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// =============================================================================
// REGISTRY ROWS
// =============================================================================

/// Sentinel for "no session in progress" in [`PeerRecord::session_start`].
pub const SESSION_UNSET: u64 = 0;

/// Durable state of one monitored peer
///
/// One row per distinct (ip, port). The row carries the current liveness
/// verdict; per-cycle verdicts are appended to [`PeerHistoryRecord`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Monotonic row id, assigned on first insert (never 0 once stored)
    pub id: u64,

    /// Host half of the observed address
    pub ip: String,

    /// Port half of the observed address
    pub port: u16,

    /// Current liveness verdict
    pub online: bool,

    /// Last time the peer was positively observed (Unix epoch seconds)
    pub last_seen: u64,

    /// Start of the current unbroken online session, or [`SESSION_UNSET`]
    pub session_start: u64,

    /// Last time any cycle touched this row
    pub last_check: u64,

    /// Protocol version from the latest accepted observation
    pub version: i64,

    /// User agent string from the latest accepted observation
    pub sub_version: String,

    /// Whether this row is maintained by the relay monitor rather than
    /// gateway discovery
    pub is_relay: bool,

    /// Per-message-type byte counters from the gateway's view of the peer.
    /// `None` for relay rows, where no such counters exist.
    pub bytes_sent_per_msg: Option<BTreeMap<String, u64>>,
}

impl PeerRecord {
    pub fn key(&self) -> PeerKey {
        PeerKey {
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

/// One liveness verdict for one peer at one cycle timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHistoryRecord {
    /// Monotonic row id across all peers
    pub id: u64,

    /// Peer this verdict belongs to
    pub peer_id: u64,

    /// The verdict
    pub online: bool,

    /// Cycle timestamp the verdict was recorded at (Unix epoch seconds)
    pub timestamp: u64,
}

/// One accepted (version, user agent) sighting, network-wide
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistoryRecord {
    /// Monotonic row id
    pub id: u64,

    /// Protocol version as reported
    pub version: i64,

    /// User agent string as reported
    pub sub_version: String,

    /// Cycle timestamp of the sighting (Unix epoch seconds)
    pub timestamp: u64,
}

// =============================================================================
// GATEWAY RPC PAYLOADS
// =============================================================================

/// One entry of a gateway's `getpeerinfo` response
///
/// All fields except the address decode leniently: a missing or oddly-typed
/// field lands as `None` (or empty) and is dealt with at admission time.
/// Entries without a usable `addr` are dropped by the RPC layer since there
/// is nothing to key a registry row on.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPeerInfo {
    /// Remote address as the gateway sees it, `host:port`
    pub addr: String,

    /// Misbehaviour score the gateway assigned to the peer
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub banscore: Option<i64>,

    /// Best header height the peer has announced
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub synced_headers: Option<i64>,

    /// Best block height the peer has fully validated
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub synced_blocks: Option<i64>,

    /// Protocol version; integers and numeric strings both accepted
    #[serde(default, deserialize_with = "lenient::protocol_version")]
    pub version: Option<i64>,

    /// User agent string
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    pub subver: String,

    /// Bytes sent to the peer, broken down by message type
    #[serde(default, deserialize_with = "lenient::byte_counters")]
    pub bytessent_per_msg: BTreeMap<String, u64>,
}

/// The slice of a gateway's `getnetworkinfo` response the relay monitor needs
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    /// Protocol version the node itself runs
    pub protocolversion: i64,

    /// The node's own user agent string
    pub subversion: String,
}

// =============================================================================
// TIME
// =============================================================================

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
