//! Admission checks for gateway-observed peers
//!
//! A peer sighting only counts as evidence of a healthy node when the
//! gateway's view of it passes every check here. The checks run in a fixed
//! order and the first failure wins, so rejection logs stay stable across
//! cycles.

use crate::types::RawPeerInfo;
use std::fmt;

/// Why a sighting was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A field the checks depend on was missing or had an unusable type
    Malformed,
    /// The gateway has assigned the peer a positive misbehaviour score
    Banned,
    /// The peer announced fewer headers than it claims to have validated,
    /// a self-contradictory sync report
    InconsistentSync,
    /// The reported protocol version did not parse as an integer
    UnparseableVersion,
    /// The reported protocol version is below the supported floor
    VersionTooOld,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::Malformed => "missing or unusable required field",
            Rejection::Banned => "ban score above zero",
            Rejection::InconsistentSync => "announced headers behind validated blocks",
            Rejection::UnparseableVersion => "protocol version not an integer",
            Rejection::VersionTooOld => "protocol version below supported floor",
        };
        write!(f, "{reason}")
    }
}

/// Run the admission checks against one sighting.
///
/// Returns the parsed protocol version on success so callers never re-parse.
pub fn check_peer(peer: &RawPeerInfo, min_version: i64) -> Result<i64, Rejection> {
    match peer.banscore {
        None => return Err(Rejection::Malformed),
        Some(score) if score > 0 => return Err(Rejection::Banned),
        Some(_) => {}
    }

    match (peer.synced_headers, peer.synced_blocks) {
        (None, _) | (_, None) => return Err(Rejection::Malformed),
        (Some(headers), Some(blocks)) if headers < blocks => {
            return Err(Rejection::InconsistentSync)
        }
        _ => {}
    }

    let version = peer.version.ok_or(Rejection::UnparseableVersion)?;
    if version < min_version {
        return Err(Rejection::VersionTooOld);
    }

    Ok(version)
}

/// Convenience wrapper when only the verdict matters.
pub fn is_valid(peer: &RawPeerInfo, min_version: i64) -> bool {
    check_peer(peer, min_version).is_ok()
}
