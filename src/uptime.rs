//! Uptime calculations over registry history
//!
//! Two views of peer availability: the length of the current unbroken
//! online session, and the fraction of recorded verdicts inside a lookback
//! window that were online. Percentages are computed over rows actually
//! recorded, never over an assumed cycle count, so monitor downtime does not
//! silently count against a peer.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::registry::PeerRegistry;
use crate::types::PeerRecord;

/// Why a windowed percentage could not be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UptimeError {
    /// The window holds no verdicts at all. Callers must present this as
    /// insufficient data, never as 0% or 100%.
    #[error("no liveness verdicts recorded inside the window")]
    NoHistory,

    /// The underlying history scan failed
    #[error("registry read failed: {0}")]
    Store(String),
}

/// Lookback window units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hour,
    Day,
    Week,
    /// Mean Gregorian month (30.44 days)
    Month,
    /// Mean Gregorian year (365.24 days)
    Year,
}

impl Window {
    pub fn as_secs(&self) -> u64 {
        match self {
            Window::Hour => 3_600,
            Window::Day => 86_400,
            Window::Week => 604_800,
            Window::Month => 2_629_743,
            Window::Year => 31_556_926,
        }
    }

    /// Start of a window reaching `amount` units back from `now`.
    pub fn start(&self, amount: u64, now: u64) -> u64 {
        now.saturating_sub(self.as_secs().saturating_mul(amount))
    }
}

impl FromStr for Window {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Window::Hour),
            "day" => Ok(Window::Day),
            "week" => Ok(Window::Week),
            "month" => Ok(Window::Month),
            "year" => Ok(Window::Year),
            other => anyhow::bail!("unknown window unit: {other}"),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Window::Hour => "hour",
            Window::Day => "day",
            Window::Week => "week",
            Window::Month => "month",
            Window::Year => "year",
        };
        write!(f, "{unit}")
    }
}

/// Seconds of the current unbroken online session, 0 when offline.
pub fn instant_uptime(peer: &PeerRecord, now: u64) -> u64 {
    if peer.online {
        now.saturating_sub(peer.session_start)
    } else {
        0
    }
}

/// Percentage of verdicts after `window_start` that were online.
///
/// Only rows with a timestamp strictly greater than `window_start` count.
/// An empty window fails with [`UptimeError::NoHistory`] rather than
/// guessing a percentage.
pub fn windowed_percentage(
    registry: &PeerRegistry,
    peer_id: u64,
    window_start: u64,
) -> Result<f64, UptimeError> {
    let (total, online) = registry
        .history_counts_since(peer_id, window_start)
        .map_err(|e| UptimeError::Store(e.to_string()))?;
    if total == 0 {
        return Err(UptimeError::NoHistory);
    }
    Ok(online as f64 / total as f64 * 100.0)
}

/// Render a second count as `D days, HH hours, MM minutes, SS seconds`.
pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    format!("{days} days, {hours:02} hours, {minutes:02} minutes, {seconds:02} seconds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerRecord;
    use tempfile::tempdir;

    fn online_record(session_start: u64) -> PeerRecord {
        PeerRecord {
            id: 1,
            ip: "192.0.2.1".to_string(),
            port: 8333,
            online: true,
            last_seen: session_start,
            session_start,
            last_check: session_start,
            version: 70016,
            sub_version: "/Satoshi:25.0.0/".to_string(),
            is_relay: false,
            bytes_sent_per_msg: None,
        }
    }

    #[test]
    fn test_instant_uptime_online() {
        let peer = online_record(1000);
        assert_eq!(instant_uptime(&peer, 1180), 180);
        assert_eq!(instant_uptime(&peer, 1000), 0);
    }

    #[test]
    fn test_instant_uptime_offline_is_zero() {
        let mut peer = online_record(1000);
        peer.online = false;
        assert_eq!(instant_uptime(&peer, 99999), 0);
    }

    #[test]
    fn test_windowed_percentage() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let stored = registry
            .commit_peer(online_record(1000), 1000, None)
            .unwrap();
        registry.append_history(stored.id, true, 1030).unwrap();

        // every recorded verdict online
        assert_eq!(windowed_percentage(&registry, stored.id, 0), Ok(100.0));

        registry.append_history(stored.id, false, 1060).unwrap();
        registry.append_history(stored.id, false, 1090).unwrap();

        // 2 of 4 verdicts online
        assert_eq!(windowed_percentage(&registry, stored.id, 0), Ok(50.0));

        // window starting at 1030 excludes the first two rows (strict bound)
        assert_eq!(windowed_percentage(&registry, stored.id, 1030), Ok(0.0));

        let pct = windowed_percentage(&registry, stored.id, 1029).unwrap();
        assert!((pct - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_windowed_percentage_empty_window() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let stored = registry
            .commit_peer(online_record(1000), 1000, None)
            .unwrap();

        assert_eq!(
            windowed_percentage(&registry, stored.id, 5000),
            Err(UptimeError::NoHistory)
        );

        // a peer with no rows at all reports the same
        assert_eq!(
            windowed_percentage(&registry, 999, 0),
            Err(UptimeError::NoHistory)
        );
    }

    #[test]
    fn test_window_units() {
        assert_eq!(Window::Hour.as_secs(), 3_600);
        assert_eq!(Window::Day.as_secs(), 86_400);
        assert_eq!(Window::Week.as_secs(), 604_800);
        assert_eq!(Window::Month.as_secs(), 2_629_743);
        assert_eq!(Window::Year.as_secs(), 31_556_926);
    }

    #[test]
    fn test_window_start() {
        assert_eq!(Window::Hour.start(2, 10_000), 2_800);
        // saturates instead of wrapping before the epoch
        assert_eq!(Window::Year.start(100, 10_000), 0);
    }

    #[test]
    fn test_window_parse() {
        assert_eq!("hour".parse::<Window>().unwrap(), Window::Hour);
        assert_eq!(" Week ".parse::<Window>().unwrap(), Window::Week);
        assert!("fortnight".parse::<Window>().is_err());
        assert_eq!(Window::Month.to_string(), "month");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0 days, 00 hours, 00 minutes, 00 seconds");
        assert_eq!(
            format_uptime(90_061),
            "1 days, 01 hours, 01 minutes, 01 seconds"
        );
        assert_eq!(
            format_uptime(3 * 86_400 + 4 * 3_600 + 25 * 60 + 9),
            "3 days, 04 hours, 25 minutes, 09 seconds"
        );
    }
}
