//! Peer Registry Storage (RocksDB)
//!
//! Persistent storage for peer rows, liveness history, and version
//! sightings. Peer rows are mirrored in an in-memory cache for fast reads;
//! history and version rows live only on disk and are scanned by key range.
//!
//! A peer row and the history row affirming it are always written in one
//! `WriteBatch`, so a crash can never leave a verdict without its history
//! entry or advance an id counter past an unwritten row.

use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use super::RegistryStats;
use crate::types::{PeerHistoryRecord, PeerKey, PeerRecord, VersionHistoryRecord};

/// Key prefixes for different data types
const PREFIX_PEER: &[u8] = b"peer:";
const PREFIX_HISTORY: &[u8] = b"hist:";
const PREFIX_VERSION: &[u8] = b"vers:";

/// Metadata keys holding the next unassigned row id per table
const META_NEXT_PEER_ID: &[u8] = b"meta:next_peer_id";
const META_NEXT_HISTORY_ID: &[u8] = b"meta:next_history_id";
const META_NEXT_VERSION_ID: &[u8] = b"meta:next_version_id";

/// Peer registry backed by RocksDB
pub struct PeerRegistry {
    /// RocksDB instance
    db: DB,

    /// In-memory cache of all peer rows
    cache: HashMap<PeerKey, PeerRecord>,

    /// Next id to assign to a new peer row
    next_peer_id: u64,

    /// Next id to assign to a history row
    next_history_id: u64,

    /// Next id to assign to a version sighting row
    next_version_id: u64,
}

impl PeerRegistry {
    /// Open or create a peer registry at the given path
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path)?;

        // Load existing peer rows into cache
        let mut cache = HashMap::new();
        let iter = db.iterator(IteratorMode::From(PREFIX_PEER, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;

            if !key.starts_with(PREFIX_PEER) {
                break;
            }

            match bincode::deserialize::<PeerRecord>(&value) {
                Ok(record) => {
                    cache.insert(record.key(), record);
                }
                Err(e) => warn!("Skipping undecodable peer row: {}", e),
            }
        }

        let next_peer_id = load_counter(&db, META_NEXT_PEER_ID)?;
        let next_history_id = load_counter(&db, META_NEXT_HISTORY_ID)?;
        let next_version_id = load_counter(&db, META_NEXT_VERSION_ID)?;

        info!("📦 Loaded {} peers from registry", cache.len());

        Ok(Self {
            db,
            cache,
            next_peer_id,
            next_history_id,
            next_version_id,
        })
    }

    /// Write a peer row together with the history row affirming it.
    ///
    /// A record with id 0 is treated as new and gets the next peer id.
    /// When `version_sighting` is present a network-wide version row is
    /// appended in the same batch. Returns the record as stored.
    pub fn commit_peer(
        &mut self,
        mut record: PeerRecord,
        now: u64,
        version_sighting: Option<(i64, String)>,
    ) -> anyhow::Result<PeerRecord> {
        let created = record.id == 0;
        if created {
            record.id = self.next_peer_id;
        }

        let next_peer_id = if created {
            self.next_peer_id + 1
        } else {
            self.next_peer_id
        };
        let next_history_id = self.next_history_id + 1;
        let mut next_version_id = self.next_version_id;

        let history = PeerHistoryRecord {
            id: self.next_history_id,
            peer_id: record.id,
            online: record.online,
            timestamp: now,
        };

        let mut batch = WriteBatch::default();
        batch.put(peer_row_key(&record.key()), bincode::serialize(&record)?);
        batch.put(
            history_row_key(record.id, now, history.id),
            bincode::serialize(&history)?,
        );

        if let Some((version, sub_version)) = version_sighting {
            let sighting = VersionHistoryRecord {
                id: next_version_id,
                version,
                sub_version,
                timestamp: now,
            };
            batch.put(
                version_row_key(now, sighting.id),
                bincode::serialize(&sighting)?,
            );
            next_version_id += 1;
        }

        batch.put(META_NEXT_PEER_ID, next_peer_id.to_be_bytes());
        batch.put(META_NEXT_HISTORY_ID, next_history_id.to_be_bytes());
        batch.put(META_NEXT_VERSION_ID, next_version_id.to_be_bytes());

        self.db.write(batch)?;

        self.next_peer_id = next_peer_id;
        self.next_history_id = next_history_id;
        self.next_version_id = next_version_id;
        self.cache.insert(record.key(), record.clone());

        Ok(record)
    }

    /// Append a bare history row for an existing peer, leaving the peer row
    /// untouched. Used to re-affirm an already-offline peer each cycle.
    pub fn append_history(&mut self, peer_id: u64, online: bool, now: u64) -> anyhow::Result<()> {
        let history = PeerHistoryRecord {
            id: self.next_history_id,
            peer_id,
            online,
            timestamp: now,
        };

        let mut batch = WriteBatch::default();
        batch.put(
            history_row_key(peer_id, now, history.id),
            bincode::serialize(&history)?,
        );
        batch.put(META_NEXT_HISTORY_ID, (self.next_history_id + 1).to_be_bytes());

        self.db.write(batch)?;
        self.next_history_id += 1;
        Ok(())
    }

    /// Get a peer row by its (ip, port) key
    pub fn get_peer(&self, key: &PeerKey) -> Option<&PeerRecord> {
        self.cache.get(key)
    }

    /// Get a peer row by its assigned id
    pub fn peer_by_id(&self, peer_id: u64) -> Option<&PeerRecord> {
        self.cache.values().find(|p| p.id == peer_id)
    }

    /// Iterate over every peer row
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.cache.values()
    }

    /// Get total peer count
    pub fn total_peer_count(&self) -> usize {
        self.cache.len()
    }

    /// Get count of peers currently marked online
    pub fn online_count(&self) -> usize {
        self.cache.values().filter(|p| p.online).count()
    }

    /// Non-relay peers whose last touch predates `cutoff`
    pub fn stale_peers(&self, cutoff: u64) -> Vec<PeerRecord> {
        self.cache
            .values()
            .filter(|p| !p.is_relay && p.last_check < cutoff)
            .cloned()
            .collect()
    }

    /// Full liveness history of one peer, ascending by timestamp
    pub fn peer_history(&self, peer_id: u64) -> anyhow::Result<Vec<PeerHistoryRecord>> {
        self.scan_history(peer_id, 0)
    }

    /// Count history rows strictly newer than `window_start`.
    ///
    /// Returns (total, online) so uptime percentages divide rows actually
    /// recorded inside the window, never an assumed cycle count.
    pub fn history_counts_since(
        &self,
        peer_id: u64,
        window_start: u64,
    ) -> anyhow::Result<(u64, u64)> {
        let rows = self.scan_history(peer_id, window_start.saturating_add(1))?;
        let online = rows.iter().filter(|r| r.online).count() as u64;
        Ok((rows.len() as u64, online))
    }

    /// All version sightings, ascending by timestamp
    pub fn versions_history(&self) -> anyhow::Result<Vec<VersionHistoryRecord>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(PREFIX_VERSION, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(PREFIX_VERSION) {
                break;
            }
            rows.push(bincode::deserialize::<VersionHistoryRecord>(&value)?);
        }
        Ok(rows)
    }

    /// How many peer rows currently carry each protocol version
    pub fn version_distribution(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for peer in self.cache.values() {
            *counts.entry(peer.version).or_insert(0) += 1;
        }
        counts
    }

    /// Remove a peer row and its entire liveness history.
    ///
    /// Version sightings are network-wide and survive. Returns whether a
    /// row existed.
    pub fn delete_peer(&mut self, key: &PeerKey) -> anyhow::Result<bool> {
        let Some(record) = self.cache.get(key) else {
            return Ok(false);
        };
        let peer_id = record.id;

        let prefix = history_prefix(peer_id);
        let mut batch = WriteBatch::default();
        batch.delete(peer_row_key(key));

        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_slice(), rocksdb::Direction::Forward));
        for item in iter {
            let (row_key, _) = item?;
            if !row_key.starts_with(&prefix) {
                break;
            }
            batch.delete(row_key);
        }

        self.db.write(batch)?;
        self.cache.remove(key);
        Ok(true)
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        let online_peers = self.online_count();
        let relay_count = self.cache.values().filter(|p| p.is_relay).count();
        let distinct_versions = self
            .cache
            .values()
            .map(|p| p.version)
            .collect::<HashSet<_>>()
            .len();

        RegistryStats {
            total_peers: self.cache.len(),
            online_peers,
            relay_count,
            distinct_versions,
        }
    }

    /// Flush all changes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn scan_history(
        &self,
        peer_id: u64,
        from_timestamp: u64,
    ) -> anyhow::Result<Vec<PeerHistoryRecord>> {
        let prefix = history_prefix(peer_id);
        let start = history_row_key(peer_id, from_timestamp, 0);

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_slice(), rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            rows.push(bincode::deserialize::<PeerHistoryRecord>(&value)?);
        }
        Ok(rows)
    }
}

fn load_counter(db: &DB, key: &[u8]) -> anyhow::Result<u64> {
    match db.get(key)? {
        Some(raw) => {
            let bytes: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("corrupt id counter at {:?}", key))?;
            Ok(u64::from_be_bytes(bytes))
        }
        None => Ok(1),
    }
}

/// Create storage key for a peer row
fn peer_row_key(key: &PeerKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_PEER.len() + key.ip.len() + 6);
    out.extend_from_slice(PREFIX_PEER);
    out.extend_from_slice(key.ip.as_bytes());
    out.push(b':');
    out.extend_from_slice(key.port.to_string().as_bytes());
    out
}

/// Create storage key for a history row.
/// Big-endian ids and timestamps make lexicographic order equal numeric
/// order, so a forward range scan walks one peer's history in time order.
fn history_row_key(peer_id: u64, timestamp: u64, row_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_HISTORY.len() + 24);
    out.extend_from_slice(PREFIX_HISTORY);
    out.extend_from_slice(&peer_id.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&row_id.to_be_bytes());
    out
}

fn history_prefix(peer_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_HISTORY.len() + 8);
    out.extend_from_slice(PREFIX_HISTORY);
    out.extend_from_slice(&peer_id.to_be_bytes());
    out
}

/// Create storage key for a version sighting row
fn version_row_key(timestamp: u64, row_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_VERSION.len() + 16);
    out.extend_from_slice(PREFIX_VERSION);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&row_id.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_record(octet: u8, port: u16, online: bool, now: u64) -> PeerRecord {
        PeerRecord {
            id: 0,
            ip: format!("192.0.2.{octet}"),
            port,
            online,
            last_seen: now,
            session_start: if online { now } else { 0 },
            last_check: now,
            version: 70016,
            sub_version: "/Satoshi:25.0.0/".to_string(),
            is_relay: false,
            bytes_sent_per_msg: Some(BTreeMap::new()),
        }
    }

    #[test]
    fn test_registry_open() {
        let dir = tempdir().unwrap();
        let registry = PeerRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.total_peer_count(), 0);
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_commit_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let first = registry
            .commit_peer(create_test_record(1, 8333, true, 1000), 1000, None)
            .unwrap();
        let second = registry
            .commit_peer(create_test_record(2, 8333, true, 1000), 1000, None)
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(registry.total_peer_count(), 2);
        assert_eq!(registry.peer_by_id(2).unwrap().ip, "192.0.2.2");
    }

    #[test]
    fn test_commit_keeps_existing_id() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let stored = registry
            .commit_peer(create_test_record(1, 8333, true, 1000), 1000, None)
            .unwrap();

        let mut update = stored.clone();
        update.online = false;
        let updated = registry.commit_peer(update, 1030, None).unwrap();

        assert_eq!(updated.id, stored.id);
        assert_eq!(registry.total_peer_count(), 1);
        assert!(!registry.get_peer(&stored.key()).unwrap().online);
    }

    #[test]
    fn test_commit_writes_history_and_version_rows() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let record = registry
            .commit_peer(
                create_test_record(1, 8333, true, 1000),
                1000,
                Some((70016, "/Satoshi:25.0.0/".to_string())),
            )
            .unwrap();

        let history = registry.peer_history(record.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].online);
        assert_eq!(history[0].peer_id, record.id);
        assert_eq!(history[0].timestamp, 1000);

        let versions = registry.versions_history().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 70016);
    }

    #[test]
    fn test_append_history_leaves_peer_row_alone() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let mut record = create_test_record(1, 8333, false, 1000);
        record.session_start = 0;
        let stored = registry.commit_peer(record, 1000, None).unwrap();

        registry.append_history(stored.id, false, 1060).unwrap();
        registry.append_history(stored.id, false, 1120).unwrap();

        let history = registry.peer_history(stored.id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| !h.online));
        // peer row untouched by the bare appends
        assert_eq!(registry.get_peer(&stored.key()).unwrap().last_check, 1000);
    }

    #[test]
    fn test_history_ordering_and_window_counts() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let stored = registry
            .commit_peer(create_test_record(1, 8333, true, 1000), 1000, None)
            .unwrap();
        registry.append_history(stored.id, false, 1030).unwrap();
        registry.append_history(stored.id, true, 1060).unwrap();
        registry.append_history(stored.id, true, 1090).unwrap();

        let history = registry.peer_history(stored.id).unwrap();
        let timestamps: Vec<u64> = history.iter().map(|h| h.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 1030, 1060, 1090]);

        // Window bound is strict: the row at exactly 1030 is excluded
        assert_eq!(registry.history_counts_since(stored.id, 1030).unwrap(), (2, 2));
        assert_eq!(registry.history_counts_since(stored.id, 1029).unwrap(), (3, 2));
        assert_eq!(registry.history_counts_since(stored.id, 0).unwrap(), (4, 3));
        assert_eq!(registry.history_counts_since(stored.id, 2000).unwrap(), (0, 0));
    }

    #[test]
    fn test_history_isolated_per_peer() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let a = registry
            .commit_peer(create_test_record(1, 8333, true, 1000), 1000, None)
            .unwrap();
        let b = registry
            .commit_peer(create_test_record(2, 8333, true, 1000), 1000, None)
            .unwrap();
        registry.append_history(a.id, true, 1030).unwrap();

        assert_eq!(registry.peer_history(a.id).unwrap().len(), 2);
        assert_eq!(registry.peer_history(b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_peers_filtering() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        registry
            .commit_peer(create_test_record(1, 8333, true, 1000), 1000, None)
            .unwrap();
        registry
            .commit_peer(create_test_record(2, 8333, true, 1100), 1100, None)
            .unwrap();

        let mut relay = create_test_record(3, 8333, true, 1000);
        relay.is_relay = true;
        registry.commit_peer(relay, 1000, None).unwrap();

        let stale = registry.stale_peers(1050);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].ip, "192.0.2.1");
    }

    #[test]
    fn test_delete_peer_cascades_history() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        let stored = registry
            .commit_peer(
                create_test_record(1, 8333, true, 1000),
                1000,
                Some((70016, "/Satoshi:25.0.0/".to_string())),
            )
            .unwrap();
        registry.append_history(stored.id, false, 1030).unwrap();

        assert!(registry.delete_peer(&stored.key()).unwrap());
        assert!(registry.get_peer(&stored.key()).is_none());
        assert!(registry.peer_history(stored.id).unwrap().is_empty());
        // network-wide version sightings survive the cascade
        assert_eq!(registry.versions_history().unwrap().len(), 1);

        assert!(!registry.delete_peer(&stored.key()).unwrap());
    }

    #[test]
    fn test_version_distribution() {
        let dir = tempdir().unwrap();
        let mut registry = PeerRegistry::open(dir.path()).unwrap();

        for octet in 1..=3u8 {
            let mut record = create_test_record(octet, 8333, true, 1000);
            record.version = if octet == 3 { 70015 } else { 70016 };
            registry.commit_peer(record, 1000, None).unwrap();
        }

        let dist = registry.version_distribution();
        assert_eq!(dist.get(&70016), Some(&2));
        assert_eq!(dist.get(&70015), Some(&1));

        let stats = registry.stats();
        assert_eq!(stats.total_peers, 3);
        assert_eq!(stats.online_peers, 3);
        assert_eq!(stats.distinct_versions, 2);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();

        // Write rows and close
        {
            let mut registry = PeerRegistry::open(dir.path()).unwrap();
            registry
                .commit_peer(
                    create_test_record(1, 8333, true, 1000),
                    1000,
                    Some((70016, "/Satoshi:25.0.0/".to_string())),
                )
                .unwrap();
            registry.flush().unwrap();
        }

        // Reopen and verify rows and counters survived
        {
            let mut registry = PeerRegistry::open(dir.path()).unwrap();
            assert_eq!(registry.total_peer_count(), 1);
            let key = PeerKey {
                ip: "192.0.2.1".to_string(),
                port: 8333,
            };
            let reloaded = registry.get_peer(&key).unwrap();
            assert_eq!(reloaded.id, 1);
            assert!(reloaded.online);
            assert_eq!(registry.peer_history(1).unwrap().len(), 1);

            // id counters continue instead of restarting
            let second = registry
                .commit_peer(create_test_record(2, 8333, true, 2000), 2000, None)
                .unwrap();
            assert_eq!(second.id, 2);
            let history = registry.peer_history(2).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].id, 2);
        }
    }
}
