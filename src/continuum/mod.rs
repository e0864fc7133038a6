//! The consistent-hashing dispatcher: maps byte-string keys onto shards
//! weighted by capacity.
//!
//! The ring is an explicit value published through `arc_swap::ArcSwap` so
//! readers never block, while writers are serialized by an internal mutex
//! and only contend with each other on the snapshot swap itself.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::hash::murmur3_32_str;

/// One ring position contributed by a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingPoint {
    pub endpoint: Endpoint,
    pub position: u32,
}

/// A shard and the capacity it advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRecord {
    pub endpoint: Endpoint,
    pub capacity: u64,
}

/// Tuning knobs for how a shard's capacity translates into ring points.
#[derive(Debug, Clone, Copy)]
pub struct ContinuumConfig {
    pub points_per_server: u16,
    pub reserve_factor: f32,
    pub declared_server_count: u16,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            points_per_server: 100,
            reserve_factor: 1.5,
            declared_server_count: u16::MAX,
        }
    }
}

/// An immutable snapshot of ring state. New snapshots are built and then
/// published wholesale; a reader holding one never observes a torn view
/// where `shards` and `points` disagree.
#[derive(Debug, Clone)]
struct RingSnapshot {
    shards: Vec<ShardRecord>,
    points: Vec<RingPoint>,
    total_memory: u64,
}

impl RingSnapshot {
    fn empty() -> Self {
        Self {
            shards: Vec::new(),
            points: Vec::new(),
            total_memory: 0,
        }
    }

    fn total_servers(&self) -> usize {
        self.shards.len()
    }
}

/// Computes how many ring points a shard earns given the current totals.
fn point_count_for(capacity: u64, total_memory: u64, total_servers: usize, cfg: &ContinuumConfig) -> u16 {
    if total_memory == 0 || total_servers == 0 {
        return 0;
    }
    let ratio = capacity as f64 / total_memory as f64;
    let n = (ratio * cfg.points_per_server as f64 * total_servers as f64).floor() as u64;
    n.min(cfg.points_per_server as u64) as u16
}

fn points_for_shard(endpoint: Endpoint, count: u16) -> Vec<RingPoint> {
    (0..count)
        .map(|i| {
            let key = format!("{endpoint}-{i}");
            RingPoint {
                endpoint,
                position: murmur3_32_str(&key, 0),
            }
        })
        .collect()
}

/// The consistent-hashing ring. Cheap to clone (an `Arc` handle to shared
/// state); all mutation methods take `&self`.
pub struct Continuum {
    cfg: ContinuumConfig,
    snapshot: ArcSwap<RingSnapshot>,
    write_lock: Mutex<()>,
}

impl Continuum {
    /// An empty ring; `resolve` fails with `EmptyRing` until shards are added.
    pub fn new(cfg: ContinuumConfig) -> Self {
        Self {
            cfg,
            snapshot: ArcSwap::from_pointee(RingSnapshot::empty()),
            write_lock: Mutex::new(()),
        }
    }

    /// Builds a ring from a full shard set in one pass. Rejects the load if
    /// more shards are supplied than `declared_server_count`.
    pub fn build(cfg: ContinuumConfig, shards: Vec<(Endpoint, u64)>) -> Result<Self, Error> {
        if shards.len() > cfg.declared_server_count as usize {
            return Err(Error::TooManyShards {
                got: shards.len(),
                max: cfg.declared_server_count as usize,
            });
        }

        let mut records: Vec<ShardRecord> = shards
            .into_iter()
            .map(|(endpoint, capacity)| ShardRecord { endpoint, capacity })
            .collect();
        records.sort_by_key(|r| r.endpoint);

        let total_memory: u64 = records.iter().map(|r| r.capacity).sum();
        let total_servers = records.len();

        let reserve = (total_servers as f32 * cfg.points_per_server as f32 * cfg.reserve_factor) as usize;
        let mut points = Vec::with_capacity(reserve);

        for shard in &records {
            let n = point_count_for(shard.capacity, total_memory, total_servers, &cfg);
            if n == 0 {
                warn!(component = "continuum", event = "zero_points", endpoint = %shard.endpoint, "shard received zero ring points");
            }
            points.extend(points_for_shard(shard.endpoint, n));
        }
        points.sort_by_key(|p| p.position);

        info!(
            component = "continuum",
            event = "build",
            total_servers,
            total_memory,
            total_points = points.len(),
            "ring rebuilt"
        );

        let snapshot = RingSnapshot {
            shards: records,
            points,
            total_memory,
        };

        Ok(Self {
            cfg,
            snapshot: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn total_servers(&self) -> usize {
        self.snapshot.load().total_servers()
    }

    pub fn total_memory(&self) -> u64 {
        self.snapshot.load().total_memory
    }

    pub fn total_points(&self) -> usize {
        self.snapshot.load().points.len()
    }

    /// Resolves `key` to the shard that owns it. Lock-free on the read path.
    pub fn resolve(&self, key: &[u8]) -> Result<Endpoint, Error> {
        let snapshot = self.snapshot.load();
        if snapshot.points.is_empty() {
            return Err(Error::EmptyRing);
        }

        let h = crate::hash::murmur3_32(key, 0);
        // lower_bound: first point whose position is >= h, picking the
        // earliest of any ties in sorted order.
        let idx = snapshot.points.partition_point(|p| p.position < h);
        let idx = if idx == snapshot.points.len() { 0 } else { idx };
        Ok(snapshot.points[idx].endpoint)
    }

    /// Adds a shard. Existing shards' point counts are not renormalized
    /// against the new total capacity — a documented, intentional deviation
    /// from an ideal rebalance.
    pub fn add(&self, endpoint: Endpoint, capacity: u64) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        if current.shards.binary_search_by_key(&endpoint, |r| r.endpoint).is_ok() {
            return Err(Error::Duplicate(endpoint));
        }

        let mut shards = current.shards.clone();
        let insert_at = shards.partition_point(|r| r.endpoint < endpoint);
        shards.insert(insert_at, ShardRecord { endpoint, capacity });

        let total_memory = current.total_memory + capacity;
        let total_servers = shards.len();

        let n = point_count_for(capacity, total_memory, total_servers, &self.cfg);
        if n == 0 {
            warn!(component = "continuum", event = "zero_points", endpoint = %endpoint, "shard received zero ring points");
        }

        let mut points = current.points.clone();
        points.extend(points_for_shard(endpoint, n));
        points.sort_by_key(|p| p.position);

        let total_points = points.len();
        self.snapshot.store(Arc::new(RingSnapshot {
            shards,
            points,
            total_memory,
        }));

        info!(
            component = "continuum",
            event = "add",
            endpoint = %endpoint,
            capacity,
            points_added = n,
            total_servers,
            total_memory,
            total_points,
            "shard added"
        );

        Ok(())
    }

    /// Removes a shard and every ring point it owns, atomically from a
    /// reader's perspective.
    pub fn remove(&self, endpoint: Endpoint) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        let idx = current
            .shards
            .binary_search_by_key(&endpoint, |r| r.endpoint)
            .map_err(|_| Error::NotFound(endpoint))?;

        let mut shards = current.shards.clone();
        let removed = shards.remove(idx);

        let points: Vec<RingPoint> = current
            .points
            .iter()
            .copied()
            .filter(|p| p.endpoint != endpoint)
            .collect();

        let total_servers = shards.len();
        let total_memory = current.total_memory - removed.capacity;
        let total_points = points.len();

        self.snapshot.store(Arc::new(RingSnapshot {
            shards,
            points,
            total_memory,
        }));

        info!(
            component = "continuum",
            event = "remove",
            endpoint = %endpoint,
            capacity = removed.capacity,
            total_servers,
            total_memory,
            total_points,
            "shard removed"
        );

        Ok(())
    }
}
