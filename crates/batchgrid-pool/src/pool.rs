//! Resource pool — best-fit reservation across heterogeneous nodes.
//!
//! Nodes are kept in ascending order of available capacity, with the home
//! node pinned last so it is only used once everything else is exhausted.
//! A reservation lands on the first node in that order that can hold it.
//!
//! The aggregate summaries (`total`, `largest`, `smallest`) are updated
//! on every reserve and free by repositioning only the touched node. A full
//! resort happens only when `refresh` sees the node set change.

use std::collections::HashMap;

use batch_core::config::PoolConfig;
use batch_core::{NodeInfo, NodeSource};
use tracing::{debug, info, warn};

use crate::convert::{is_structural_change, node_from_info, reserve_floor};
use crate::error::{PoolError, PoolResult};
use crate::node::{EPSILON, Node};

/// Capacity accounting for a set of worker nodes.
///
/// Single-writer. Cloning (or [`ResourcePool::snapshot`]) yields an
/// independent deep copy for speculative planning.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    nodes: Vec<Node>,
    /// Indices into `nodes`: ascending by available capacity, home last.
    order: Vec<usize>,
    by_id: HashMap<String, usize>,
    home: Option<usize>,
    total: f64,
    largest: f64,
    smallest: f64,
    config: PoolConfig,
}

impl ResourcePool {
    /// Build a pool from discovered nodes.
    pub fn new(infos: &[NodeInfo], config: PoolConfig) -> Self {
        let mut pool = Self {
            nodes: infos.iter().map(|i| node_from_info(i, &config)).collect(),
            order: Vec::new(),
            by_id: HashMap::new(),
            home: None,
            total: 0.0,
            largest: 0.0,
            smallest: 0.0,
            config,
        };
        pool.rebuild();
        pool
    }

    /// Build a pool by querying a discovery source.
    pub fn from_source(source: &dyn NodeSource, config: PoolConfig) -> Self {
        Self::new(&source.nodes(), config)
    }

    /// Sum of available capacity across all nodes.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Largest available capacity on any single node.
    pub fn largest(&self) -> f64 {
        self.largest
    }

    /// Smallest available capacity on any single node.
    pub fn smallest(&self) -> f64 {
        self.smallest
    }

    /// Capacity currently held through this pool's reservations.
    pub fn held(&self) -> f64 {
        self.nodes.iter().map(Node::held).sum()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in reservation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Reserve `amount` on the smallest node that can hold it, home last.
    ///
    /// Returns the node id, or `None` if no single node has room. The pool
    /// is untouched when `None` is returned.
    pub fn reserve(&mut self, amount: f64) -> Option<String> {
        if !amount.is_finite() || amount <= 0.0 {
            debug!(amount, "ignoring non-positive reservation");
            return None;
        }
        let idx = self
            .order
            .iter()
            .copied()
            .find(|&i| self.nodes[i].fits(amount))?;

        let available = self.nodes[idx].available();
        // Don't let rounding push a node past its total.
        let charged = amount.min(available.max(amount - EPSILON));
        self.nodes[idx].charge(charged);
        self.total -= available - self.nodes[idx].available();
        self.reposition(idx);
        Some(self.nodes[idx].id.clone())
    }

    /// Return `amount` previously reserved on `node_id`.
    ///
    /// Freeing more than this pool holds on the node is an accounting bug
    /// and fails without mutating anything.
    pub fn free(&mut self, amount: f64, node_id: &str) -> PoolResult<()> {
        let idx = *self
            .by_id
            .get(node_id)
            .ok_or_else(|| PoolError::UnknownNode(node_id.to_string()))?;
        let held = self.nodes[idx].held();
        if !amount.is_finite() || amount < 0.0 || amount > held + EPSILON {
            return Err(PoolError::OverFree {
                node: node_id.to_string(),
                amount,
                held,
            });
        }

        let available = self.nodes[idx].available();
        self.nodes[idx].release(amount.min(held));
        self.total += self.nodes[idx].available() - available;
        self.reposition(idx);
        Ok(())
    }

    /// Deep copy for speculative planning.
    pub fn snapshot(&self) -> ResourcePool {
        self.clone()
    }

    /// Whether every amount in `costs` can be reserved together.
    pub fn fits(&self, costs: &[f64]) -> bool {
        let mut scratch = self.snapshot();
        costs.iter().all(|&cost| scratch.reserve(cost).is_some())
    }

    /// How many times the whole set `costs` can be reserved, up to `limit`.
    ///
    /// Works on a snapshot; this pool is unchanged.
    pub fn count_fits(&self, costs: &[f64], limit: u32) -> u32 {
        let mut scratch = self.snapshot();
        let mut count = 0;
        while count < limit && costs.iter().all(|&cost| scratch.reserve(cost).is_some()) {
            count += 1;
        }
        count
    }

    /// Reserve up to `threads` units of `unit_cost`, split across nodes.
    ///
    /// Each chunk is sized to the largest node's free capacity. Returns the
    /// `(node, threads)` chunks actually reserved, which may cover fewer
    /// threads than requested.
    pub fn reserve_split(&mut self, unit_cost: f64, threads: u32) -> Vec<(String, u32)> {
        let mut chunks = Vec::new();
        if unit_cost <= 0.0 {
            return chunks;
        }
        let mut remaining = threads;
        while remaining > 0 {
            let fit = ((self.largest + EPSILON) / unit_cost).floor();
            let chunk = remaining.min(fit.min(f64::from(u32::MAX)) as u32);
            if chunk == 0 {
                break;
            }
            let Some(node_id) = self.reserve(f64::from(chunk) * unit_cost) else {
                break;
            };
            remaining -= chunk;
            chunks.push((node_id, chunk));
        }
        chunks
    }

    /// Re-read the node set from `source`.
    ///
    /// Cheap when nothing changed. On a structural change (node added,
    /// removed, resized, or its outside usage changed) the node list is
    /// rebuilt, keeping this pool's reservations, and the aggregates are
    /// recomputed. Returns whether anything changed.
    pub fn refresh(&mut self, source: &dyn NodeSource) -> bool {
        let infos = source.nodes();
        if !is_structural_change(&self.nodes, &infos, &self.config) {
            return false;
        }

        let mut nodes = Vec::with_capacity(infos.len());
        for info in &infos {
            let mut node = node_from_info(info, &self.config);
            if let Some(old) = self.node(&info.id) {
                let held = old.held();
                let external = info.capacity_used + reserve_floor(&info.id, &self.config);
                if external + held > info.capacity_total + EPSILON {
                    warn!(
                        node = %info.id,
                        total = info.capacity_total,
                        held,
                        external,
                        "node shrank below its reservations"
                    );
                    node.capacity_total = external + held;
                }
                node.capacity_reserved = external + held;
                node.held = held;
            }
            nodes.push(node);
        }

        for old in &self.nodes {
            if old.held() > 0.0 && !infos.iter().any(|i| i.id == old.id) {
                warn!(node = %old.id, held = old.held(), "node with reservations disappeared");
            }
        }

        info!(
            before = self.nodes.len(),
            after = nodes.len(),
            "pool node set changed"
        );
        self.nodes = nodes;
        self.rebuild();
        true
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Resort every node and recompute the aggregates from scratch.
    fn rebuild(&mut self) {
        self.by_id = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        self.home = self
            .config
            .home
            .as_deref()
            .and_then(|h| self.by_id.get(h).copied());

        let mut order: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| Some(i) != self.home)
            .collect();
        order.sort_by(|&a, &b| {
            self.nodes[a]
                .available()
                .total_cmp(&self.nodes[b].available())
        });
        order.extend(self.home);
        self.order = order;

        self.total = self.nodes.iter().map(Node::available).sum();
        self.update_extremes();
    }

    /// Move node `idx` to its sorted position after its capacity changed.
    fn reposition(&mut self, idx: usize) {
        if Some(idx) != self.home {
            let sorted_len = self.sorted_len();
            if let Some(pos) = self.order[..sorted_len].iter().position(|&i| i == idx) {
                self.order.remove(pos);
                let available = self.nodes[idx].available();
                let nodes = &self.nodes;
                let insert_at = self.order[..sorted_len - 1]
                    .partition_point(|&i| nodes[i].available() <= available);
                self.order.insert(insert_at, idx);
            }
        }
        self.update_extremes();
    }

    /// Number of leading entries in `order` that are kept sorted.
    fn sorted_len(&self) -> usize {
        self.order.len() - usize::from(self.home.is_some())
    }

    fn update_extremes(&mut self) {
        let sorted = &self.order[..self.sorted_len()];
        let home = self.home.map(|h| self.nodes[h].available());
        let first = sorted.first().map(|&i| self.nodes[i].available());
        let last = sorted.last().map(|&i| self.nodes[i].available());

        self.largest = match (last, home) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => a.or(b).unwrap_or(0.0),
        };
        self.smallest = match (first, home) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b).unwrap_or(0.0),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, total: f64) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            capacity_total: total,
            capacity_used: 0.0,
        }
    }

    fn pool_with_home(sizes: &[f64], home: Option<usize>) -> ResourcePool {
        let infos: Vec<NodeInfo> = sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| info(&format!("node{i}"), s))
            .collect();
        let config = PoolConfig {
            home: home.map(|h| format!("node{h}")),
            home_reserve: 0.0,
        };
        ResourcePool::new(&infos, config)
    }

    fn assert_consistent(pool: &ResourcePool) {
        let sum: f64 = pool.nodes().map(Node::available).sum();
        assert!(
            (pool.total() - sum).abs() < 1e-6,
            "total {} != sum {}",
            pool.total(),
            sum
        );
        let max = pool.nodes().map(Node::available).fold(0.0, f64::max);
        assert!((pool.largest() - max).abs() < 1e-6);
        let min = pool.nodes().map(Node::available).fold(f64::INFINITY, f64::min);
        assert!((pool.smallest() - min).abs() < 1e-6);
        for node in pool.nodes() {
            assert!(node.capacity_reserved >= -1e-9);
            assert!(node.capacity_reserved <= node.capacity_total + 1e-9);
        }
    }

    #[test]
    fn smallest_first_skips_low_priority_node() {
        let mut pool = pool_with_home(&[10.0, 10.0, 100.0], Some(2));

        assert_eq!(pool.reserve(8.0).as_deref(), Some("node0"));
        assert_eq!(pool.reserve(8.0).as_deref(), Some("node1"));
        assert_consistent(&pool);
    }

    #[test]
    fn home_node_used_only_when_others_exhausted() {
        let mut pool = pool_with_home(&[100.0, 10.0, 20.0], Some(0));

        assert_eq!(pool.reserve(15.0).as_deref(), Some("node2"));
        assert_eq!(pool.reserve(15.0).as_deref(), Some("node0"));
        assert_consistent(&pool);
    }

    #[test]
    fn best_fit_prefers_tightest_node() {
        let mut pool = pool_with_home(&[64.0, 8.0, 32.0], None);

        assert_eq!(pool.reserve(16.0).as_deref(), Some("node2"));
        assert_eq!(pool.reserve(4.0).as_deref(), Some("node1"));
        assert_eq!(pool.reserve(20.0).as_deref(), Some("node0"));
        assert_consistent(&pool);
    }

    #[test]
    fn oversized_reservation_leaves_pool_unchanged() {
        let mut pool = pool_with_home(&[200.0, 300.0], None);
        assert_eq!(pool.total(), 500.0);

        assert!(pool.reserve(1000.0).is_none());
        assert_eq!(pool.total(), 500.0);
        assert_eq!(pool.held(), 0.0);
        assert_consistent(&pool);
    }

    #[test]
    fn non_positive_reservation_is_rejected() {
        let mut pool = pool_with_home(&[10.0], None);
        assert!(pool.reserve(0.0).is_none());
        assert!(pool.reserve(-1.0).is_none());
        assert!(pool.reserve(f64::NAN).is_none());
        assert_eq!(pool.total(), 10.0);
    }

    #[test]
    fn free_returns_capacity() {
        let mut pool = pool_with_home(&[10.0, 20.0], None);
        let node = pool.reserve(7.0).unwrap();
        assert_eq!(pool.total(), 23.0);

        pool.free(7.0, &node).unwrap();
        assert_eq!(pool.total(), 30.0);
        assert_eq!(pool.held(), 0.0);
        assert_consistent(&pool);
    }

    #[test]
    fn over_free_fails_without_mutation() {
        let mut pool = pool_with_home(&[10.0], None);
        let node = pool.reserve(4.0).unwrap();

        let err = pool.free(5.0, &node).unwrap_err();
        assert!(matches!(err, PoolError::OverFree { .. }));
        assert_eq!(pool.total(), 6.0);
        assert_eq!(pool.node(&node).unwrap().held(), 4.0);
    }

    #[test]
    fn free_cannot_eat_into_home_floor() {
        let infos = vec![info("home", 64.0)];
        let config = PoolConfig {
            home: Some("home".to_string()),
            home_reserve: 16.0,
        };
        let mut pool = ResourcePool::new(&infos, config);
        assert_eq!(pool.total(), 48.0);

        assert!(matches!(pool.free(1.0, "home"), Err(PoolError::OverFree { .. })));
        assert!(pool.reserve(48.5).is_none());
        assert_eq!(pool.reserve(48.0).as_deref(), Some("home"));
    }

    #[test]
    fn free_unknown_node_fails() {
        let mut pool = pool_with_home(&[10.0], None);
        assert!(matches!(
            pool.free(1.0, "ghost"),
            Err(PoolError::UnknownNode(_))
        ));
    }

    #[test]
    fn snapshot_is_isolated() {
        let pool = pool_with_home(&[10.0, 10.0, 100.0], Some(2));
        let mut snap = pool.snapshot();

        while snap.reserve(5.0).is_some() {}
        assert!(snap.total() < 5.0);

        assert_eq!(pool.total(), 120.0);
        assert_eq!(pool.held(), 0.0);
        assert_consistent(&pool);
    }

    #[test]
    fn count_fits_stops_at_first_failure() {
        let pool = pool_with_home(&[10.0, 10.0], None);
        // Each set needs a 6 and a 3: one node holds 6 + 3 once.
        assert_eq!(pool.count_fits(&[6.0, 3.0], 100), 2);
        assert_eq!(pool.count_fits(&[6.0, 3.0], 1), 1);
        assert!(pool.fits(&[10.0, 10.0]));
        assert!(!pool.fits(&[10.0, 10.0, 1.0]));
        assert_eq!(pool.held(), 0.0);
    }

    #[test]
    fn reserve_split_chunks_by_largest_node() {
        let mut pool = pool_with_home(&[10.0, 4.0, 7.0], None);

        let chunks = pool.reserve_split(1.75, 100);
        let threads: u32 = chunks.iter().map(|(_, t)| t).sum();
        // 10 → 5 threads, 7 → 4 threads, 4 → 2 threads.
        assert_eq!(threads, 11);
        assert_eq!(chunks[0], ("node0".to_string(), 5));
        assert!((pool.held() - 11.0 * 1.75).abs() < 1e-9);
        assert_consistent(&pool);
    }

    #[test]
    fn reserve_split_stops_when_satisfied() {
        let mut pool = pool_with_home(&[100.0], None);
        let chunks = pool.reserve_split(2.0, 3);
        assert_eq!(chunks, vec![("node0".to_string(), 3)]);
        assert_eq!(pool.total(), 94.0);
    }

    #[test]
    fn mixed_sequence_keeps_aggregates_consistent() {
        let mut pool = pool_with_home(&[16.0, 32.0, 8.0, 64.0, 128.0], Some(4));
        let mut held: Vec<(String, f64)> = Vec::new();

        for (step, amount) in [3.0, 7.5, 1.25, 20.0, 5.0, 9.0, 30.0, 2.0, 60.0]
            .into_iter()
            .enumerate()
        {
            if let Some(node) = pool.reserve(amount) {
                held.push((node, amount));
            }
            if step % 3 == 2 {
                let (node, amount) = held.remove(0);
                pool.free(amount, &node).unwrap();
            }
            assert_consistent(&pool);
        }

        for (node, amount) in held.drain(..) {
            pool.free(amount, &node).unwrap();
            assert_consistent(&pool);
        }
        assert!((pool.total() - 248.0).abs() < 1e-9);
    }

    struct FixedSource(Vec<NodeInfo>);

    impl NodeSource for FixedSource {
        fn nodes(&self) -> Vec<NodeInfo> {
            self.0.clone()
        }
    }

    #[test]
    fn refresh_is_noop_without_structural_change() {
        let source = FixedSource(vec![info("a", 10.0), info("b", 20.0)]);
        let mut pool = ResourcePool::from_source(&source, PoolConfig::default());
        pool.reserve(5.0).unwrap();

        assert!(!pool.refresh(&source));
        assert_eq!(pool.total(), 25.0);
    }

    #[test]
    fn refresh_keeps_reservations_across_growth() {
        let mut source = FixedSource(vec![info("a", 10.0), info("b", 20.0)]);
        let mut pool = ResourcePool::from_source(&source, PoolConfig::default());
        let node = pool.reserve(8.0).unwrap();
        assert_eq!(node, "a");

        source.0[0].capacity_total = 16.0;
        source.0.push(info("c", 4.0));
        assert!(pool.refresh(&source));

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.node("a").unwrap().held(), 8.0);
        assert_eq!(pool.node("a").unwrap().available(), 8.0);
        assert_eq!(pool.total(), 32.0);
        assert_consistent(&pool);

        pool.free(8.0, "a").unwrap();
        assert_eq!(pool.total(), 40.0);
    }
}
