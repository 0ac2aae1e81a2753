//! Conversions from discovery results to pool nodes.
//!
//! Bridges `batch_core::NodeInfo` (as enumerated by a `NodeSource`) to the
//! pool's [`Node`], applying the home node's reservation floor.

use std::collections::HashMap;

use batch_core::NodeInfo;
use batch_core::config::PoolConfig;

use crate::node::{EPSILON, Node};

/// Capacity on `node_id` that is never offered for reservation.
pub fn reserve_floor(node_id: &str, config: &PoolConfig) -> f64 {
    if config.home.as_deref() == Some(node_id) {
        config.home_reserve.max(0.0)
    } else {
        0.0
    }
}

/// Convert a [`NodeInfo`] to a fresh [`Node`] with nothing held.
pub fn node_from_info(info: &NodeInfo, config: &PoolConfig) -> Node {
    Node::new(
        info.id.clone(),
        info.capacity_total,
        info.capacity_used + reserve_floor(&info.id, config),
    )
}

/// Whether `infos` differs from `nodes` in membership, size, or outside usage.
pub fn is_structural_change(nodes: &[Node], infos: &[NodeInfo], config: &PoolConfig) -> bool {
    if nodes.len() != infos.len() {
        return true;
    }
    let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    infos.iter().any(|info| match by_id.get(info.id.as_str()) {
        None => true,
        Some(node) => {
            let external = info.capacity_used + reserve_floor(&info.id, config);
            (node.capacity_total - info.capacity_total).abs() > EPSILON
                || (node.external() - external.min(info.capacity_total)).abs() > EPSILON
        }
    })
}
