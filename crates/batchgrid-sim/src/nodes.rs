//! A node source backed by an in-memory list.

use std::sync::{Arc, Mutex, PoisonError};

use batch_core::{NodeInfo, NodeSource};

/// Fixed worker list, editable at runtime to simulate nodes joining,
/// leaving, or being resized. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct StaticNodes {
    nodes: Arc<Mutex<Vec<NodeInfo>>>,
}

impl StaticNodes {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
        }
    }

    /// Replace the whole list.
    pub fn set(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock().unwrap_or_else(PoisonError::into_inner) = nodes;
    }

    /// Change one node's total capacity. Returns false if it is unknown.
    pub fn resize(&self, id: &str, capacity_total: f64) -> bool {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        match nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.capacity_total = capacity_total;
                true
            }
            None => false,
        }
    }
}

impl NodeSource for StaticNodes {
    fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
