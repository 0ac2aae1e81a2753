//! A single worker node's capacity.

/// Slack for floating-point comparisons on capacity values.
pub(crate) const EPSILON: f64 = 1e-9;

/// Capacity and reservation for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub capacity_total: f64,
    /// Everything unavailable on this node: outside usage, the home floor,
    /// and this pool's own reservations.
    pub capacity_reserved: f64,
    /// Portion of `capacity_reserved` held by this pool's reservations.
    pub(crate) held: f64,
}

impl Node {
    pub fn new(id: impl Into<String>, capacity_total: f64, external: f64) -> Self {
        Self {
            id: id.into(),
            capacity_total,
            capacity_reserved: external.clamp(0.0, capacity_total),
            held: 0.0,
        }
    }

    pub fn available(&self) -> f64 {
        (self.capacity_total - self.capacity_reserved).max(0.0)
    }

    /// Capacity reserved through this pool.
    pub fn held(&self) -> f64 {
        self.held
    }

    /// Reserved capacity not held through this pool.
    pub fn external(&self) -> f64 {
        self.capacity_reserved - self.held
    }

    pub(crate) fn fits(&self, amount: f64) -> bool {
        self.available() + EPSILON >= amount
    }

    pub(crate) fn charge(&mut self, amount: f64) {
        self.capacity_reserved += amount;
        self.held += amount;
    }

    pub(crate) fn release(&mut self, amount: f64) {
        self.capacity_reserved -= amount;
        self.held -= amount;
        if self.held.abs() < EPSILON {
            self.capacity_reserved -= self.held;
            self.held = 0.0;
        }
    }
}
