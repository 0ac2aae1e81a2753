//! Per-stage FIFO queues of materialised operations.

use std::collections::VecDeque;

use batch_core::{Operation, Stage, StageTable};

/// Four FIFO queues, one per stage. Within a queue `planned_end` never
/// decreases from head to tail.
#[derive(Debug, Clone)]
pub struct StageQueues {
    queues: StageTable<VecDeque<Operation>>,
}

impl Default for StageQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl StageQueues {
    pub fn new() -> Self {
        Self {
            queues: StageTable::from_fn(|_| VecDeque::new()),
        }
    }

    /// Append `op` to its stage's queue.
    ///
    /// Returns the operation back if it would end before the current tail.
    pub fn push(&mut self, op: Operation) -> Result<(), Operation> {
        let queue = &mut self.queues[op.stage];
        if queue.back().is_some_and(|tail| op.planned_end < tail.planned_end) {
            return Err(op);
        }
        queue.push_back(op);
        Ok(())
    }

    pub fn front(&self, stage: Stage) -> Option<&Operation> {
        self.queues[stage].front()
    }

    pub fn front_mut(&mut self, stage: Stage) -> Option<&mut Operation> {
        self.queues[stage].front_mut()
    }

    pub fn pop(&mut self, stage: Stage) -> Option<Operation> {
        self.queues[stage].pop_front()
    }

    pub fn len(&self, stage: Stage) -> usize {
        self.queues[stage].len()
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(|(_, q)| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn iter(&self, stage: Stage) -> impl Iterator<Item = &Operation> {
        self.queues[stage].iter()
    }

    /// Shift every queued operation later by `delay` milliseconds.
    pub fn delay_all(&mut self, delay: f64) {
        for stage in Stage::ALL {
            for op in &mut self.queues[stage] {
                op.planned_end += delay;
            }
        }
    }

    /// Whether every queue is ordered by `planned_end`.
    pub fn is_ordered(&self) -> bool {
        self.queues.iter().all(|(_, q)| {
            q.iter()
                .zip(q.iter().skip(1))
                .all(|(a, b)| a.planned_end <= b.planned_end)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64, stage: Stage, planned_end: f64) -> Operation {
        Operation {
            id,
            stage,
            node_id: "w1".into(),
            threads: 2,
            unit_cost: 1.0,
            planned_end,
            duration: 10.0,
            batch_id: id,
            wants_report: true,
        }
    }

    #[test]
    fn queues_are_fifo_per_stage() {
        let mut queues = StageQueues::new();
        queues.push(op(1, Stage::Drain, 10.0)).unwrap();
        queues.push(op(2, Stage::Build, 5.0)).unwrap();
        queues.push(op(3, Stage::Drain, 20.0)).unwrap();

        assert_eq!(queues.len(Stage::Drain), 2);
        assert_eq!(queues.total_len(), 3);
        assert_eq!(queues.pop(Stage::Drain).unwrap().id, 1);
        assert_eq!(queues.pop(Stage::Drain).unwrap().id, 3);
        assert!(queues.pop(Stage::Drain).is_none());
        assert_eq!(queues.front(Stage::Build).unwrap().id, 2);
    }

    #[test]
    fn out_of_order_push_is_refused() {
        let mut queues = StageQueues::new();
        queues.push(op(1, Stage::Drain, 10.0)).unwrap();
        let refused = queues.push(op(2, Stage::Drain, 9.0)).unwrap_err();
        assert_eq!(refused.id, 2);
        assert_eq!(queues.len(Stage::Drain), 1);

        // Equal ends are allowed.
        queues.push(op(3, Stage::Drain, 10.0)).unwrap();
        assert!(queues.is_ordered());
    }

    #[test]
    fn delay_shifts_everything_and_keeps_order() {
        let mut queues = StageQueues::new();
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            queues.push(op(i as u64, stage, 10.0 * i as f64)).unwrap();
            queues.push(op(10 + i as u64, stage, 100.0 + i as f64)).unwrap();
        }
        queues.delay_all(7.5);

        assert_eq!(queues.front(Stage::Drain).unwrap().planned_end, 7.5);
        assert_eq!(queues.front(Stage::StabilizeB).unwrap().planned_end, 37.5);
        assert!(queues.is_ordered());
    }
}
