//! Completion-order watchdog.
//!
//! Keeps the last few completed stages and checks that they form a
//! contiguous run of the canonical cycle (Drain, StabilizeA, Build,
//! StabilizeB, Drain, ...). A partial window is checked too, so a
//! reordering shows up within one window of completions.

use std::collections::VecDeque;

use batch_core::Stage;

/// What one recorded completion did to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncEvent {
    /// Window is canonical and no desync is pending.
    InSync,
    /// Window just broke; the flag went up.
    Raised,
    /// Still waiting for the window to realign.
    Pending,
    /// Window realigned; the flag cleared.
    Realigned,
}

#[derive(Debug, Clone)]
pub struct DesyncDetector {
    window: VecDeque<Stage>,
    size: usize,
    desynced: bool,
}

impl DesyncDetector {
    /// A detector over the last `size` completions (at least two).
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        Self {
            window: VecDeque::with_capacity(size),
            size,
            desynced: false,
        }
    }

    pub fn record(&mut self, stage: Stage) -> DesyncEvent {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(stage);

        match (self.is_canonical(), self.desynced) {
            (true, false) => DesyncEvent::InSync,
            (false, false) => {
                self.desynced = true;
                DesyncEvent::Raised
            }
            (false, true) => DesyncEvent::Pending,
            (true, true) => {
                self.desynced = false;
                DesyncEvent::Realigned
            }
        }
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Forget history and clear the flag.
    pub fn reset(&mut self) {
        self.window.clear();
        self.desynced = false;
    }

    pub fn window(&self) -> impl Iterator<Item = Stage> + '_ {
        self.window.iter().copied()
    }

    fn is_canonical(&self) -> bool {
        self.window
            .iter()
            .zip(self.window.iter().skip(1))
            .all(|(a, b)| a.next() == *b)
    }
}

impl Default for DesyncDetector {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Stage::*;

    fn feed(detector: &mut DesyncDetector, stages: &[Stage]) -> Vec<DesyncEvent> {
        stages.iter().map(|s| detector.record(*s)).collect()
    }

    #[test]
    fn canonical_stream_stays_in_sync() {
        let mut detector = DesyncDetector::default();
        let events = feed(
            &mut detector,
            &[Drain, StabilizeA, Build, StabilizeB, Drain, StabilizeA, Build],
        );
        assert!(events.iter().all(|e| *e == DesyncEvent::InSync));
        assert!(!detector.is_desynced());
    }

    #[test]
    fn stream_may_start_mid_cycle() {
        let mut detector = DesyncDetector::default();
        let events = feed(&mut detector, &[Build, StabilizeB, Drain]);
        assert!(events.iter().all(|e| *e == DesyncEvent::InSync));
    }

    #[test]
    fn reordered_stage_flags_once_then_clears() {
        let mut detector = DesyncDetector::new(5);
        let events = feed(&mut detector, &[Drain, StabilizeA, Build, StabilizeB, StabilizeA]);
        assert_eq!(events[4], DesyncEvent::Raised);
        assert_eq!(
            events.iter().filter(|e| **e == DesyncEvent::Raised).count(),
            1
        );
        assert!(detector.is_desynced());

        // Completions keep arriving in order; the bad entry ages out.
        let events = feed(&mut detector, &[Build, StabilizeB, Drain]);
        assert!(events.iter().all(|e| *e == DesyncEvent::Pending));
        assert_eq!(detector.record(StabilizeA), DesyncEvent::Realigned);
        assert!(!detector.is_desynced());
        assert_eq!(
            detector.window().collect::<Vec<_>>(),
            vec![StabilizeA, Build, StabilizeB, Drain, StabilizeA]
        );
    }

    #[test]
    fn early_mismatch_is_caught_in_partial_window() {
        let mut detector = DesyncDetector::new(5);
        assert_eq!(detector.record(Drain), DesyncEvent::InSync);
        assert_eq!(detector.record(Build), DesyncEvent::Raised);
    }

    #[test]
    fn reset_clears_flag_and_history() {
        let mut detector = DesyncDetector::new(3);
        feed(&mut detector, &[Drain, Build]);
        assert!(detector.is_desynced());
        detector.reset();
        assert!(!detector.is_desynced());
        assert_eq!(detector.window().count(), 0);
        assert_eq!(detector.record(StabilizeB), DesyncEvent::InSync);
    }

    #[test]
    fn window_size_has_a_floor() {
        let mut detector = DesyncDetector::new(0);
        assert_eq!(detector.record(Drain), DesyncEvent::InSync);
        assert_eq!(detector.record(Build), DesyncEvent::Raised);
    }
}
