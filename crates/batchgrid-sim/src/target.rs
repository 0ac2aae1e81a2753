//! Shared, mutable target state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use batch_core::{Stage, TargetModel, TargetProbe, TargetState};

/// A target whose state lives in memory and is changed by completed
/// operations. Clones share the same state.
#[derive(Debug, Clone)]
pub struct SimTarget {
    id: String,
    state: Arc<Mutex<TargetState>>,
}

impl SimTarget {
    pub fn new(id: impl Into<String>, state: TargetState) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Overwrite the current state.
    pub fn set(&self, state: TargetState) {
        *self.lock() = state;
    }

    /// Apply one finished operation's effect.
    pub fn apply<M: TargetModel + ?Sized>(
        &self,
        stage: Stage,
        threads: u32,
        model: &M,
    ) -> TargetState {
        let mut state = self.lock();
        *state = state.apply(stage, threads, model);
        *state
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TargetProbe for SimTarget {
    fn target_id(&self) -> &str {
        &self.id
    }

    fn observe(&self) -> TargetState {
        *self.lock()
    }
}
