//! Process-wide pause state
//!
//! Target writers mark their target as paused while the backend is
//! unreachable. Collectors hold a shared handle and stop pulling new data
//! while any target is paused.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

#[derive(Debug, Default)]
pub struct PauseState {
    targets: RwLock<HashMap<String, bool>>,
}

pub type SharedPauseState = Arc<PauseState>;

impl PauseState {
    pub fn new() -> SharedPauseState {
        Arc::new(Self::default())
    }

    /// Register a target as running
    pub fn register(&self, target: &str) {
        self.targets.write().entry(target.to_string()).or_insert(false);
    }

    pub fn set_paused(&self, target: &str, paused: bool) {
        let previous = self.targets.write().insert(target.to_string(), paused);
        if previous != Some(paused) {
            info!(target_name = target, paused, "target pause state changed");
        }
    }

    pub fn is_paused(&self, target: &str) -> bool {
        self.targets.read().get(target).copied().unwrap_or(false)
    }

    pub fn is_any_target_paused(&self) -> bool {
        self.targets.read().values().any(|paused| *paused)
    }
}
