//! Per-user single flight.
//!
//! A run holds a [`RunGuard`] from lock acquisition until it returns; the
//! guard removes the user's entry when dropped, on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;

use crate::error::AgentError;

/// Where a user's run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Locking,
    FetchingMail,
    Classifying,
    Persisting,
    Committed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Locking => "locking",
            Self::FetchingMail => "fetching_mail",
            Self::Classifying => "classifying",
            Self::Persisting => "persisting",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

type RunMap = Arc<Mutex<HashMap<String, RunState>>>;

fn lock_map(runs: &RunMap) -> MutexGuard<'_, HashMap<String, RunState>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keyed map of in-flight runs. Cloning shares the map.
#[derive(Clone, Default)]
pub struct RunLocks {
    runs: RunMap,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the user's lock, or fail immediately if a run already holds it.
    pub fn try_acquire(&self, user_id: &str) -> Result<RunGuard, AgentError> {
        let mut runs = lock_map(&self.runs);
        if runs.contains_key(user_id) {
            return Err(AgentError::AlreadyRunning(user_id.to_string()));
        }
        runs.insert(user_id.to_string(), RunState::Locking);
        info!(user_id = %user_id, state = %RunState::Locking, "Run lock acquired");

        Ok(RunGuard {
            user_id: user_id.to_string(),
            runs: Arc::clone(&self.runs),
        })
    }

    pub fn status(&self, user_id: &str) -> RunState {
        lock_map(&self.runs)
            .get(user_id)
            .copied()
            .unwrap_or(RunState::Idle)
    }

    pub fn in_flight(&self) -> usize {
        lock_map(&self.runs).len()
    }
}

pub struct RunGuard {
    user_id: String,
    runs: RunMap,
}

impl RunGuard {
    pub fn transition(&self, next: RunState) {
        let mut runs = lock_map(&self.runs);
        let prev = runs.insert(self.user_id.clone(), next);
        info!(
            user_id = %self.user_id,
            from = %prev.unwrap_or(RunState::Idle),
            to = %next,
            "Run state changed"
        );
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_map(&self.runs).remove(&self.user_id);
        info!(user_id = %self.user_id, "Run lock released");
    }
}
