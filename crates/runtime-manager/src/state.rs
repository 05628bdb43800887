//! Single-flight readiness state.
//!
//! At most one initialization chain is in flight per manager. Every caller
//! that arrives while it runs awaits the same shared future and observes the
//! same outcome. The chain settles the state itself, so it completes even if
//! every caller stops waiting.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};

use pywarden_core::RuntimeError;

/// Outcome of one initialization chain: the resolved package tool.
pub type InitResult = Result<PathBuf, RuntimeError>;
pub type InitFuture = Shared<BoxFuture<'static, InitResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    Ready,
}

enum InitState {
    Uninitialized,
    Initializing { generation: u64, future: InitFuture },
    Ready { generation: u64, tool: PathBuf },
}

pub enum Acquired {
    Ready(PathBuf),
    Pending(InitFuture),
}

pub struct InitCell {
    inner: Mutex<Inner>,
}

struct Inner {
    state: InitState,
    next_generation: u64,
}

impl InitCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: InitState::Uninitialized,
                next_generation: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> InitPhase {
        match self.lock().state {
            InitState::Uninitialized => InitPhase::Uninitialized,
            InitState::Initializing { .. } => InitPhase::Initializing,
            InitState::Ready { .. } => InitPhase::Ready,
        }
    }

    /// Returns the ready tool, joins the chain in flight, or starts a new one.
    ///
    /// `start` receives the new generation and must return a future that
    /// calls [`settle`](Self::settle) with it once the chain finishes. It is
    /// invoked under the lock, so it must not block.
    pub fn acquire<F>(&self, start: F) -> Acquired
    where
        F: FnOnce(u64) -> BoxFuture<'static, InitResult>,
    {
        let mut inner = self.lock();
        match &inner.state {
            InitState::Ready { tool, .. } => return Acquired::Ready(tool.clone()),
            InitState::Initializing { future, .. } => return Acquired::Pending(future.clone()),
            InitState::Uninitialized => {}
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let future = start(generation).shared();
        tracing::info!(generation, "runtime initialization started");
        inner.state = InitState::Initializing {
            generation,
            future: future.clone(),
        };
        Acquired::Pending(future)
    }

    /// Records the outcome of chain `generation`; outcomes of superseded
    /// chains are ignored.
    pub fn settle(&self, generation: u64, result: &InitResult) {
        let mut inner = self.lock();
        let current = match &inner.state {
            InitState::Initializing { generation: g, .. } => *g,
            _ => {
                tracing::debug!(generation, "ignoring outcome of a settled chain");
                return;
            }
        };
        if current != generation {
            tracing::debug!(generation, current, "ignoring outcome of a superseded chain");
            return;
        }
        inner.state = match result {
            Ok(tool) => {
                tracing::info!(generation, "runtime ready");
                InitState::Ready {
                    generation,
                    tool: tool.clone(),
                }
            }
            Err(err) => {
                tracing::warn!(generation, error = %err, "runtime initialization failed");
                InitState::Uninitialized
            }
        };
    }

    /// Drops a `Ready` state so the next caller re-runs the chain.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if let InitState::Ready { generation, .. } = inner.state {
            tracing::info!(generation, "runtime readiness invalidated");
            inner.state = InitState::Uninitialized;
        }
    }
}

impl Default for InitCell {
    fn default() -> Self {
        Self::new()
    }
}
