//! Soft ceiling on file content bytes held in memory.
//!
//! Every loaded file reserves its length before the read and gives it back once
//! processing is over. A reservation is granted whenever current usage is below
//! the ceiling, regardless of its own size. Only the reservation that crosses the
//! ceiling can push usage over it, so usage stays below the ceiling plus the
//! largest file. A file larger than the ceiling still loads once usage drops.
//!
//! The budget is shared by every job running on every runner that was handed
//! the same `Arc<ByteBudget>`. Waiters are not served in FIFO order.

use std::{
  sync::{Arc, Condvar, Mutex, MutexGuard},
  time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Errors returned by [`ByteBudget::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
  /// Cancellation fired while waiting; nothing was reserved.
  #[error("Cancelled while waiting for memory budget")]
  Cancelled,
  /// Another thread panicked while holding the budget lock.
  #[error("Memory budget lock poisoned")]
  Poisoned,
}

#[derive(Debug, Default)]
struct BudgetState {
  reserved: u64,
  peak: u64,
}

/// Process-wide byte budget, constructed by the host and injected into runners.
#[derive(Debug)]
pub struct ByteBudget {
  ceiling: u64,
  wait_interval: Duration,
  state: Mutex<BudgetState>,
  released: Condvar,
}

impl ByteBudget {
  /// Create a budget with the default 100ms cancellation re-check interval.
  pub fn new(ceiling: u64) -> Arc<Self> {
    Self::with_wait_interval(ceiling, Duration::from_millis(100))
  }

  /// Create a budget whose waiters re-check cancellation at least every `wait_interval`.
  ///
  /// A zero ceiling is raised to one byte; otherwise no reservation could ever be granted.
  pub fn with_wait_interval(ceiling: u64, wait_interval: Duration) -> Arc<Self> {
    Arc::new(Self {
      ceiling: ceiling.max(1),
      wait_interval,
      state: Mutex::new(BudgetState::default()),
      released: Condvar::new(),
    })
  }

  pub fn ceiling(&self) -> u64 {
    self.ceiling
  }

  /// Bytes currently reserved. A snapshot, stale as soon as it's returned.
  pub fn reserved(&self) -> u64 {
    self.lock_or_recover().reserved
  }

  /// Highest reservation total observed since construction.
  pub fn peak(&self) -> u64 {
    self.lock_or_recover().peak
  }

  /// Reserve `bytes`, blocking while usage is at or above the ceiling.
  ///
  /// Returns `BudgetError::Cancelled` without reserving if `cancel` fires while waiting.
  pub fn reserve(self: &Arc<Self>, bytes: u64, cancel: &CancellationToken) -> Result<BudgetReservation, BudgetError> {
    let mut state = self.state.lock().map_err(|_| BudgetError::Poisoned)?;
    while state.reserved >= self.ceiling {
      if cancel.is_cancelled() {
        return Err(BudgetError::Cancelled);
      }
      let (guard, _) = self
        .released
        .wait_timeout(state, self.wait_interval)
        .map_err(|_| BudgetError::Poisoned)?;
      state = guard;
    }

    state.reserved += bytes;
    state.peak = state.peak.max(state.reserved);
    trace!(bytes, reserved = state.reserved, ceiling = self.ceiling, "Reserved memory budget");

    Ok(BudgetReservation {
      budget: Arc::clone(self),
      bytes,
    })
  }

  fn release(&self, bytes: u64) {
    let mut state = self.lock_or_recover();
    debug_assert!(
      state.reserved >= bytes,
      "released {} bytes but only {} reserved",
      bytes,
      state.reserved
    );
    state.reserved = state.reserved.saturating_sub(bytes);
    if state.reserved < self.ceiling {
      self.released.notify_all();
    }
  }

  /// Release paths must not panic, so a poisoned lock is recovered.
  fn lock_or_recover(&self) -> MutexGuard<'_, BudgetState> {
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poison) => poison.into_inner(),
    }
  }
}

/// Bytes held against a [`ByteBudget`]; released on drop.
#[derive(Debug)]
#[must_use = "dropping the reservation releases the bytes immediately"]
pub struct BudgetReservation {
  budget: Arc<ByteBudget>,
  bytes: u64,
}

impl BudgetReservation {
  pub fn bytes(&self) -> u64 {
    self.bytes
  }
}

impl Drop for BudgetReservation {
  fn drop(&mut self) {
    self.budget.release(self.bytes);
  }
}
