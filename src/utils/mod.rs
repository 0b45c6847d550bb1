pub mod sse;
pub mod text;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks without propagating poisoning; state is always left consistent
/// between lock acquisitions.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
