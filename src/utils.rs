// Shared helpers

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering from poisoning.
///
/// Coordination state lives in the database, so a panic in another thread
/// cannot leave the in-memory side inconsistent; recovering is safe.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}
