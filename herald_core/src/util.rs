/*!
 * Small shared helpers.
 */

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/**
 * Locks a mutex, recovering the guard if a previous holder panicked.
 *
 * The bus isolates handler panics with `catch_unwind` before they can
 * poison anything, so a poisoned lock here means an internal defect;
 * continuing with the inner state is strictly better than cascading
 * panics through the dispatch threads.
 */
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
