use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Take a read guard, recovering the data if a writer panicked.
pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    cache: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), cache, op, "rwlock.read")
}

/// Take a write guard, recovering the data if a writer panicked.
///
/// Every cache mutation applies all of its field changes under one of these
/// guards, so a recovered state is always a fully applied one.
pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    cache: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), cache, op, "rwlock.write")
}

fn recover<G>(
    result: LockResult<G>,
    cache: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            cache,
            op,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}
