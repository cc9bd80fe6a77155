//! Lock-owner identity for re-entrant locks.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Identity of a lock owner; the kernel uses its current thread.
///
/// `0` is reserved for "unowned" and is never returned by [`current_owner_id`].
pub type OwnerId = usize;

/// Owner reported while nothing has been registered, i.e. on the boot CPU
/// before the scheduler exists.
#[cfg(not(feature = "std"))]
const BOOTSTRAP_OWNER: OwnerId = 1;

/// Registered `fn() -> OwnerId`, stored as an address. `0` means unset.
static OWNER_SOURCE: AtomicUsize = AtomicUsize::new(0);

/// Registers the function that reports the current owner (thread) id.
///
/// The function must return a non-zero id that is stable for the lifetime of
/// the calling thread and distinct from every other live thread's id.
/// Registering again replaces the previous source; do that only while no
/// [`RecursiveSpinLock`](crate::RecursiveSpinLock) is held.
pub fn set_owner_id_source(source: fn() -> OwnerId) {
    OWNER_SOURCE.store(source as usize, Ordering::Release);
}

/// Returns the id of the calling owner.
#[must_use]
pub fn current_owner_id() -> OwnerId {
    let raw = OWNER_SOURCE.load(Ordering::Acquire);
    if raw != 0 {
        // Safety: only `set_owner_id_source` writes non-zero values, and it
        // stores a `fn() -> OwnerId`.
        let source = unsafe { core::mem::transmute::<usize, fn() -> OwnerId>(raw) };
        let id = source();
        debug_assert_ne!(id, 0, "owner id source returned the reserved id 0");
        return id;
    }
    fallback_owner_id()
}

#[cfg(feature = "std")]
fn fallback_owner_id() -> OwnerId {
    std::thread_local! {
        static MARKER: u8 = const { 0 };
    }
    // Thread-local addresses are distinct between live threads and never null.
    MARKER.with(|marker| core::ptr::from_ref(marker) as usize)
}

#[cfg(not(feature = "std"))]
const fn fallback_owner_id() -> OwnerId {
    BOOTSTRAP_OWNER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_zero() {
        assert_ne!(current_owner_id(), 0);
    }

    #[cfg(feature = "std")]
    #[test]
    fn threads_get_distinct_ids() {
        let here = current_owner_id();
        let there = std::thread::spawn(current_owner_id).join().unwrap();
        assert_ne!(here, there);
    }
}
