use crate::{OwnerId, RawSpin, current_owner_id};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Owner value of an unheld lock.
const NO_OWNER: OwnerId = 0;

/// A spin lock the holding owner may acquire again.
///
/// Each nested [`lock`](Self::lock) bumps a depth counter; the lock is
/// released when the outermost guard drops. Since several guards of the same
/// owner may be alive at once, guards only hand out `&T`. Protect mutable state
/// with a `RefCell` (or atomics) inside the lock and keep borrows short: a
/// `RefCell` borrow held across a re-entrant call will panic, not deadlock.
///
/// ```
/// # use core::cell::RefCell;
/// # use kernel_sync::RecursiveSpinLock;
/// let lock = RecursiveSpinLock::new(RefCell::new(0));
/// let outer = lock.lock();
/// {
///     let inner = lock.lock();
///     *inner.borrow_mut() += 1;
/// }
/// assert_eq!(*outer.borrow(), 1);
/// ```
pub struct RecursiveSpinLock<T> {
    raw: RawSpin,
    owner: AtomicUsize,
    /// Nesting depth; only read or written by the current owner.
    depth: UnsafeCell<usize>,
    inner: T,
}

// Safety: the raw lock serializes owners; only T: Send may cross threads.
unsafe impl<T: Send> Sync for RecursiveSpinLock<T> {}
unsafe impl<T: Send> Send for RecursiveSpinLock<T> {}

impl<T> RecursiveSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            raw: RawSpin::new(),
            owner: AtomicUsize::new(NO_OWNER),
            depth: UnsafeCell::new(0),
            inner,
        }
    }

    /// Spin until acquired, or nest if the caller already holds the lock.
    #[inline]
    pub fn lock(&self) -> RecursiveSpinLockGuard<'_, T> {
        let me = current_owner_id();
        if self.owner.load(Ordering::Relaxed) == me {
            // Safety: we are the owner; nobody else touches `depth`.
            unsafe { *self.depth.get() += 1 };
        } else {
            self.raw.lock();
            self.take_ownership(me);
        }
        RecursiveSpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Try once; nests if already held by the caller.
    #[inline]
    pub fn try_lock(&self) -> Option<RecursiveSpinLockGuard<'_, T>> {
        let me = current_owner_id();
        if self.owner.load(Ordering::Relaxed) == me {
            // Safety: see `lock`.
            unsafe { *self.depth.get() += 1 };
        } else if self.raw.try_lock() {
            self.take_ownership(me);
        } else {
            return None;
        }
        Some(RecursiveSpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let g = self.lock();
        f(&g)
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Whether the calling owner currently holds this lock.
    #[inline]
    #[must_use]
    pub fn is_locked_by_current_owner(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_owner_id()
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    #[inline]
    fn take_ownership(&self, me: OwnerId) {
        self.owner.store(me, Ordering::Relaxed);
        // Safety: we just acquired the raw lock.
        unsafe { *self.depth.get() = 1 };
    }
}

impl<T: Default> Default for RecursiveSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct RecursiveSpinLockGuard<'a, T> {
    lock: &'a RecursiveSpinLock<T>,
    /// The guard is tied to the owner that took it.
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for RecursiveSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.lock.inner
    }
}

impl<T> Drop for RecursiveSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Safety: guards only exist while their owner holds the lock.
        let depth = unsafe { &mut *self.lock.depth.get() };
        *depth -= 1;
        if *depth == 0 {
            self.lock.owner.store(NO_OWNER, Ordering::Relaxed);
            unsafe { self.lock.raw.unlock() }
        }
    }
}
