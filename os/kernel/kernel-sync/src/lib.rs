//! # Kernel synchronization primitives
//!
//! Spin-based locks used by the memory-management core:
//!
//! * [`RawSpin`]: a bare test-and-test-and-set flag without data.
//! * [`SpinLock`]: data protected by a [`RawSpin`], handed out through an RAII guard.
//! * [`RecursiveSpinLock`]: a re-entrant variant that lets the owning thread
//!   acquire the lock again while it already holds it.
//!
//! Re-entrant locks need to know *who* holds them. The kernel registers its
//! current-thread lookup via [`set_owner_id_source`]; hosted builds with the
//! `std` feature fall back to a per-OS-thread identity.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "std")]
extern crate std;

mod owner;
mod raw_spin;
mod recursive_spin_lock;
mod spin_lock;

pub use owner::{OwnerId, current_owner_id, set_owner_id_source};
pub use raw_spin::RawSpin;
pub use recursive_spin_lock::{RecursiveSpinLock, RecursiveSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
