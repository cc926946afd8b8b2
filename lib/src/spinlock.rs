use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::cpu;

/// Owner value stored while the lock is free.
pub const NO_OWNER: u32 = u32::MAX;

/// Busy-waiting mutual-exclusion lock used during processor bring-up.
///
/// There is no scheduler and no interrupt dispatch at this stage, so the
/// lock neither masks interrupts nor touches preemption state: a waiter
/// simply spins until the holder releases.
///
/// Acquisition uses `Acquire` ordering and release uses `Release`, so every
/// memory effect made inside a held section is visible to the next acquirer
/// on any processor.
///
/// The `owner` field records the hardware identifier of the holder.  It is
/// only meaningful while `locked` is true.
pub struct SpinLock<T> {
    locked: AtomicBool,
    owner: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only handed out through a guard obtained by
// winning the `locked` compare-exchange, which is exclusive.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(NO_OWNER),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load so waiters don't keep the line exclusive.
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        self.owner.store(cpu::current_cpu_id(), Ordering::Relaxed);
        SpinLockGuard { lock: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(cpu::current_cpu_id(), Ordering::Relaxed);
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Identifier of the current holder, or `None` when free.
    pub fn owner(&self) -> Option<u32> {
        if !self.is_locked() {
            return None;
        }
        match self.owner.load(Ordering::Relaxed) {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    /// True if the executing processor holds this lock.
    pub fn is_held_by_current(&self) -> bool {
        self.owner() == Some(cpu::current_cpu_id())
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        // Clear the owner first; it is meaningless once `locked` drops.
        self.lock.owner.store(NO_OWNER, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
    }
}
