//! Locking primitives used by the drivers.
//!
//! The serial driver's byte handshake is re-entered freely: a display
//! update takes the driver lock, then each digit write takes it again,
//! then the handshake underneath takes it a third time.  The standard
//! library mutex deadlocks on that pattern, so the driver lock is a
//! re-entrant mutex with an explicit per-thread owner and a hold count.
//!
//! # Why a `ThreadId` owner? (for beginners)
//!
//! A re-entrant lock must answer "is the caller the thread that already
//! holds me?".  Anything process-scoped (a pid, a global) cannot answer
//! that: every thread of the process would look like the owner and two
//! threads could "recurse" into each other's critical sections.
//! `std::thread::ThreadId` is unique per thread for the life of the
//! process, which is exactly the identity the check needs.
//!
//! The guard hands out `&T` only — two nested guards on the same thread
//! would otherwise alias `&mut T`.  State that must be mutated under the
//! lock is wrapped in a `RefCell` by the owner of the lock, the same
//! composition the standard library documents for its re-entrant lock.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Ownership bookkeeping behind the re-entrant mutex.
#[derive(Debug)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Mutual-exclusion lock that the owning thread may acquire again without
/// blocking.  The lock is fully released when every acquisition has been
/// matched by a guard drop.
pub struct ReentrantMutex<T: ?Sized> {
    state: Mutex<OwnerState>,
    unlocked: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the ownership protocol guarantees that `&T` is only reachable
// from the single thread currently recorded as owner, so sharing the lock
// across threads requires no more than `T: Send`.  This mirrors the
// standard library's re-entrant lock; in particular `T: Sync` is NOT
// required, which is what allows `ReentrantMutex<RefCell<...>>`.
unsafe impl<T: Send + ?Sized> Send for ReentrantMutex<T> {}
unsafe impl<T: Send + ?Sized> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(OwnerState { owner: None, depth: 0 }),
            unlocked: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> ReentrantMutex<T> {
    /// Acquires the lock, blocking while another thread holds it.  A
    /// thread that already owns the lock is admitted immediately and the
    /// hold count incremented.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .unlocked
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        ReentrantMutexGuard { lock: self, _not_send: PhantomData }
    }

    /// Acquires the lock only if it is free or already owned by the
    /// calling thread.
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, T>> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
            }
            Some(owner) if owner == me => state.depth += 1,
            Some(_) => return None,
        }
        Some(ReentrantMutexGuard { lock: self, _not_send: PhantomData })
    }

    fn unlock_one(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(
            state.owner == Some(thread::current().id()) && state.depth > 0,
            "re-entrant mutex released without a matching acquire"
        );
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.unlocked.notify_all();
        }
    }

    /// Releases every level held by the calling thread and returns the
    /// count, for [`CondVar`] to restore after its wait.
    fn release_all(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(
            state.owner == Some(thread::current().id()) && state.depth > 0,
            "condition wait requires the lock to be held"
        );
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.unlocked.notify_all();
        depth
    }

    /// Re-takes the lock after a condition wait and restores the saved
    /// hold count.
    fn reacquire(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.owner.is_some() {
            state = self
                .unlocked
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    #[cfg(test)]
    fn held_depth(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .depth
    }
}

/// RAII guard for [`ReentrantMutex`]; releases one acquisition level on
/// drop.  Deliberately `!Send`: the lock owner is a thread identity.
pub struct ReentrantMutexGuard<'a, T: ?Sized> {
    lock: &'a ReentrantMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for ReentrantMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard exists only while the current thread is the
        // recorded owner, so no other thread can reach the data.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ReentrantMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_one();
    }
}

/// Condition variable for use with [`ReentrantMutex`].
///
/// The wait operations fully release the bound lock (however deeply it is
/// held), block, then restore the exact hold count — so the caller's
/// nesting is unchanged across the call.  Only `broadcast` is provided;
/// every call site in this subsystem wants all waiters woken.
pub struct CondVar {
    generation: Mutex<u64>,
    signalled: Condvar,
}

impl CondVar {
    pub fn new() -> Self {
        Self { generation: Mutex::new(0), signalled: Condvar::new() }
    }

    /// Blocks until the next broadcast.  Requires the lock behind `guard`
    /// to be held by the calling thread (guaranteed by the guard itself).
    pub fn wait<'a, T: ?Sized>(
        &self,
        guard: ReentrantMutexGuard<'a, T>,
    ) -> ReentrantMutexGuard<'a, T> {
        let lock = guard.lock;
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let target = *generation;

        let depth = lock.release_all();
        std::mem::forget(guard);

        while *generation == target {
            generation = self
                .signalled
                .wait(generation)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(generation);

        lock.reacquire(depth);
        ReentrantMutexGuard { lock, _not_send: PhantomData }
    }

    /// Like [`wait`](Self::wait) but bounded.  The relative timeout is
    /// converted to an absolute deadline up front so spurious wakeups do
    /// not extend the wait.  Returns the reacquired guard and `true` when
    /// a broadcast arrived, `false` on timeout.
    pub fn wait_timeout<'a, T: ?Sized>(
        &self,
        guard: ReentrantMutexGuard<'a, T>,
        timeout: Duration,
    ) -> (ReentrantMutexGuard<'a, T>, bool) {
        let lock = guard.lock;
        let deadline = Instant::now() + timeout;
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let target = *generation;

        let depth = lock.release_all();
        std::mem::forget(guard);

        let mut signalled = true;
        while *generation == target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                signalled = false;
                break;
            }
            let (g, _timed_out) = self
                .signalled
                .wait_timeout(generation, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            generation = g;
        }
        drop(generation);

        lock.reacquire(depth);
        (ReentrantMutexGuard { lock, _not_send: PhantomData }, signalled)
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.signalled.notify_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope guard with late, one-shot binding.
///
/// `bind` locks the given mutex on the first call and reports whether the
/// binding took effect; later calls are no-ops returning `false`.  The
/// lock is released when the guard leaves scope.
pub struct DeferredLock<'a, T: ?Sized> {
    guard: Option<ReentrantMutexGuard<'a, T>>,
    bound: bool,
}

impl<'a, T: ?Sized> DeferredLock<'a, T> {
    pub fn new() -> Self {
        Self { guard: None, bound: false }
    }

    /// Binds to and locks `mutex`.  Returns `false` if this guard has
    /// already been bound.
    pub fn bind(&mut self, mutex: &'a ReentrantMutex<T>) -> bool {
        if self.bound {
            return false;
        }
        self.bound = true;
        self.guard = Some(mutex.lock());
        true
    }

    /// Access to the bound guard, if any.
    pub fn guard(&self) -> Option<&ReentrantMutexGuard<'a, T>> {
        self.guard.as_ref()
    }
}

impl<T: ?Sized> Default for DeferredLock<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
