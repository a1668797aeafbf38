//! Deferred function calls
//!
//! Interrupt handlers shouldn't call into class drivers. Instead, they defer
//! a call into a [`DeferredQueue`], and a task drains the queue with
//! [`run()`](DeferredQueue::run).

use crate::{Error, Result};
use core::{
    cell::RefCell,
    sync::atomic::{AtomicU32, Ordering},
};
use critical_section::Mutex;
use heapless::Deque;

/// Where a deferred call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Origin {
    /// An interrupt handler. The call can't be retried.
    Isr,
    /// Task context. The caller can retry.
    Task,
}

/// A function, and the argument it'll receive
///
/// A deferred call runs at most once.
pub struct DeferredCall<A> {
    func: fn(A),
    arg: A,
    origin: Origin,
}

impl<A> DeferredCall<A> {
    pub fn new(func: fn(A), arg: A, origin: Origin) -> Self {
        DeferredCall { func, arg, origin }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Run the call, consuming it
    pub fn call(self) {
        (self.func)(self.arg)
    }
}

/// A bounded FIFO of deferred calls
///
/// `N` is the queue capacity. Calls are safe to defer from any context.
pub struct DeferredQueue<A, const N: usize> {
    calls: Mutex<RefCell<Deque<DeferredCall<A>, N>>>,
    dropped: AtomicU32,
}

impl<A, const N: usize> DeferredQueue<A, N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        DeferredQueue {
            calls: Mutex::new(RefCell::new(Deque::new())),
            dropped: AtomicU32::new(0),
        }
    }

    /// Defer `func(arg)`
    ///
    /// If the queue is full, this returns [`Error::QueueFull`], and the call
    /// never runs. A full queue in an interrupt handler also counts towards
    /// [`dropped()`](Self::dropped), since the interrupt can't retry.
    pub fn defer(&self, func: fn(A), arg: A, origin: Origin) -> Result<()> {
        self.push(DeferredCall::new(func, arg, origin))
    }

    /// Defer a prepared call
    pub fn push(&self, call: DeferredCall<A>) -> Result<()> {
        critical_section::with(|cs| {
            let origin = call.origin;
            let mut calls = self.calls.borrow_ref_mut(cs);
            if calls.push_back(call).is_err() {
                if origin == Origin::Isr {
                    // Load and store are enough inside the critical section.
                    let dropped = self.dropped.load(Ordering::Relaxed);
                    self.dropped
                        .store(dropped.saturating_add(1), Ordering::Relaxed);
                    warn!("DEFERRED QUEUE FULL dropped={}", dropped.saturating_add(1));
                }
                return Err(Error::QueueFull);
            }
            Ok(())
        })
    }

    /// Take the oldest call, without running it
    pub fn pop(&self) -> Option<DeferredCall<A>> {
        critical_section::with(|cs| self.calls.borrow_ref_mut(cs).pop_front())
    }

    /// Run deferred calls, oldest first, until the queue is empty
    ///
    /// Calls run outside of the critical section, so they may defer more
    /// calls. Returns the number of calls that ran.
    pub fn run(&self) -> usize {
        let mut count = 0;
        while let Some(call) = self.pop() {
            call.call();
            count += 1;
        }
        if count > 0 {
            trace!("DEFERRED RAN {}", count);
        }
        count
    }

    /// Returns the number of calls waiting to run
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.calls.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of interrupt-deferred calls lost to a full queue
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<A, const N: usize> Default for DeferredQueue<A, N> {
    fn default() -> Self {
        Self::new()
    }
}
