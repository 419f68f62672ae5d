//! Monotonic progress counter with threshold-keyed async waiters.

use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use super::OtaError;

/// Upper bound on concurrently registered waiters. The session itself
/// only ever parks one; the headroom is for host-side observers.
pub const MAX_WAITERS: usize = 8;

struct Waiter {
    id: u32,
    threshold: u8,
    waker: Waker,
}

struct State {
    current: u8,
    fault: Option<OtaError>,
    next_id: u32,
    waiters: Vec<Waiter, MAX_WAITERS>,
}

/// Device-reported percentage, updated from the notification context and
/// awaited from the session. Updates are monotonic; regressions are
/// ignored. After [`ProgressTracker::reject_all`] the tracker stays
/// poisoned until the next session resets it.
pub struct ProgressTracker<M: RawMutex> {
    state: Mutex<M, RefCell<State>>,
}

impl<M: RawMutex> ProgressTracker<M> {
    pub const fn new() -> Self {
        ProgressTracker {
            state: Mutex::new(RefCell::new(State {
                current: 0,
                fault: None,
                next_id: 0,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn current(&self) -> u8 {
        self.state.lock(|s| s.borrow().current)
    }

    /// Raises the counter and wakes every waiter whose threshold is now
    /// met. Lower or equal values are ignored.
    pub fn update(&self, pct: u8) {
        let mut ready: Vec<Waker, MAX_WAITERS> = Vec::new();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.fault.is_some() || pct <= s.current {
                return;
            }
            s.current = pct;
            let mut i = 0;
            while i < s.waiters.len() {
                if s.waiters[i].threshold <= pct {
                    let waiter = s.waiters.swap_remove(i);
                    let _ = ready.push(waiter.waker);
                } else {
                    i += 1;
                }
            }
        });
        for waker in ready {
            waker.wake();
        }
    }

    /// Fails every outstanding and future wait with `err`. The first
    /// error sticks.
    pub fn reject_all(&self, err: OtaError) {
        let mut ready: Vec<Waker, MAX_WAITERS> = Vec::new();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.fault.is_none() {
                s.fault = Some(err);
            }
            while let Some(waiter) = s.waiters.pop() {
                let _ = ready.push(waiter.waker);
            }
        });
        for waker in ready {
            waker.wake();
        }
    }

    /// Resolves once the counter reaches `threshold`, immediately if it
    /// already has. Dropping the future deregisters the waiter.
    pub fn wait_for(&self, threshold: u8) -> WaitFor<'_, M> {
        WaitFor {
            tracker: self,
            threshold,
            id: None,
        }
    }

    pub(crate) fn reset(&self) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.current = 0;
            s.fault = None;
            s.waiters.clear();
        });
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.lock(|s| s.borrow().waiters.len())
    }
}

impl<M: RawMutex> Default for ProgressTracker<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WaitFor<'a, M: RawMutex> {
    tracker: &'a ProgressTracker<M>,
    threshold: u8,
    id: Option<u32>,
}

impl<M: RawMutex> Future for WaitFor<'_, M> {
    type Output = Result<(), OtaError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let tracker = this.tracker;
        tracker.state.lock(|s| {
            let mut s = s.borrow_mut();
            if let Some(err) = s.fault {
                if let Some(id) = this.id.take() {
                    remove_waiter(&mut s.waiters, id);
                }
                return Poll::Ready(Err(err));
            }
            if s.current >= this.threshold {
                if let Some(id) = this.id.take() {
                    remove_waiter(&mut s.waiters, id);
                }
                return Poll::Ready(Ok(()));
            }
            match this.id {
                Some(id) => {
                    if let Some(pos) = s.waiters.iter().position(|w| w.id == id) {
                        s.waiters[pos].waker.clone_from(cx.waker());
                    } else if push_waiter(&mut s.waiters, id, this.threshold, cx).is_err() {
                        // the slot vanished under us and the table is
                        // full; stay hot and retry
                        cx.waker().wake_by_ref();
                    }
                }
                None => {
                    let id = s.next_id;
                    s.next_id = s.next_id.wrapping_add(1);
                    if push_waiter(&mut s.waiters, id, this.threshold, cx).is_ok() {
                        this.id = Some(id);
                    } else {
                        // table full: stay hot and retry on the next poll
                        cx.waker().wake_by_ref();
                    }
                }
            }
            Poll::Pending
        })
    }
}

impl<M: RawMutex> Drop for WaitFor<'_, M> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.tracker.state.lock(|s| {
                remove_waiter(&mut s.borrow_mut().waiters, id);
            });
        }
    }
}

fn push_waiter(
    waiters: &mut Vec<Waiter, MAX_WAITERS>,
    id: u32,
    threshold: u8,
    cx: &Context<'_>,
) -> Result<(), ()> {
    waiters
        .push(Waiter {
            id,
            threshold,
            waker: cx.waker().clone(),
        })
        .map_err(|_| ())
}

fn remove_waiter(waiters: &mut Vec<Waiter, MAX_WAITERS>, id: u32) {
    if let Some(pos) = waiters.iter().position(|w| w.id == id) {
        waiters.swap_remove(pos);
    }
}
