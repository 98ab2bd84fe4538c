// SPDX-License-Identifier: Apache-2.0

//! A `Gate` is a monitor combining a condition flag with a task waker: it
//! lets a producer outside the event loop (a stream reader/writer) block
//! until the loop records that an operation would no longer block, without
//! the loop ever needing to hold a lock while mutating connection state.
//!
//! `wait_and_lock` never returns a spurious wakeup: success means the
//! predicate the caller is polling still holds at the moment it observes
//! the gate open.

use atomic_waker::AtomicWaker;
use core::{
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll},
};

#[derive(Debug, Default)]
pub struct Gate {
    /// "the operation this gate guards would not currently block"
    ready: AtomicBool,
    waker: AtomicWaker,
}

impl Gate {
    pub fn new(initially_ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(initially_ready),
            waker: AtomicWaker::new(),
        }
    }

    /// Unconditional read of the current condition, for callers on the
    /// event-loop side that never block.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Called by the event loop: records the new condition and wakes any
    /// waiting caller if it became ready.
    pub fn unlock(&self, condition_met: bool) {
        let was_ready = self.ready.swap(condition_met, Ordering::AcqRel);
        if condition_met && !was_ready {
            self.waker.wake();
        }
    }

    /// Polls the gate, registering `cx` for a wakeup if not yet ready.
    /// Matches the `Future::poll` shape so suspension points can be built
    /// directly on top of it.
    pub fn poll_wait(&self, cx: &mut Context) -> Poll<()> {
        if self.is_ready() {
            return Poll::Ready(());
        }
        self.waker.register(cx.waker());
        // re-check after registering to avoid a missed wakeup race
        if self.is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::future::Future;
    use futures_test::task::noop_context;

    #[test]
    fn closed_gate_stays_pending_until_unlocked() {
        let gate = Gate::new(false);
        let mut cx = noop_context();
        assert_eq!(gate.poll_wait(&mut cx), Poll::Pending);
        gate.unlock(true);
        assert_eq!(gate.poll_wait(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn initially_ready_gate_never_blocks() {
        let gate = Gate::new(true);
        let mut cx = noop_context();
        assert_eq!(gate.poll_wait(&mut cx), Poll::Ready(()));
    }

    struct WaitFor<'a>(&'a Gate);
    impl<'a> Future for WaitFor<'a> {
        type Output = ();
        fn poll(self: core::pin::Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
            self.0.poll_wait(cx)
        }
    }

    #[test]
    fn unlock_wakes_a_registered_waker() {
        use futures_test::task::new_count_waker;
        let (waker, count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);
        let gate = Gate::new(false);
        let fut = WaitFor(&gate);
        let fut = core::pin::pin!(fut);
        assert_eq!(fut.poll(&mut cx), Poll::Pending);
        gate.unlock(true);
        assert_eq!(count.get(), 1);
    }
}
