//! Borrower handles and the acquire future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};

use crate::core::Engine;
use crate::errors::{PoolError, PoolResult};
use crate::slot::PooledRef;

pub(crate) const SUBSCRIBED: u8 = 0;
pub(crate) const CLAIMED: u8 = 1;
pub(crate) const DELIVERED: u8 = 2;
pub(crate) const FAILED: u8 = 3;
pub(crate) const CANCELLED: u8 = 4;

/// One pending acquire request. The state field is the synchronization point
/// between the drain (claim/deliver/fail) and the borrower's task (cancel on
/// drop). Terminal payloads are committed while holding the payload mutex so
/// a woken task never observes a terminal state without its payload.
pub(crate) struct Borrower<T: Send + 'static> {
    state: AtomicU8,
    payload: Mutex<Option<PoolResult<PooledRef<T>>>>,
    waker: Mutex<Option<Waker>>,
}

impl<T: Send + 'static> Borrower<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SUBSCRIBED),
            payload: Mutex::new(None),
            waker: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Reserve this borrower for an incoming resource. Fails if it was
    /// cancelled or failed in the meantime.
    pub(crate) fn claim(&self) -> bool {
        self.state
            .compare_exchange(SUBSCRIBED, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undo a claim when the permit race is lost; the borrower goes back to
    /// the pending queue.
    pub(crate) fn unclaim(&self) {
        let _ = self.state.compare_exchange(
            CLAIMED,
            SUBSCRIBED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Hand a resource to the borrower. If cancellation won the race, the
    /// reference is dropped here and its drop routes the resource back
    /// through the release path, so the accounting stays intact.
    pub(crate) fn deliver(&self, pooled: PooledRef<T>) {
        let mut payload = self.payload.lock().unwrap();
        if self
            .state
            .compare_exchange(CLAIMED, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *payload = Some(Ok(pooled));
            drop(payload);
            self.wake();
        } else {
            drop(payload);
            drop(pooled);
        }
    }

    /// Fail the borrower. No-op once it is delivered, cancelled or already
    /// failed.
    pub(crate) fn fail(&self, err: PoolError) {
        let mut payload = self.payload.lock().unwrap();
        let mut state = self.state.load(Ordering::Acquire);
        while state == SUBSCRIBED || state == CLAIMED {
            match self.state.compare_exchange(
                state,
                FAILED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    *payload = Some(Err(err));
                    drop(payload);
                    self.wake();
                    return;
                }
                Err(actual) => state = actual,
            }
        }
    }

    /// Withdraw the request. A borrower still queued is skipped by the drain;
    /// one already claimed has its delivery rebounced; one already delivered
    /// but never polled out has the undelivered resource returned here.
    pub(crate) fn cancel(&self) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            match state {
                SUBSCRIBED | CLAIMED => {
                    match self.state.compare_exchange(
                        state,
                        CANCELLED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(actual) => state = actual,
                    }
                }
                DELIVERED => {
                    let undelivered = self.payload.lock().unwrap().take();
                    drop(undelivered);
                    return;
                }
                _ => return,
            }
        }
    }

    pub(crate) fn take_payload(&self) -> Option<PoolResult<PooledRef<T>>> {
        self.payload.lock().unwrap().take()
    }

    pub(crate) fn register_waker(&self, waker: &Waker) {
        *self.waker.lock().unwrap() = Some(waker.clone());
    }

    fn wake(&self) {
        let waker = self.waker.lock().unwrap().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Cold future returned by `acquire()`.
///
/// Nothing happens until the first poll, which registers the request with the
/// pool. Dropping the future before it resolves cancels the request; a
/// resource that was already committed to it is returned to the pool through
/// the release path.
#[must_use = "the pool sees nothing until the acquire future is polled"]
pub struct Acquire<T: Send + 'static> {
    engine: Arc<dyn Engine<T>>,
    borrower: Option<Arc<Borrower<T>>>,
    done: bool,
}

impl<T: Send + 'static> Acquire<T> {
    pub(crate) fn new(engine: Arc<dyn Engine<T>>) -> Self {
        Self {
            engine,
            borrower: None,
            done: false,
        }
    }
}

impl<T: Send + 'static> Future for Acquire<T> {
    type Output = PoolResult<PooledRef<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            return Poll::Pending;
        }

        let borrower = match &this.borrower {
            Some(borrower) => {
                borrower.register_waker(cx.waker());
                borrower.clone()
            }
            None => {
                if this.engine.core().is_terminated() {
                    this.done = true;
                    return Poll::Ready(Err(PoolError::Shutdown));
                }
                let borrower = Arc::new(Borrower::new());
                this.borrower = Some(borrower.clone());
                borrower.register_waker(cx.waker());
                this.engine.clone().do_acquire(borrower.clone());
                borrower
            }
        };

        // Re-check after registering the waker: delivery may have happened
        // inline during do_acquire or between registration and now.
        match borrower.state() {
            DELIVERED | FAILED => match borrower.take_payload() {
                Some(result) => {
                    this.done = true;
                    Poll::Ready(result)
                }
                None => Poll::Pending,
            },
            _ => Poll::Pending,
        }
    }
}

impl<T: Send + 'static> Drop for Acquire<T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(borrower) = &self.borrower {
                borrower.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let borrower: Borrower<u32> = Borrower::new();
        assert!(borrower.claim());
        assert!(!borrower.claim());
        assert_eq!(borrower.state(), CLAIMED);
    }

    #[test]
    fn cancel_before_claim_wins() {
        let borrower: Borrower<u32> = Borrower::new();
        borrower.cancel();
        assert!(!borrower.claim());
        assert_eq!(borrower.state(), CANCELLED);
    }

    #[test]
    fn unclaim_reopens_the_request() {
        let borrower: Borrower<u32> = Borrower::new();
        assert!(borrower.claim());
        borrower.unclaim();
        assert!(borrower.claim());
    }

    #[test]
    fn unclaim_does_not_resurrect_a_cancelled_request() {
        let borrower: Borrower<u32> = Borrower::new();
        assert!(borrower.claim());
        borrower.cancel();
        borrower.unclaim();
        assert_eq!(borrower.state(), CANCELLED);
    }

    #[test]
    fn fail_commits_payload() {
        let borrower: Borrower<u32> = Borrower::new();
        borrower.fail(PoolError::Shutdown);
        assert_eq!(borrower.state(), FAILED);
        assert!(matches!(
            borrower.take_payload(),
            Some(Err(PoolError::Shutdown))
        ));
    }

    #[test]
    fn fail_after_cancel_is_ignored() {
        let borrower: Borrower<u32> = Borrower::new();
        borrower.cancel();
        borrower.fail(PoolError::Shutdown);
        assert_eq!(borrower.state(), CANCELLED);
        assert!(borrower.take_payload().is_none());
    }
}
