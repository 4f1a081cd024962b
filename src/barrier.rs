//! SignalBarrier: the reference-counted waiter behind auto-wait. The driver
//! and the registration protocol that keeps a barrier alive across the
//! top-level navigations an action triggers live on
//! [`crate::frame_manager::FrameManager`], which is the only thing that knows
//! about the frame tree; this module only owns the counter and its
//! completion signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use pin_project_lite::pin_project;

/// A saturating reference count paired with a one-shot completion signal.
/// When the count transitions from 1 to 0, completion resolves exactly once.
/// Every barrier starts with a count of 1 — the caller's own hold, released
/// by [`SignalBarrier::wait_for`].
pub struct SignalBarrier {
    protect_count: AtomicU32,
    tx: Mutex<Option<oneshot::Sender<()>>>,
    rx: Shared<oneshot::Receiver<()>>,
}

impl SignalBarrier {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            protect_count: AtomicU32::new(1),
            tx: Mutex::new(Some(tx)),
            rx: rx.shared(),
        })
    }

    pub fn retain(&self) {
        self.protect_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements `protectCount`; resolves `completion` exactly once when it
    /// reaches zero. Calling this more times than `retain` was called is a
    /// logic error upstream, but is made harmless here (count floors at
    /// zero, completion still only fires once).
    pub fn release(&self) {
        let prev = self
            .protect_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0);
        if prev <= 1 {
            if let Some(tx) = self.tx.lock().take() {
                let _ = tx.send(());
            }
        }
    }

    pub fn protect_count(&self) -> u32 {
        self.protect_count.load(Ordering::SeqCst)
    }

    /// Releases this barrier's initial hold and awaits the count reaching
    /// zero.
    pub fn wait_for(&self) -> BarrierCompletion {
        self.release();
        BarrierCompletion {
            rx: self.rx.clone(),
        }
    }
}

pin_project! {
    /// The future returned by [`SignalBarrier::wait_for`]. A thin named
    /// wrapper around the shared completion receiver so waiting on a barrier
    /// doesn't require boxing or an opaque `impl Future`.
    pub struct BarrierCompletion {
        #[pin]
        rx: Shared<oneshot::Receiver<()>>,
    }
}

impl Future for BarrierCompletion {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}
