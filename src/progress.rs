//! Cooperative deadline/cancellation runtime.
//!
//! Threads a single-use [`futures::channel::oneshot`] through a future rather
//! than spawning: a [`Progress`] is a cheap, cloneable handle shared between
//! the driving task and every task it hands off work to, and a
//! [`ProgressController`] is the single-use owner that drives one root task
//! to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Before,
    Running,
    Finished,
    Aborted,
}

type CleanupFn = Box<dyn FnOnce(&Error) + Send>;

struct Inner {
    state: Mutex<State>,
    abort_tx: Mutex<Option<oneshot::Sender<Error>>>,
    abort_rx: Shared<oneshot::Receiver<Error>>,
    abort_error: Mutex<Option<Error>>,
    cleanups: Mutex<Vec<CleanupFn>>,
    parent: Option<Progress>,
}

/// A cooperative handle carrying a deadline, a cancellation signal, and an
/// abort-only cleanup list. Cheap to clone; every clone observes the same
/// underlying state.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

impl Progress {
    fn new_root() -> (Progress, oneshot::Sender<Error>) {
        let (tx, rx) = oneshot::channel();
        let progress = Progress {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Before),
                abort_tx: Mutex::new(None),
                abort_rx: rx.shared(),
                abort_error: Mutex::new(None),
                cleanups: Mutex::new(Vec::new()),
                parent: None,
            }),
        };
        (progress, tx)
    }

    /// A child progress that races against its own abort signal in addition
    /// to the parent's — aborting the parent aborts every descendant.
    pub fn child(parent: &Progress) -> Progress {
        let (tx, rx) = oneshot::channel();
        Progress {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Before),
                abort_tx: Mutex::new(Some(tx)),
                abort_rx: rx.shared(),
                abort_error: Mutex::new(None),
                cleanups: Mutex::new(Vec::new()),
                parent: Some(parent.clone()),
            }),
        }
    }

    fn set_running(&self) {
        *self.inner.state.lock() = State::Running;
    }

    fn is_running(&self) -> bool {
        *self.inner.state.lock() == State::Running
    }

    pub fn is_aborted(&self) -> bool {
        *self.inner.state.lock() == State::Aborted
    }

    fn set_tx(&self, tx: oneshot::Sender<Error>) {
        *self.inner.abort_tx.lock() = Some(tx);
    }

    /// Aborts the controller while `running`, stamping `err` as an abort
    /// error and rejecting the abort signal exactly once. A no-op outside
    /// the `running` state.
    pub fn abort(&self, err: Error) {
        let mut state = self.inner.state.lock();
        if *state != State::Running {
            return;
        }
        *state = State::Aborted;
        drop(state);

        let stamped = err.stamp_abort();
        tracing::debug!(reason = %stamped.cause(), "progress aborted");
        *self.inner.abort_error.lock() = Some(stamped.clone());
        if let Some(tx) = self.inner.abort_tx.lock().take() {
            let _ = tx.send(stamped);
        }
    }

    fn finish(&self) {
        let mut state = self.inner.state.lock();
        if *state == State::Running {
            *state = State::Finished;
        }
    }

    /// Registers `cleanup` to run only if this progress ends up `aborted`.
    /// Runs immediately if already `aborted`; silently dropped if already
    /// `finished` — cleanup callbacks never run on normal completion, and
    /// once finished, nothing registered afterward executes.
    ///
    /// The two governing guarantees ("never run on normal completion" and
    /// "registered after finished never execute") pin down these two arms
    /// precisely; see `DESIGN.md` for the source text this resolves an
    /// apparent contradiction against.
    pub fn cleanup_when_aborted(&self, cleanup: impl FnOnce(&Error) + Send + 'static) {
        let state = *self.inner.state.lock();
        match state {
            State::Before | State::Running => {
                self.inner.cleanups.lock().push(Box::new(cleanup));
            }
            State::Aborted => {
                if let Some(err) = self.inner.abort_error.lock().clone() {
                    cleanup(&err);
                }
            }
            State::Finished => {}
        }
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.inner.cleanups.lock());
        let err = self
            .inner
            .abort_error
            .lock()
            .clone()
            .unwrap_or(Error::ChannelClosed);
        for cleanup in cleanups {
            cleanup(&err);
        }
    }

    fn abort_signal(&self) -> Pin<Box<dyn Future<Output = Error> + Send>> {
        let mine = self.inner.abort_rx.clone();
        let parent = self.inner.parent.clone();
        Box::pin(async move {
            match parent {
                Some(parent) => {
                    let parent_signal = parent.abort_signal();
                    match future::select(mine, parent_signal).await {
                        Either::Left((Ok(err), _)) => err,
                        Either::Left((Err(_), parent_signal)) => parent_signal.await,
                        Either::Right((err, _)) => err,
                    }
                }
                None => mine.await.unwrap_or(Error::ChannelClosed),
            }
        })
    }

    /// Races `fut` against this progress's abort signal (and any parent's),
    /// returning whichever resolves first. Abort wins deterministically once
    /// set, even if `fut` is also ready.
    pub async fn race<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        futures::pin_mut!(fut);
        match future::select(fut, self.abort_signal()).await {
            Either::Left((value, _)) => {
                if self.is_aborted() {
                    Err(self.current_abort_error())
                } else {
                    Ok(value)
                }
            }
            Either::Right((err, _)) => Err(err),
        }
    }

    fn current_abort_error(&self) -> Error {
        self.inner
            .abort_error
            .lock()
            .clone()
            .unwrap_or(Error::ChannelClosed)
    }

    /// Races `fut`; on success, registers `cleanup(&result)` as an abort-only
    /// cleanup. `T` must be `Clone` so the value can be handed to both the
    /// caller and the deferred cleanup.
    pub async fn race_with_cleanup<F, C>(&self, fut: F, cleanup: C) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Clone + Send + 'static,
        C: FnOnce(&F::Output, &Error) + Send + 'static,
    {
        let result = self.race(fut).await?;
        let for_cleanup = result.clone();
        self.cleanup_when_aborted(move |err| cleanup(&for_cleanup, err));
        Ok(result)
    }

    /// `race(delay(ms))` — suspends for `ms` milliseconds unless aborted
    /// first.
    pub async fn wait(&self, ms: u64) -> Result<()> {
        self.race(crate::timer::delay(Duration::from_millis(ms)))
            .await
    }

    /// Delegates to the parent progress's log sink if present, else logs on
    /// this crate's `tracing` side channel.
    pub fn log(&self, msg: &str) {
        if let Some(parent) = &self.inner.parent {
            parent.log(msg);
        } else {
            tracing::debug!(target: "pagewright::progress", "{msg}");
        }
    }
}

/// The single-use owner of a root [`Progress`]: converts any task into a
/// cancellable, timeout-bounded operation.
pub struct ProgressController {
    progress: Progress,
    tx: Mutex<Option<oneshot::Sender<Error>>>,
    timeout: Option<Duration>,
    used: AtomicBool,
}

impl ProgressController {
    pub fn new(timeout: Option<Duration>) -> Self {
        let (progress, tx) = Progress::new_root();
        Self {
            progress,
            tx: Mutex::new(Some(tx)),
            timeout,
            used: AtomicBool::new(false),
        }
    }

    /// A handle to the progress before (or while) it runs — e.g. to call
    /// [`Progress::abort`] from outside the task.
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Runs `task` exactly once. Transitions `before -> running`, starts the
    /// optional timeout alarm, and awaits the task. On success: `finished`.
    /// On error: if still running, aborts with the caught error. The timer
    /// is always cleared; if the controller ends up `aborted`, every
    /// registered cleanup runs, swallowing nothing louder than what the
    /// cleanup itself raised (errors from cleanups are not observable here).
    ///
    /// # Panics
    /// Panics if called more than once — a `ProgressController` is single-
    /// use.
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(Progress) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if self.used.swap(true, Ordering::SeqCst) {
            panic!("ProgressController is single-use: run called more than once");
        }
        if let Some(tx) = self.tx.lock().take() {
            self.progress.set_tx(tx);
        }
        self.progress.set_running();

        let task_fut = task(self.progress.clone());
        let result = match self.timeout {
            Some(timeout) => {
                futures::pin_mut!(task_fut);
                match future::select(task_fut, crate::timer::delay(timeout)).await {
                    Either::Left((res, _)) => res,
                    Either::Right((_, _)) => {
                        self.progress.abort(Error::Timeout);
                        Err(self.progress.current_abort_error())
                    }
                }
            }
            None => task_fut.await,
        };

        match &result {
            Ok(_) => self.progress.finish(),
            Err(err) => self.progress.abort(err.clone()),
        }

        if self.progress.is_aborted() {
            self.progress.run_cleanups();
        }

        result
    }
}

/// Default timeout used by [`execute_with_progress`] when neither a parent
/// progress nor an explicit timeout is supplied (30s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `fn_` under a progress: reuses `progress` (racing only, no new
/// deadline) if given, else creates a fresh controller with `timeout`
/// (defaulting to [`DEFAULT_TIMEOUT`]).
pub async fn execute_with_progress<F, Fut, T>(
    fn_: F,
    timeout: Option<Duration>,
    progress: Option<Progress>,
) -> Result<T>
where
    F: FnOnce(Progress) -> Fut,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    match progress {
        Some(parent) => parent.race(fn_(parent.clone())).await?,
        None => {
            let controller = ProgressController::new(Some(timeout.unwrap_or(DEFAULT_TIMEOUT)));
            controller.run(fn_).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn run_resolves_normally_without_cleanup() {
        let controller = ProgressController::new(None);
        let cleaned = Arc::new(AtomicBool::new(false));
        let cleaned2 = cleaned.clone();
        let result = controller
            .run(|progress| async move {
                progress.cleanup_when_aborted(move |_| cleaned2.store(true, Ordering::SeqCst));
                Ok::<_, Error>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert!(!cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_aborts_with_timeout_kind_and_runs_cleanup() {
        let controller = ProgressController::new(Some(Duration::from_millis(20)));
        let cleaned = Arc::new(AtomicBool::new(false));
        let cleaned2 = cleaned.clone();
        let result: Result<()> = controller
            .run(|progress| async move {
                progress.cleanup_when_aborted(move |_| cleaned2.store(true, Ordering::SeqCst));
                progress.wait(1000).await
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[should_panic(expected = "single-use")]
    async fn run_twice_panics() {
        let controller = ProgressController::new(None);
        let _ = controller.run(|_| async { Ok::<_, Error>(()) }).await;
        let _ = controller.run(|_| async { Ok::<_, Error>(()) }).await;
    }

    #[tokio::test]
    async fn abort_called_externally_cancels_running_task() {
        let controller = ProgressController::new(None);
        let handle = controller.progress();
        let task = controller.run(|progress| async move { progress.wait(5_000).await });
        // Abort shortly after starting.
        let aborter = async move {
            crate::timer::delay(Duration::from_millis(10)).await;
            handle.abort(Error::AdapterFailure("stop".into()));
        };
        let (result, _) = futures::join!(task, aborter);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn cleanup_registered_after_finished_never_runs() {
        let controller = ProgressController::new(None);
        let _ = controller.run(|_| async { Ok::<_, Error>(()) }).await;
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        controller
            .progress()
            .cleanup_when_aborted(move |_| ran2.fetch_add(1, Ordering::SeqCst));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
