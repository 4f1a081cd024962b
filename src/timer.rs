//! Tiny runtime-agnostic timer/yield shims.
//!
//! `futures-timer` runs its own timer thread independent of tokio/async-std,
//! so [`delay`] works identically under either `tokio-runtime` or
//! `async-std-runtime`. Only the scheduler "yield once" primitive genuinely
//! differs per executor, so that one is gated with `cfg_if!`.

use std::time::Duration;

pub async fn delay(duration: Duration) {
    futures_timer::Delay::new(duration).await;
}

/// Yields to the scheduler exactly once, so that tasks queued by the
/// navigation just awaited get a chance to run before we return control to
/// the caller.
pub async fn yield_once() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-runtime")] {
            tokio::task::yield_now().await;
        } else if #[cfg(feature = "async-std-runtime")] {
            async_std::task::yield_now().await;
        } else {
            // Neither runtime feature enabled: best effort, still gives the
            // executor one poll cycle to drain anything already woken.
            delay(Duration::from_millis(0)).await;
        }
    }
}
