//! Pluggable clock behind the provisioning wait loops.
//!
//! Polling is fixed-interval with a hard wall-clock ceiling; routing both
//! `now` and `sleep` through this trait lets tests simulate elapsed time
//! without real delay.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Future returned by [`Clock::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Time source and sleep mechanism used by the provisioning loops.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspends for `duration`.
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Production clock backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}
