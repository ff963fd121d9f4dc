//! Scheduling harness for background loops.
//!
//! The harness owns timing and cancellation only; each loop body is an async
//! closure that can be exercised directly in tests.

use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Longer periods would overflow the clock when the next deadline is computed.
const MAX_PERIOD: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Handle to a running periodic task. Dropping the handle stops the task.
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Run `tick` every `period`, first after one full period.
    ///
    /// The task stops when `parent` or the returned handle is cancelled. A tick
    /// that is in flight when cancellation arrives is abandoned at its next
    /// await point.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // tokio intervals panic on a zero period
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let token = parent.child_token();
        let shutdown = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                task = name,
                period_ms = period.as_millis() as u64,
                "Background task started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                debug!(task = name, "Background task tick");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick() => {}
                }
            }
            info!(task = name, "Background task stopped");
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!(task = self.name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
