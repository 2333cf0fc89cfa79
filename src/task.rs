//! Cancellable fixed-interval background work.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A loop that runs `tick` once per period until stopped.
///
/// Stopping only takes effect between ticks: a tick already running is
/// allowed to finish, and [`join`](PeriodicTask::join) bounds how long the
/// owner waits for it.
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// The first tick fires one full `period` after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = loop_token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // Outside the select so cancellation cannot cut a tick short.
                tick().await;
            }
            tracing::debug!(task = name, "periodic task stopped");
        });

        Self {
            name,
            token,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to exit after any tick in progress.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait up to `grace` for the loop to exit. Returns `false` if it
    /// had to be aborted.
    pub async fn join(mut self, grace: Duration) -> bool {
        self.stop();
        match time::timeout(grace, &mut self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(task = self.name, "periodic task ended abnormally: {e}");
                true
            }
            Err(_) => {
                tracing::warn!(
                    task = self.name,
                    grace_ms = grace.as_millis() as u64,
                    "periodic task did not stop within grace period; aborting"
                );
                self.handle.abort();
                false
            }
        }
    }
}

/// Stop every task, then wait for all of them under one shared `grace`
/// deadline. Returns the names of tasks that had to be aborted.
pub async fn join_all(tasks: Vec<PeriodicTask>, grace: Duration) -> Vec<&'static str> {
    for task in &tasks {
        task.stop();
    }
    let deadline = time::Instant::now() + grace;
    let mut aborted = Vec::new();
    for task in tasks {
        let name = task.name();
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        if !task.join(remaining).await {
            aborted.push(name);
        }
    }
    aborted
}
