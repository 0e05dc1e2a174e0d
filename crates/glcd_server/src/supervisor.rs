//! Service supervision.
//!
//! Every service runs on its own task under a [`Supervisor`]. When a service
//! returns an error or panics it is restarted after an exponential backoff,
//! without touching its siblings or the ingress loop. A service that keeps
//! failing quickly is given up on and reported through
//! [`Supervisor::exhausted`].
//!
//! ```text
//! attempt:   1      2       3       4      ...
//! delay:   100ms  200ms   400ms   800ms  ... capped at 5s
//! ```
//!
//! A run that lasted at least `stable_after` counts as healthy and resets the
//! failure count.

use crate::error::HubError;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A long-running unit of work the supervisor can restart.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable name used in logs and exhaustion reports.
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled or the input dries up.
    ///
    /// Returning `Ok` ends supervision of this service. Returning an error or
    /// panicking triggers a restart.
    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError>;
}

/// Retry backoff policy.
///
/// The delay before restart `n` (0-indexed) is `first × factor^n`, clamped
/// to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Restart settings shared by every supervised service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Consecutive quick failures tolerated before giving up
    pub max_restarts: u32,
    pub backoff: BackoffPolicy,
    /// A run at least this long resets the failure count
    pub stable_after: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: BackoffPolicy::default(),
            stable_after: Duration::from_secs(30),
        }
    }
}

/// How one run of a service ended.
enum RunOutcome {
    Finished,
    Failed(String),
}

/// Owns the set of running services.
pub struct Supervisor {
    config: SupervisorConfig,
    shutdown: CancellationToken,
    actors: Vec<(&'static str, JoinHandle<()>)>,
    exhausted_tx: mpsc::UnboundedSender<&'static str>,
    exhausted_rx: mpsc::UnboundedReceiver<&'static str>,
}

impl Supervisor {
    /// Creates a supervisor whose services stop when `shutdown` is cancelled.
    pub fn new(config: SupervisorConfig, shutdown: CancellationToken) -> Self {
        let (exhausted_tx, exhausted_rx) = mpsc::unbounded_channel();
        Self {
            config,
            shutdown,
            actors: Vec::new(),
            exhausted_tx,
            exhausted_rx,
        }
    }

    /// Starts supervising `service`.
    pub fn spawn(&mut self, service: Arc<dyn Service>) {
        let name = service.name();
        let actor = ServiceActor {
            service,
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            exhausted: self.exhausted_tx.clone(),
        };
        info!(service = name, "🧩 Starting supervised service");
        self.actors.push((name, tokio::spawn(actor.run())));
    }

    /// Names of the supervised services, in start order.
    pub fn services(&self) -> Vec<&'static str> {
        self.actors.iter().map(|(name, _)| *name).collect()
    }

    /// Resolves with the name of the first service that gives up.
    ///
    /// Never resolves while every service is healthy.
    pub async fn exhausted(&mut self) -> &'static str {
        match self.exhausted_rx.recv().await {
            Some(name) => name,
            // The supervisor holds a sender itself, so this arm is unreachable
            // in practice; park instead of reporting a false failure.
            None => std::future::pending().await,
        }
    }

    /// Cancels every service and waits up to `grace` for them to stop.
    ///
    /// Returns `false` if some service was still running when the grace
    /// period ran out; those services are aborted and gone by the time this
    /// returns.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let deadline = Instant::now() + grace;
        let mut clean = true;

        for (name, mut handle) in self.actors {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => debug!(service = name, "Service stopped"),
                Err(_) => {
                    warn!(service = name, "⏰ Service did not stop within grace period, aborting");
                    handle.abort();
                    let _ = handle.await;
                    clean = false;
                }
            }
        }
        clean
    }
}

struct ServiceActor {
    service: Arc<dyn Service>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
    exhausted: mpsc::UnboundedSender<&'static str>,
}

impl ServiceActor {
    async fn run(self) {
        let name = self.service.name();
        let mut failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let outcome = self.run_once().await;
            let ran_for = started.elapsed();

            let reason = match outcome {
                RunOutcome::Finished => {
                    debug!(service = name, "Service finished");
                    break;
                }
                RunOutcome::Failed(reason) => reason,
            };
            if self.shutdown.is_cancelled() {
                break;
            }

            if ran_for >= self.config.stable_after {
                failures = 0;
            }
            failures += 1;

            if failures > self.config.max_restarts {
                error!(
                    service = name,
                    failures, "💀 Service keeps failing, giving up: {}", reason
                );
                let _ = self.exhausted.send(name);
                break;
            }

            let delay = self.config.backoff.next(failures - 1);
            warn!(
                service = name,
                attempt = failures,
                ?delay,
                "🔁 Service failed, restarting: {}",
                reason
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    /// Runs the service once on the actor's own task, so aborting the actor
    /// also drops the service.
    async fn run_once(&self) -> RunOutcome {
        let run = AssertUnwindSafe(self.service.run(self.shutdown.clone()));
        match run.catch_unwind().await {
            Ok(Ok(())) => RunOutcome::Finished,
            Ok(Err(err)) => RunOutcome::Failed(err.to_string()),
            Err(payload) => RunOutcome::Failed(panic_message(payload)),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{HubMessage, Inbound, ServiceInbox};
    use crate::services::serve;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
        assert_eq!(policy.next(10), Duration::from_secs(5));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(5));
    }

    /// Panics on the first `crash_times` runs, then waits for shutdown.
    struct Flaky {
        runs: AtomicU32,
        crash_times: u32,
    }

    #[async_trait]
    impl Service for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= self.crash_times {
                panic!("crash #{run}");
            }
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Service for AlwaysFails {
        fn name(&self) -> &'static str {
            "doomed"
        }

        async fn run(&self, _shutdown: CancellationToken) -> Result<(), HubError> {
            Err(HubError::Internal("boom".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_panics() {
        let flaky = Arc::new(Flaky {
            runs: AtomicU32::new(0),
            crash_times: 2,
        });
        let mut supervisor = Supervisor::new(SupervisorConfig::default(), CancellationToken::new());
        supervisor.spawn(flaky.clone());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.services(), vec!["flaky"]);
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_is_reported() {
        let mut supervisor = Supervisor::new(SupervisorConfig::default(), CancellationToken::new());
        supervisor.spawn(Arc::new(AlwaysFails));

        let name = tokio::time::timeout(Duration::from_secs(60), supervisor.exhausted())
            .await
            .expect("gives up in time");
        assert_eq!(name, "doomed");
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_keeps_running_when_one_fails() {
        let healthy = Arc::new(Flaky {
            runs: AtomicU32::new(0),
            crash_times: 0,
        });
        let mut supervisor = Supervisor::new(SupervisorConfig::default(), CancellationToken::new());
        supervisor.spawn(healthy.clone());
        supervisor.spawn(Arc::new(AlwaysFails));

        supervisor.exhausted().await;
        assert_eq!(healthy.runs.load(Ordering::SeqCst), 1);
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
    }

    /// Ticks forever and never looks at its shutdown token.
    struct Stubborn {
        ticks: AtomicU32,
    }

    #[async_trait]
    impl Service for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn run(&self, _shutdown: CancellationToken) -> Result<(), HubError> {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn service_ignoring_cancellation_is_stopped_at_shutdown() {
        let stubborn = Arc::new(Stubborn {
            ticks: AtomicU32::new(0),
        });
        let mut supervisor = Supervisor::new(SupervisorConfig::default(), CancellationToken::new());
        supervisor.spawn(stubborn.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!supervisor.shutdown(Duration::from_millis(100)).await);

        let at_shutdown = stubborn.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(stubborn.ticks.load(Ordering::SeqCst), at_shutdown);
    }

    /// Records every client it sees and panics on `crash_on`.
    struct Recorder {
        inbox: ServiceInbox,
        crash_on: &'static str,
        seen: Mutex<Vec<String>>,
        runs: AtomicU32,
    }

    #[async_trait]
    impl Service for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            serve(&self.inbox, &shutdown, |inbound| async move {
                if inbound.client == self.crash_on {
                    panic!("cannot handle {}", inbound.client);
                }
                self.seen.lock().unwrap().push(inbound.client);
            })
            .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_service_resumes_its_queue() {
        let (tx, rx) = mpsc::channel(16);
        let recorder = Arc::new(Recorder {
            inbox: Arc::new(tokio::sync::Mutex::new(rx)),
            crash_on: "C3",
            seen: Mutex::new(Vec::new()),
            runs: AtomicU32::new(0),
        });
        let sibling = Arc::new(Flaky {
            runs: AtomicU32::new(0),
            crash_times: 0,
        });
        let mut supervisor = Supervisor::new(SupervisorConfig::default(), CancellationToken::new());
        supervisor.spawn(recorder.clone());
        supervisor.spawn(sibling.clone());

        for client in ["C1", "C2", "C3", "C4", "C5"] {
            tx.send(Inbound {
                client: client.to_string(),
                message: HubMessage::Heartbeat,
            })
            .await
            .expect("queued");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Only the message being handled when it panicked is lost.
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["C1", "C2", "C4", "C5"]);
        assert_eq!(recorder.runs.load(Ordering::SeqCst), 2);
        assert_eq!(sibling.runs.load(Ordering::SeqCst), 1);
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
    }
}
