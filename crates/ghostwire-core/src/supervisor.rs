use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Coarse lifecycle states the supervisor moves a client carrier through.
/// The finer-grained `Authenticating`/`Up` split happens inside the
/// caller-supplied session future; the supervisor only needs to know
/// whether an attempt reached `Up` (to decide whether to reset backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Down,
    Stopping,
}

/// Exponential backoff parameters for carrier reconnection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Cancellation handle handed to each `connect_and_run` attempt so an
/// in-flight session can stop as soon as `Supervisor::shutdown` is called,
/// instead of only being noticed between reconnect attempts. Cheap to
/// clone: both fields are `Arc`s shared with the owning `Supervisor`.
#[derive(Clone)]
pub struct ShutdownSignal {
    notify: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested. Returns immediately if it
    /// already had been by the time this was called.
    pub async fn cancelled(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Capped exponential backoff, grounded directly on the reconnect-manager
/// pattern used for transport reconnection in the example pack: `wait()`
/// sleeps for the current delay then grows it, `reset()` returns to the
/// initial delay. Defaults here (1s / 30s / 2.0) follow the tunnel
/// specification rather than the teacher's own defaults.
struct Backoff {
    config: ReconnectConfig,
    current: Duration,
}

impl Backoff {
    fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    async fn wait(&mut self) {
        tokio::time::sleep(self.current).await;
        let next_secs = self.current.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(next_secs).min(self.config.max_delay);
    }

    fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }

    fn current_delay(&self) -> Duration {
        self.current
    }
}

/// Drives the client carrier lifecycle: repeatedly connect, authenticate
/// and run a session until it ends, backing off between attempts, until a
/// graceful shutdown is requested. The supervisor itself is transport- and
/// session-agnostic: callers hand it an async closure that performs one
/// full connect-authenticate-dispatch cycle and reports whether it reached
/// `Up` before ending, which the supervisor uses to decide whether to reset
/// backoff.
pub struct Supervisor {
    config: ReconnectConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests a graceful stop. Any in-flight session is left to notice
    /// cancellation on its own (e.g. via a shared token); `run` exits once
    /// the current attempt (if any) and any pending backoff complete.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Returns a cancellation handle tied to this supervisor's shutdown
    /// state, for handing to an in-flight `connect_and_run` attempt.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            notify: self.shutdown.clone(),
            stopping: self.stopping.clone(),
        }
    }

    /// Runs the reconnect loop. `on_state` is invoked on every coarse state
    /// transition; `connect_and_run` is handed a [`ShutdownSignal`] so the
    /// session it drives can exit as soon as shutdown is requested, and
    /// resolves with `Ok(reached_up)` when the carrier ends normally
    /// (backoff resets iff `reached_up`) or `Err(e)` when the attempt failed
    /// outright (backoff always grows).
    pub async fn run<F, Fut, E>(&self, mut on_state: impl FnMut(SupervisorState), mut connect_and_run: F)
    where
        F: FnMut(ShutdownSignal) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = Backoff::new(self.config);

        loop {
            if self.is_stopping() {
                on_state(SupervisorState::Stopping);
                return;
            }

            on_state(SupervisorState::Connecting);
            match connect_and_run(self.shutdown_signal()).await {
                Ok(reached_up) => {
                    on_state(SupervisorState::Down);
                    if reached_up {
                        backoff.reset();
                    }
                }
                Err(e) => {
                    warn!("carrier session failed: {e}");
                    on_state(SupervisorState::Down);
                }
            }

            if self.is_stopping() {
                on_state(SupervisorState::Stopping);
                return;
            }

            info!("reconnecting in {:?}", backoff.current_delay());
            tokio::select! {
                _ = backoff.wait() => {}
                _ = self.shutdown.notified() => {
                    on_state(SupervisorState::Stopping);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_backoff_progression_matches_defaults() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(backoff.current_delay());
            backoff.wait().await;
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        backoff.current = Duration::from_secs(16);
        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_resets_backoff_after_reaching_up() {
        let supervisor = Supervisor::new(ReconnectConfig::default());
        let attempt = std::sync::atomic::AtomicUsize::new(0);
        let mut states = Vec::new();

        // Two attempts: fail, then succeed (reaching Up) and request stop.
        let stopping_flag = supervisor.stopping.clone();
        let notify = supervisor.shutdown.clone();
        supervisor
            .run(
                |state| states.push(state),
                |_shutdown| {
                    let n = attempt.fetch_add(1, Ordering::SeqCst);
                    let stopping_flag = stopping_flag.clone();
                    let notify = notify.clone();
                    async move {
                        match n {
                            0 => Err("dial refused"),
                            1 => {
                                stopping_flag.store(true, Ordering::SeqCst);
                                notify.notify_waiters();
                                Ok(true)
                            }
                            _ => unreachable!("should have stopped"),
                        }
                    }
                },
            )
            .await;

        assert!(states.contains(&SupervisorState::Connecting));
        assert!(states.contains(&SupervisorState::Down));
    }

    #[tokio::test]
    async fn test_shutdown_signal_cancels_in_flight_attempt() {
        let supervisor = Supervisor::new(ReconnectConfig::default());
        let signal = supervisor.shutdown_signal();

        let cancelled = tokio::spawn(async move {
            signal.cancelled().await;
        });

        // Give the spawned task a chance to start waiting before shutdown.
        tokio::task::yield_now().await;
        supervisor.shutdown();

        tokio::time::timeout(Duration::from_secs(1), cancelled)
            .await
            .expect("cancelled() should resolve promptly after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signal_already_cancelled_resolves_immediately() {
        let supervisor = Supervisor::new(ReconnectConfig::default());
        supervisor.shutdown();
        let signal = supervisor.shutdown_signal();

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancelled() must not block once shutdown already happened");
    }
}
