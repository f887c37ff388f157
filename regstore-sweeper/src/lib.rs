//! Periodic eviction of registrations past their expiration deadline.
//! State machine: `{stopped -> running -> stopped}`, starting stopped.
//! `start` is idempotent while already running; `stop` is idempotent
//! while already stopped, and bounds its wait for the in-flight tick
//! to 5 seconds before giving up and logging the sweeper as orphaned.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use regstore_base::Result;
use regstore_codec::{Millis, Observation, Registration};
use regstore_registration::RegistrationStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Receives one callback per registration the sweeper evicts. A
/// panicking listener is caught and logged; it never aborts the tick
/// or the sweeper itself.
pub trait ExpirationListener: Send + Sync {
    fn registration_expired(&self, registration: Registration, observations: Vec<Observation>);
}

#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
    pub clean_period: Duration,
    pub clean_limit: usize,
    pub grace_period_secs: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            clean_period: Duration::from_secs(60),
            clean_limit: 500,
            grace_period_secs: 0,
        }
    }
}

enum RunState {
    Stopped,
    Running { stop_tx: watch::Sender<bool>, handle: JoinHandle<()> },
}

/// Owns the background task. Dropping a `Sweeper` that is still
/// running logs a warning and detaches the task rather than blocking;
/// callers that need a deterministic shutdown should call `stop`
/// explicitly before dropping.
pub struct Sweeper {
    store: Arc<RegistrationStore>,
    listener: Arc<RwLock<Arc<dyn ExpirationListener>>>,
    config: SweeperConfig,
    state: Mutex<RunState>,
}

struct NoopListener;
impl ExpirationListener for NoopListener {
    fn registration_expired(&self, _registration: Registration, _observations: Vec<Observation>) {}
}

impl Sweeper {
    pub fn new(store: Arc<RegistrationStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            listener: Arc::new(RwLock::new(Arc::new(NoopListener))),
            config,
            state: Mutex::new(RunState::Stopped),
        }
    }

    /// Replaces the listener. Takes effect on the next tick; an
    /// in-flight tick finishes with whichever listener it started
    /// with, per spec: setting the listener after `start` is
    /// permitted but not atomic with in-flight ticks.
    pub fn set_listener(&self, listener: Arc<dyn ExpirationListener>) {
        *self.listener.write().expect("listener lock poisoned") = listener;
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock().expect("sweeper state lock poisoned"), RunState::Running { .. })
    }

    /// Idempotent: a no-op if already running.
    pub fn start(&self) {
        let mut state = self.state.lock().expect("sweeper state lock poisoned");
        if matches!(*state, RunState::Running { .. }) {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let store = self.store.clone();
        let listener = self.listener.clone();
        let config = self.config;
        let handle = tokio::spawn(run_loop(store, listener, config, stop_rx));
        *state = RunState::Running { stop_tx, handle };
        info!(target: "regstore", period_secs = config.clean_period.as_secs(), "sweeper started");
    }

    /// Idempotent: a no-op if already stopped. Waits up to 5 seconds
    /// for the in-flight tick to finish; past that it logs the
    /// sweeper as orphaned and returns anyway.
    pub async fn stop(&self) {
        let prior = {
            let mut state = self.state.lock().expect("sweeper state lock poisoned");
            std::mem::replace(&mut *state, RunState::Stopped)
        };
        let RunState::Running { stop_tx, handle } = prior else {
            return;
        };
        let _ = stop_tx.send(true);
        match tokio::time::timeout(STOP_GRACE_PERIOD, handle).await {
            Ok(Ok(())) => info!(target: "regstore", "sweeper stopped"),
            Ok(Err(err)) => error!(target: "regstore", ?err, "sweeper task panicked"),
            Err(_) => warn!(
                target: "regstore",
                "sweeper did not stop within the grace period; treating it as orphaned",
            ),
        }
    }
}

impl Drop for Sweeper {
    /// Sends the stop signal if still running so the background task
    /// does not outlive the handle indefinitely. Does not wait for it
    /// to finish — call `stop().await` first for a deterministic,
    /// bounded shutdown.
    fn drop(&mut self) {
        let state = self.state.lock().expect("sweeper state lock poisoned");
        if let RunState::Running { stop_tx, .. } = &*state {
            warn!(target: "regstore", "sweeper dropped while running; signaling stop without waiting");
            let _ = stop_tx.send(true);
        }
    }
}

async fn run_loop(
    store: Arc<RegistrationStore>,
    listener: Arc<RwLock<Arc<dyn ExpirationListener>>>,
    config: SweeperConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.clean_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current_listener = listener.read().expect("listener lock poisoned").clone();
                if let Err(err) = sweep_once(&store, current_listener.as_ref(), &config).await {
                    warn!(target: "regstore", ?err, "sweeper tick failed; continuing on next tick");
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn sweep_once(
    store: &RegistrationStore,
    listener: &dyn ExpirationListener,
    config: &SweeperConfig,
) -> Result<()> {
    let due = store.due_for_expiration(now_millis(), config.clean_limit).await?;
    let due_count = due.len();
    let mut evicted = 0usize;

    for endpoint in due {
        let registration = match store.get_registration_by_endpoint(&endpoint).await {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(err) => {
                warn!(target: "regstore", %endpoint, ?err, "sweeper could not load candidate registration");
                continue;
            }
        };
        match store.remove_registration_if_expired(&registration.id).await {
            Ok(Some(deregistration)) => {
                evicted += 1;
                notify(listener, deregistration.registration, deregistration.removed_observations);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: "regstore", %endpoint, ?err, "sweeper failed to remove expired registration");
            }
        }
    }

    if due_count > 0 {
        info!(target: "regstore", due_count, evicted, "sweeper tick complete");
    }
    Ok(())
}

fn notify(listener: &dyn ExpirationListener, registration: Registration, observations: Vec<Observation>) {
    let endpoint = registration.endpoint.clone();
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        listener.registration_expired(registration, observations)
    }));
    if let Err(panic) = outcome {
        error!(
            target: "regstore",
            endpoint = %endpoint,
            panic = %panic_message(&panic),
            "expiration listener panicked; swallowing and continuing",
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn now_millis() -> Millis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Millis
}
