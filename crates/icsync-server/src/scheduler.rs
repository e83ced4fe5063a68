//! Background scheduler for sync passes.
//!
//! Two flows are scheduled independently, one per [`SyncFilter`]. Each flow
//! runs at most one pass at a time:
//! - A request for a flow with a pass in flight is absorbed
//! - A pass ending in [`PassOutcome::Retry`] is re-run with exponential
//!   backoff
//! - An optional periodic interval (with jitter) requests both flows
//! - `cancel_all` aborts in-flight passes and drops pending retries

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use icsync_core::{PassOutcome, SyncFilter};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::orchestrator::PassRequest;

/// Both flows, in the order periodic passes start them.
pub const FLOWS: [SyncFilter; 2] = [SyncFilter::NetworkOnly, SyncFilter::LocalOnly];

/// How long the loop waits when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(86_400);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic passes. `None` disables them.
    pub periodic_interval: Option<Duration>,
    /// Maximum jitter to add to the interval (as fraction 0.0-1.0).
    pub jitter_fraction: f64,
    /// Initial backoff duration after a pass asked to be retried.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Consecutive retry outcomes after which a flow stops retrying.
    pub max_consecutive_failures: u32,
    /// Start both flows as soon as the scheduler runs.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            periodic_interval: None,
            jitter_fraction: 0.1,                    // 10% jitter
            initial_backoff: Duration::from_secs(30), // 30 seconds
            max_backoff: Duration::from_secs(3600),  // 1 hour
            backoff_multiplier: 2.0,
            max_consecutive_failures: 10,
            run_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Creates a new scheduler config with the given periodic interval.
    pub fn new(periodic_interval: Option<Duration>) -> Self {
        Self {
            periodic_interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Builder: set the retry limit.
    #[must_use]
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Builder: set whether both flows run at startup.
    #[must_use]
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Calculates the delay until the next periodic pass, with jitter.
    pub fn jittered(&self, interval: Duration) -> Duration {
        let base = interval.as_secs_f64();
        let jitter = rand_jitter(base * self.jitter_fraction);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Calculates backoff delay based on consecutive failures.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let multiplier = self
            .backoff_multiplier
            .powi(consecutive_failures as i32 - 1);
        let delay = base * multiplier;
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

/// Simple pseudo-random jitter generator.
/// Uses the current time to generate a value in [-range, range].
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    // Map nanos to [-range, range]
    let fraction = (nanos as f64) / (1_000_000_000.0);
    (fraction * 2.0 - 1.0) * range
}

/// Commands that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Start a pass, unless one is running for the same flow.
    RunPass(PassRequest),
    /// Abort running passes and drop pending retries.
    CancelAll,
    /// Change the periodic interval; `None` disables periodic passes.
    SetPeriodicInterval(Option<Duration>),
    /// Stop the scheduler.
    Stop,
}

/// State of one flow.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    /// Whether a pass is in flight.
    pub running: bool,
    /// Incremented for every started pass.
    pub generation: u64,
    /// Number of consecutive passes that asked to be retried.
    pub consecutive_failures: u32,
    /// Outcome of the last finished pass.
    pub last_outcome: Option<PassOutcome>,
    /// When the last pass finished.
    pub last_pass: Option<DateTime<Utc>>,
}

impl FlowState {
    /// Records a finished pass.
    pub fn record(&mut self, outcome: PassOutcome) {
        self.running = false;
        self.last_outcome = Some(outcome);
        self.last_pass = Some(Utc::now());
        match outcome {
            PassOutcome::Retry => self.consecutive_failures += 1,
            PassOutcome::Success | PassOutcome::Failure => self.consecutive_failures = 0,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub network: FlowState,
    pub local: FlowState,
    /// Current periodic interval.
    pub periodic_interval: Option<Duration>,
}

impl SchedulerState {
    /// Returns the state of one flow.
    pub fn flow(&self, filter: SyncFilter) -> &FlowState {
        match filter {
            SyncFilter::NetworkOnly => &self.network,
            SyncFilter::LocalOnly => &self.local,
        }
    }

    fn flow_mut(&mut self, filter: SyncFilter) -> &mut FlowState {
        match filter {
            SyncFilter::NetworkOnly => &mut self.network,
            SyncFilter::LocalOnly => &mut self.local,
        }
    }

    /// Returns true if no pass is in flight.
    pub fn is_idle(&self) -> bool {
        !self.network.running && !self.local.running
    }
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// Creates a new shared scheduler state.
pub fn new_scheduler_state() -> SharedSchedulerState {
    Arc::new(RwLock::new(SchedulerState::default()))
}

/// A finished pass: the request, its generation and its outcome.
type PassDone = (PassRequest, u64, PassOutcome);

/// Bookkeeping of the scheduler loop.
struct Runner<F> {
    pass_fn: Arc<F>,
    done_tx: mpsc::Sender<PassDone>,
    running: HashMap<SyncFilter, JoinHandle<()>>,
    retries: HashMap<SyncFilter, (Instant, PassRequest)>,
}

/// Schedules sync passes for the network and local flows.
pub struct SyncScheduler {
    config: SchedulerConfig,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
}

impl SyncScheduler {
    /// Creates a new scheduler with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let state = SchedulerState {
            periodic_interval: config.periodic_interval,
            ..Default::default()
        };
        Self {
            config,
            state: Arc::new(RwLock::new(state)),
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Returns the shared state.
    pub fn state(&self) -> SharedSchedulerState {
        self.state.clone()
    }

    /// Runs the scheduler loop until stopped.
    ///
    /// `pass_fn` runs one pass; every call is spawned as its own task so the
    /// two flows can overlap.
    pub async fn run<F, Fut>(mut self, pass_fn: F)
    where
        F: Fn(PassRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PassOutcome> + Send + 'static,
    {
        let Some(mut command_rx) = self.command_rx.take() else {
            error!("Scheduler is already running");
            return;
        };
        let (done_tx, mut done_rx) = mpsc::channel(16);
        let mut runner = Runner {
            pass_fn: Arc::new(pass_fn),
            done_tx,
            running: HashMap::new(),
            retries: HashMap::new(),
        };
        let mut next_periodic = self.next_periodic(self.config.periodic_interval);

        info!(
            interval_secs = self.config.periodic_interval.map(|i| i.as_secs()),
            "Scheduler started"
        );

        if self.config.run_on_start {
            for filter in FLOWS {
                self.start_pass(PassRequest::new(filter), &mut runner).await;
            }
        }

        loop {
            let deadline = runner
                .retries
                .values()
                .map(|(at, _)| *at)
                .chain(next_periodic)
                .min();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    let now = Instant::now();
                    let due: Vec<SyncFilter> = runner
                        .retries
                        .iter()
                        .filter(|(_, (at, _))| *at <= now)
                        .map(|(filter, _)| *filter)
                        .collect();
                    for filter in due {
                        if let Some((_, request)) = runner.retries.remove(&filter) {
                            debug!(flow = %filter, "Retrying pass");
                            self.start_pass(request, &mut runner).await;
                        }
                    }

                    if next_periodic.is_some_and(|at| at <= now) {
                        let interval = self.state.read().await.periodic_interval;
                        next_periodic = self.next_periodic(interval);
                        for filter in FLOWS {
                            self.start_pass(PassRequest::new(filter), &mut runner).await;
                        }
                    }
                }
                Some(done) = done_rx.recv() => {
                    self.finish_pass(done, &mut runner).await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::RunPass(request)) => {
                            debug!(flow = %request.filter, "Received RunPass command");
                            self.start_pass(request, &mut runner).await;
                        }
                        Some(SchedulerCommand::CancelAll) => {
                            self.cancel_all(&mut runner).await;
                        }
                        Some(SchedulerCommand::SetPeriodicInterval(interval)) => {
                            info!(
                                interval_secs = interval.map(|i| i.as_secs()),
                                "Periodic interval changed"
                            );
                            self.state.write().await.periodic_interval = interval;
                            next_periodic = self.next_periodic(interval);
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            info!("Scheduler stopping");
                            self.cancel_all(&mut runner).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    fn next_periodic(&self, interval: Option<Duration>) -> Option<Instant> {
        let delay = self.config.jittered(interval?);
        debug!(delay_secs = delay.as_secs(), "Scheduling next periodic pass");
        Some(Instant::now() + delay)
    }

    async fn start_pass<F, Fut>(&self, request: PassRequest, runner: &mut Runner<F>)
    where
        F: Fn(PassRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PassOutcome> + Send + 'static,
    {
        let generation = {
            let mut state = self.state.write().await;
            let flow = state.flow_mut(request.filter);
            if flow.running {
                debug!(flow = %request.filter, "Pass already running, request absorbed");
                return;
            }
            flow.running = true;
            flow.generation += 1;
            flow.generation
        };
        runner.retries.remove(&request.filter);

        info!(
            flow = %request.filter,
            force_resync = request.force_resync,
            only_migrate = request.only_migrate,
            "Starting sync pass"
        );
        let pass_fn = runner.pass_fn.clone();
        let done_tx = runner.done_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = (*pass_fn)(request).await;
            if done_tx.send((request, generation, outcome)).await.is_err() {
                debug!("Scheduler gone, dropping pass outcome");
            }
        });
        runner.running.insert(request.filter, handle);
    }

    async fn finish_pass<F>(&self, done: PassDone, runner: &mut Runner<F>) {
        let (request, generation, outcome) = done;
        let mut state = self.state.write().await;
        let flow = state.flow_mut(request.filter);
        if !flow.running || flow.generation != generation {
            debug!(flow = %request.filter, generation, "Ignoring outcome of cancelled pass");
            return;
        }

        runner.running.remove(&request.filter);
        flow.record(outcome);
        info!(flow = %request.filter, outcome = %outcome, "Sync pass completed");

        if outcome != PassOutcome::Retry {
            return;
        }
        if flow.consecutive_failures >= self.config.max_consecutive_failures {
            error!(
                flow = %request.filter,
                failures = flow.consecutive_failures,
                max = self.config.max_consecutive_failures,
                "Max consecutive failures reached, not retrying"
            );
            return;
        }

        let delay = self.config.backoff_delay(flow.consecutive_failures);
        warn!(
            flow = %request.filter,
            failures = flow.consecutive_failures,
            backoff_secs = delay.as_secs(),
            "Pass will be retried"
        );
        runner
            .retries
            .insert(request.filter, (Instant::now() + delay, request));
    }

    async fn cancel_all<F>(&self, runner: &mut Runner<F>) {
        let cancelled = runner.running.len();
        for (_, handle) in runner.running.drain() {
            handle.abort();
        }
        runner.retries.clear();

        let mut state = self.state.write().await;
        for filter in FLOWS {
            state.flow_mut(filter).running = false;
        }
        info!(cancelled, "Cancelled all passes");
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Requests a pass.
    pub async fn run_pass(
        &self,
        request: PassRequest,
    ) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx
            .send(SchedulerCommand::RunPass(request))
            .await
    }

    /// Requests a regular pass of one flow.
    pub async fn request_pass(
        &self,
        filter: SyncFilter,
    ) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.run_pass(PassRequest::new(filter)).await
    }

    /// Aborts running passes and drops pending retries.
    pub async fn cancel_all(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::CancelAll).await
    }

    /// Changes the periodic interval.
    pub async fn set_periodic_interval(
        &self,
        interval: Option<Duration>,
    ) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx
            .send(SchedulerCommand::SetPeriodicInterval(interval))
            .await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Returns the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}
