//! Checker implementation

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{Service, ServiceId};
use crate::error::CheckerError;
use crate::events::ServiceEvent;
use crate::registry::ServiceSource;
use crate::runner::{AuthorityOracle, CheckRunner, ExecutionPool};

use super::config::CheckerConfig;
use super::heartbeat;
use super::index::DueTimeIndex;
use super::pending::PendingSet;

/// Snapshot of the schedule sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckerStats {
    /// Dispatched, awaiting completion
    pub pending: usize,

    /// Waiting in the due-time index
    pub idle: usize,
}

/// State protected by the checker lock
///
/// A service is in at most one of `idle` and `pending`.
struct CheckerState {
    idle: DueTimeIndex,
    pending: PendingSet,
    stopped: bool,
}

/// Outcome of one evaluation of the index head, computed under the lock
enum Step {
    /// Shutdown requested
    Stop,

    /// Index empty, wait for a wake-up
    Idle,

    /// Head not yet due, wait for the delay or a wake-up
    Delay(Duration),

    /// Head was inactive or already pending and has been dropped
    Dropped,

    /// Head was due but not runnable and went back into the index
    Requeued,

    /// Head moved to pending and must be handed to the pool
    Dispatch { service: Arc<dyn Service>, forced: bool },
}

pub(super) struct Shared {
    pub(super) config: CheckerConfig,
    authority: Arc<dyn AuthorityOracle>,
    runner: Arc<dyn CheckRunner>,
    pool: Arc<dyn ExecutionPool>,
    state: Mutex<CheckerState>,
    wake: Notify,
}

struct Tasks {
    scheduler: JoinHandle<()>,
    listener: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// The check scheduler
///
/// Owns the set of services assigned to this node, runs each one when it
/// falls due and this node is authoritative for it, and puts it back into the
/// schedule once the check completes.
pub struct Checker {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

impl Checker {
    /// Create a new checker; nothing runs until [`Checker::start`]
    pub fn new(
        config: CheckerConfig,
        authority: Arc<dyn AuthorityOracle>,
        runner: Arc<dyn CheckRunner>,
        pool: Arc<dyn ExecutionPool>,
    ) -> Self {
        debug!(?config, "Checker::new: called");
        Self {
            shared: Arc::new(Shared {
                config,
                authority,
                runner,
                pool,
                state: Mutex::new(CheckerState {
                    idle: DueTimeIndex::new(),
                    pending: PendingSet::new(),
                    stopped: false,
                }),
                wake: Notify::new(),
            }),
            tasks: Mutex::new(None),
        }
    }

    /// Subscribe to `source`, launch the scheduling and heartbeat tasks, and
    /// schedule every service that is already active
    pub async fn start(&self, source: Arc<dyn ServiceSource>) -> Result<(), CheckerError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Err(CheckerError::AlreadyStarted);
        }

        info!(role = %self.shared.config.authority_role, "Starting checker");
        let rx = source.subscribe();
        self.shared.state.lock().await.stopped = false;

        let scheduler = tokio::spawn(Arc::clone(&self.shared).run_scheduler());
        let heartbeat = tokio::spawn(heartbeat::run(Arc::clone(&self.shared)));
        let listener = tokio::spawn(Arc::clone(&self.shared).run_listener(Arc::clone(&source), rx));

        let active = source.active_services();
        debug!(count = active.len(), "Checker::start: bootstrapping active services");
        for service in active {
            self.shared.object_started(service).await;
        }

        *tasks = Some(Tasks {
            scheduler,
            listener,
            heartbeat,
        });
        Ok(())
    }

    /// Signal shutdown and wait for the scheduling task to exit
    ///
    /// In-flight checks are not cancelled; they complete on the pool.
    pub async fn stop(&self) -> Result<(), CheckerError> {
        let tasks = self.tasks.lock().await.take().ok_or(CheckerError::NotStarted)?;

        tasks.listener.abort();
        tasks.heartbeat.abort();

        {
            let mut state = self.shared.state.lock().await;
            state.stopped = true;
            self.shared.wake.notify_one();
        }

        tasks.scheduler.await?;
        info!("Checker stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// A service became active
    pub async fn object_started(&self, service: Arc<dyn Service>) {
        self.shared.object_started(service).await;
    }

    /// A service was deactivated or destroyed
    pub async fn object_stopped(&self, service: Arc<dyn Service>) {
        self.shared.object_stopped(service).await;
    }

    /// A service's due time changed
    pub async fn next_check_changed(&self, service: Arc<dyn Service>) {
        self.shared.next_check_changed(service).await;
    }

    /// Run a check right now, outside the schedule
    ///
    /// The service is not moved to pending, so completion leaves its place in
    /// the schedule untouched.
    pub async fn execute_check(&self, service: Arc<dyn Service>) {
        self.shared.execute_check(service).await;
    }

    pub async fn stats(&self) -> CheckerStats {
        self.shared.stats().await
    }

    pub async fn is_pending(&self, id: &ServiceId) -> bool {
        self.shared.state.lock().await.pending.contains(id)
    }

    pub async fn is_idle(&self, id: &ServiceId) -> bool {
        self.shared.state.lock().await.idle.contains(id)
    }
}

impl Shared {
    async fn run_scheduler(self: Arc<Self>) {
        debug!("Check scheduler started");

        loop {
            let step = {
                let mut state = self.state.lock().await;
                self.next_step(&mut state)
            };

            match step {
                Step::Stop => break,
                Step::Idle => {
                    debug!("Check scheduler: no services, waiting");
                    self.wake.notified().await;
                }
                Step::Delay(wait) => {
                    debug!(?wait, "Check scheduler: waiting for next check");
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Step::Dropped | Step::Requeued => {}
                Step::Dispatch { service, forced } => self.dispatch(service, forced),
            }
        }

        debug!("Check scheduler exited");
    }

    fn next_step(&self, state: &mut CheckerState) -> Step {
        if state.stopped {
            return Step::Stop;
        }

        let Some(service) = state.idle.peek_earliest().cloned() else {
            return Step::Idle;
        };
        let id = service.id();

        if !service.is_active() || state.pending.contains(&id) {
            debug!(service = %service.name(), "Dropping inactive service from schedule");
            state.idle.remove(&id);
            return Step::Dropped;
        }

        let now = Utc::now();
        if let Ok(wait) = (service.next_check() - now).to_std() {
            if !wait.is_zero() {
                return Step::Delay(wait);
            }
        }

        state.idle.remove(&id);

        let forced = service.force_next_check();
        let authoritative = self
            .authority
            .is_authoritative(service.as_ref(), &self.config.authority_role);
        let mut check = true;

        if !authoritative {
            debug!(service = %service.name(), "Skipping check for service: not authoritative");
            check = false;
        }

        if !forced {
            if !service.enable_active_checks() {
                debug!(service = %service.name(), "Skipping check for service: active checks are disabled");
                check = false;
            }

            if let Some(period) = service.check_period() {
                if !period.is_inside(now) {
                    debug!(service = %service.name(), "Skipping check for service: not in check period");
                    check = false;
                }
            }
        }

        if !check {
            service.update_next_check();
            state.idle.insert(service);
            return Step::Requeued;
        }

        state.pending.insert(Arc::clone(&service));
        Step::Dispatch { service, forced }
    }

    /// Hand a pending service to the pool; called without the lock held
    fn dispatch(self: &Arc<Self>, service: Arc<dyn Service>, forced: bool) {
        if forced {
            service.set_force_next_check(false);
        }

        debug!(service = %service.name(), forced, "Executing service check");
        let shared = Arc::clone(self);
        self.pool.submit(Box::pin(async move {
            shared.execute_check(service).await;
        }));
    }

    /// Run the check, then return the service to the index if it was dispatched
    async fn execute_check(&self, service: Arc<dyn Service>) {
        let result = AssertUnwindSafe(self.runner.execute_check(Arc::clone(&service)))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(service = %service.name(), id = %service.id(), error = ?e, "Check failed for service");
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(service = %service.name(), id = %service.id(), %detail, "Check panicked for service");
            }
        }

        {
            let mut state = self.state.lock().await;
            // Absent from pending means a manual check or a deactivation; either
            // way the service is already where it belongs.
            if state.pending.remove(&service.id()) {
                state.idle.insert(Arc::clone(&service));
                self.wake.notify_one();
            }
        }

        debug!(service = %service.name(), "Check finished for service");
    }

    async fn object_started(&self, service: Arc<dyn Service>) {
        let mut state = self.state.lock().await;

        if state.pending.contains(&service.id()) {
            debug!(service = %service.name(), "Checker::object_started: already pending");
            return;
        }

        debug!(service = %service.name(), "Checker::object_started: scheduling");
        state.idle.insert(service);
        self.wake.notify_one();
    }

    async fn object_stopped(&self, service: Arc<dyn Service>) {
        let mut state = self.state.lock().await;
        let id = service.id();

        debug!(service = %service.name(), "Checker::object_stopped: unscheduling");
        state.idle.remove(&id);
        state.pending.remove(&id);
        self.wake.notify_one();
    }

    async fn next_check_changed(&self, service: Arc<dyn Service>) {
        let mut state = self.state.lock().await;

        if state.idle.reinsert(&service.id()) {
            debug!(service = %service.name(), next_check = %service.next_check(), "Checker::next_check_changed: re-keyed");
            self.wake.notify_one();
        }
    }

    async fn handle_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::Activated(service) => self.object_started(service).await,
            ServiceEvent::Deactivated(service) => self.object_stopped(service).await,
            ServiceEvent::NextCheckChanged(service) => self.next_check_changed(service).await,
        }
    }

    async fn run_listener(self: Arc<Self>, source: Arc<dyn ServiceSource>, mut rx: broadcast::Receiver<ServiceEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Service event listener lagged, resynchronizing");
                    for service in source.active_services() {
                        self.object_started(service).await;
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("Service event source closed");
                    break;
                }
            }
        }
    }

    pub(super) async fn stats(&self) -> CheckerStats {
        let state = self.state.lock().await;
        CheckerStats {
            pending: state.pending.len(),
            idle: state.idle.len(),
        }
    }
}
