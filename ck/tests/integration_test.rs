//! Integration tests for the checker
//!
//! These drive the checker through a registry and event bus, holding
//! dispatched jobs in a recording pool so completion can be triggered by hand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use checker::{
    AuthorityOracle, CheckJob, CheckRunner, Checker, CheckerConfig, CheckerStats, DailyWindow, EventBus,
    ExecutionPool, MemoryService, Service, ServiceRegistry,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Keeps submitted jobs until the test runs them
#[derive(Default)]
struct RecordingPool {
    jobs: Mutex<Vec<CheckJob>>,
    submitted: AtomicUsize,
}

impl RecordingPool {
    fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    async fn complete_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
        for job in jobs {
            job.await;
        }
    }
}

impl ExecutionPool for RecordingPool {
    fn submit(&self, job: CheckJob) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job);
    }
}

/// Counts executions and pushes the service an hour out
#[derive(Default)]
struct CountingRunner {
    runs: AtomicUsize,
}

#[async_trait]
impl CheckRunner for CountingRunner {
    async fn execute_check(&self, service: Arc<dyn Service>) -> eyre::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        service.set_next_check(Utc::now() + TimeDelta::hours(1));
        Ok(())
    }
}

/// Authoritative for everything except the named services
struct DenyNames(Vec<&'static str>);

impl AuthorityOracle for DenyNames {
    fn is_authoritative(&self, service: &dyn Service, _role: &str) -> bool {
        !self.0.iter().any(|name| *name == service.name())
    }
}

struct Harness {
    registry: Arc<ServiceRegistry>,
    pool: Arc<RecordingPool>,
    runner: Arc<CountingRunner>,
    checker: Checker,
}

impl Harness {
    fn new(denied: Vec<&'static str>) -> Self {
        Self::with_capacity(denied, 1024)
    }

    /// Bus capacity small enough to make the listener lag
    fn with_capacity(denied: Vec<&'static str>, capacity: usize) -> Self {
        let registry = Arc::new(ServiceRegistry::new(EventBus::new(capacity)));
        let pool = Arc::new(RecordingPool::default());
        let runner = Arc::new(CountingRunner::default());
        let checker = Checker::new(
            CheckerConfig::default(),
            Arc::new(DenyNames(denied)),
            runner.clone(),
            pool.clone(),
        );
        Self {
            registry,
            pool,
            runner,
            checker,
        }
    }

    async fn start(&self) {
        self.checker.start(self.registry.clone()).await.expect("start failed");
    }

    /// Register and activate a service built from `builder`
    fn activate(&self, builder: checker::MemoryServiceBuilder) -> Arc<MemoryService> {
        let service = builder.bus(self.registry.bus()).build();
        let id = self.registry.add(service.clone());
        self.registry.activate(&id);
        service
    }

    async fn stop(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.checker.stop())
            .await
            .expect("stop timed out")
            .expect("stop failed");
    }
}

fn due_now(name: &str) -> checker::MemoryServiceBuilder {
    MemoryService::builder(name).next_check(Utc::now() - TimeDelta::seconds(1))
}

/// A window that starts two hours from now, so now is outside it
fn closed_window() -> Arc<DailyWindow> {
    let now = Utc::now();
    Arc::new(DailyWindow::new(
        (now + TimeDelta::hours(2)).time(),
        (now + TimeDelta::hours(3)).time(),
    ))
}

macro_rules! wait_for {
    ($cond:expr) => {{
        let mut met = false;
        for _ in 0..400 {
            if $cond {
                met = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(met, "condition not met in time: {}", stringify!($cond));
    }};
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_due_service_dispatched_and_returned() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(due_now("a"));

    wait_for!(h.pool.submitted() == 1);
    assert!(h.checker.is_pending(&svc.id()).await);
    assert!(!h.checker.is_idle(&svc.id()).await);

    h.pool.complete_all().await;

    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);
    assert!(h.checker.is_idle(&svc.id()).await);
    assert!(!h.checker.is_pending(&svc.id()).await);
    assert_eq!(h.checker.stats().await, CheckerStats { pending: 0, idle: 1 });

    h.stop().await;
}

#[tokio::test]
async fn test_active_services_bootstrapped_on_start() {
    let h = Harness::new(vec![]);
    let early = h.activate(due_now("early"));
    let later = h.activate(MemoryService::builder("later").next_check(Utc::now() + TimeDelta::hours(1)));

    h.start().await;

    wait_for!(h.pool.submitted() == 1);
    assert!(h.checker.is_pending(&early.id()).await);
    assert!(h.checker.is_idle(&later.id()).await);

    h.stop().await;
}

#[tokio::test]
async fn test_no_double_dispatch_while_pending() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(due_now("web"));
    wait_for!(h.pool.submitted() == 1);

    // Due-time change and re-activation while pending are both no-ops
    svc.set_next_check(Utc::now() - TimeDelta::seconds(10));
    h.checker.object_started(svc.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.pool.submitted(), 1);
    assert!(h.checker.is_pending(&svc.id()).await);
    assert_eq!(h.checker.stats().await, CheckerStats { pending: 1, idle: 0 });

    h.stop().await;
}

#[tokio::test]
async fn test_services_dispatched_in_due_order() {
    let h = Harness::new(vec![]);
    let second = h.activate(MemoryService::builder("second").next_check(Utc::now() + TimeDelta::milliseconds(150)));
    let first = h.activate(MemoryService::builder("first").next_check(Utc::now() + TimeDelta::milliseconds(50)));
    h.start().await;

    wait_for!(h.pool.submitted() == 1);
    assert!(h.checker.is_pending(&first.id()).await);
    assert!(h.checker.is_idle(&second.id()).await);

    wait_for!(h.pool.submitted() == 2);
    assert!(h.checker.is_pending(&second.id()).await);

    h.stop().await;
}

// =============================================================================
// Due-time changes
// =============================================================================

#[tokio::test]
async fn test_head_due_time_change_is_honored() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(MemoryService::builder("head").next_check(Utc::now() + TimeDelta::milliseconds(200)));
    wait_for!(h.checker.is_idle(&svc.id()).await);

    svc.set_next_check(Utc::now() + TimeDelta::hours(1));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.pool.submitted(), 0);
    assert!(h.checker.is_idle(&svc.id()).await);

    h.stop().await;
}

#[tokio::test]
async fn test_pulling_due_time_forward_wakes_loop() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(MemoryService::builder("later").next_check(Utc::now() + TimeDelta::hours(1)));
    wait_for!(h.checker.is_idle(&svc.id()).await);

    svc.set_next_check(Utc::now() - TimeDelta::seconds(1));

    wait_for!(h.pool.submitted() == 1);
    assert!(h.checker.is_pending(&svc.id()).await);

    h.stop().await;
}

// =============================================================================
// Eligibility
// =============================================================================

#[tokio::test]
async fn test_non_authoritative_is_rescheduled_not_dispatched() {
    let h = Harness::new(vec!["b"]);
    h.start().await;

    let before = Utc::now();
    let svc = h.activate(due_now("b"));

    wait_for!(svc.next_check() > before);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.pool.submitted(), 0);
    assert!(h.checker.is_idle(&svc.id()).await);
    assert!(svc.next_check() > Utc::now());

    h.stop().await;
}

#[tokio::test]
async fn test_forced_non_authoritative_not_dispatched() {
    let h = Harness::new(vec!["remote"]);
    h.start().await;

    let before = Utc::now();
    let svc = h.activate(due_now("remote").force_next_check(true));

    wait_for!(svc.next_check() > before);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.pool.submitted(), 0);
    assert!(svc.force_next_check());

    h.stop().await;
}

#[tokio::test]
async fn test_disabled_is_rescheduled() {
    let h = Harness::new(vec![]);
    h.start().await;

    let before = Utc::now();
    let svc = h.activate(due_now("disabled").enable_active_checks(false));

    wait_for!(svc.next_check() > before);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.pool.submitted(), 0);
    assert!(h.checker.is_idle(&svc.id()).await);

    h.stop().await;
}

#[tokio::test]
async fn test_outside_check_period_is_rescheduled() {
    let h = Harness::new(vec![]);
    h.start().await;

    let before = Utc::now();
    let svc = h.activate(due_now("nightly").check_period(closed_window()));

    wait_for!(svc.next_check() > before);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.pool.submitted(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_forced_bypasses_enable_and_period() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(
        due_now("forced")
            .enable_active_checks(false)
            .check_period(closed_window())
            .force_next_check(true),
    );

    wait_for!(h.pool.submitted() == 1);
    wait_for!(!svc.force_next_check());
    assert!(h.checker.is_pending(&svc.id()).await);

    h.pool.complete_all().await;

    assert!(h.checker.is_idle(&svc.id()).await);
    assert!(!svc.force_next_check());
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);

    h.stop().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_deactivate_removes_idle_service() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(MemoryService::builder("idle").next_check(Utc::now() + TimeDelta::hours(1)));
    wait_for!(h.checker.is_idle(&svc.id()).await);

    h.registry.deactivate(&svc.id());
    wait_for!(!h.checker.is_idle(&svc.id()).await);
    assert_eq!(h.checker.stats().await, CheckerStats::default());

    h.registry.activate(&svc.id());
    wait_for!(h.checker.is_idle(&svc.id()).await);
    assert!(!h.checker.is_pending(&svc.id()).await);

    h.stop().await;
}

#[tokio::test]
async fn test_deactivate_while_pending_drops_on_completion() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(due_now("busy"));
    wait_for!(h.pool.submitted() == 1);

    h.registry.deactivate(&svc.id());
    wait_for!(!h.checker.is_pending(&svc.id()).await);

    h.pool.complete_all().await;

    assert!(!h.checker.is_idle(&svc.id()).await);
    assert_eq!(h.checker.stats().await, CheckerStats::default());

    h.stop().await;
}

#[tokio::test]
async fn test_lagging_listener_resyncs_active_services() {
    let h = Harness::with_capacity(vec![], 2);
    h.start().await;

    let later = Utc::now() + TimeDelta::hours(1);
    let services: Vec<_> = (0..50)
        .map(|i| h.activate(MemoryService::builder(format!("svc-{i}")).next_check(later)))
        .collect();

    wait_for!(h.checker.stats().await.idle == 50);
    for svc in &services {
        assert!(h.checker.is_idle(&svc.id()).await);
    }
    assert_eq!(h.pool.submitted(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_activation_is_idempotent() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(MemoryService::builder("twice").next_check(Utc::now() + TimeDelta::hours(1)));
    wait_for!(h.checker.is_idle(&svc.id()).await);

    h.checker.object_started(svc.clone()).await;
    h.checker.object_started(svc.clone()).await;

    assert_eq!(h.checker.stats().await, CheckerStats { pending: 0, idle: 1 });

    h.stop().await;
}

#[tokio::test]
async fn test_membership_is_exclusive() {
    let h = Harness::new(vec![]);
    h.start().await;

    let services: Vec<_> = (0..20)
        .map(|i| {
            let offset = if i % 2 == 0 { -1 } else { 3600 };
            h.activate(MemoryService::builder(format!("svc-{}", i)).next_check(Utc::now() + TimeDelta::seconds(offset)))
        })
        .collect();

    wait_for!(h.pool.submitted() == 10);

    for svc in &services {
        let idle = h.checker.is_idle(&svc.id()).await;
        let pending = h.checker.is_pending(&svc.id()).await;
        assert!(idle ^ pending, "{} idle={} pending={}", svc.name(), idle, pending);
    }
    assert_eq!(h.checker.stats().await, CheckerStats { pending: 10, idle: 10 });

    h.pool.complete_all().await;
    assert_eq!(h.checker.stats().await, CheckerStats { pending: 0, idle: 20 });

    h.stop().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_stop_returns_with_services_indexed() {
    let h = Harness::new(vec![]);
    h.start().await;

    for i in 0..5 {
        h.activate(MemoryService::builder(format!("svc-{}", i)).next_check(Utc::now() + TimeDelta::hours(1)));
    }
    wait_for!(h.checker.stats().await.idle == 5);

    h.stop().await;
    assert!(!h.checker.is_running().await);
}

#[tokio::test]
async fn test_stop_leaves_in_flight_checks_to_complete() {
    let h = Harness::new(vec![]);
    h.start().await;

    let svc = h.activate(due_now("inflight"));
    wait_for!(h.pool.submitted() == 1);

    h.stop().await;
    h.pool.complete_all().await;

    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);
    assert!(h.checker.is_idle(&svc.id()).await);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = Harness::new(vec![]);
    h.start().await;
    h.stop().await;

    h.start().await;
    let svc = h.activate(due_now("again"));
    wait_for!(h.pool.submitted() == 1);
    assert!(h.checker.is_pending(&svc.id()).await);

    h.stop().await;
}
