//! Collaborators the checker calls into: authority, check execution, worker pool

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::process::Command;
use tracing::debug;

use crate::domain::{Service, ServiceId};

/// Decides whether this node is responsible for a service in a given role
///
/// Called on the scheduling task for every due service, so it must not block.
pub trait AuthorityOracle: Send + Sync {
    fn is_authoritative(&self, service: &dyn Service, role: &str) -> bool;
}

impl<F> AuthorityOracle for F
where
    F: Fn(&dyn Service, &str) -> bool + Send + Sync,
{
    fn is_authoritative(&self, service: &dyn Service, role: &str) -> bool {
        self(service, role)
    }
}

/// Single-node authority: this node owns everything
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAuthority;

impl AuthorityOracle for LocalAuthority {
    fn is_authoritative(&self, _service: &dyn Service, _role: &str) -> bool {
        true
    }
}

/// Performs the actual check for a service
///
/// An `Err` is an execution fault: it is logged and the service is still
/// rescheduled as if the check had completed.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn execute_check(&self, service: Arc<dyn Service>) -> Result<()>;
}

/// Unit of work handed to an [`ExecutionPool`]
pub type CheckJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fire-and-forget asynchronous execution
pub trait ExecutionPool: Send + Sync {
    fn submit(&self, job: CheckJob);
}

/// Runs every job as its own task on the ambient tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPool;

impl ExecutionPool for TokioPool {
    fn submit(&self, job: CheckJob) {
        tokio::spawn(job);
    }
}

/// Runs a shell command per service; non-zero exit is a failed check
///
/// The service's next due time is advanced after every run, successful or not.
pub struct CommandRunner {
    commands: HashMap<ServiceId, String>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            commands: HashMap::new(),
            timeout,
        }
    }

    pub fn insert(&mut self, id: ServiceId, command: impl Into<String>) {
        self.commands.insert(id, command.into());
    }

    async fn run(&self, service: &dyn Service) -> Result<()> {
        let command = self
            .commands
            .get(&service.id())
            .ok_or_else(|| eyre!("No command configured for service '{}'", service.name()))?;

        debug!(service = %service.name(), %command, "CommandRunner::run: spawning");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| eyre!("Check timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("Check exited with {}: {}", output.status, stderr.trim()));
        }

        debug!(
            service = %service.name(),
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "CommandRunner::run: check ok"
        );
        Ok(())
    }
}

#[async_trait]
impl CheckRunner for CommandRunner {
    async fn execute_check(&self, service: Arc<dyn Service>) -> Result<()> {
        let result = self.run(service.as_ref()).await;
        service.update_next_check();
        result
    }
}
