//! Checker - check scheduler for monitored services
//!
//! Owns the set of services assigned to this node, decides which one must be
//! checked next, hands due checks to an asynchronous execution pool and puts
//! each service back into the schedule when its check completes.
//!
//! # Architecture
//!
//! ```text
//! ServiceRegistry --(activated / deactivated / next check changed)--> EventBus
//!                                                                      |
//!                                                                      v
//!                         +----------------- Checker -----------------------+
//!                         |  DueTimeIndex (idle)  <-->  PendingSet           |
//!                         |        ^ scheduling task          |              |
//!                         +--------|--------------------------|--------------+
//!                                  |                          v
//!                           completion  <-------------  ExecutionPool -> CheckRunner
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use checker::{Checker, CheckerConfig, EventBus, LocalAuthority, ServiceRegistry, TokioPool};
//!
//! let registry = Arc::new(ServiceRegistry::new(EventBus::default()));
//! let checker = Checker::new(CheckerConfig::default(), Arc::new(LocalAuthority), runner, Arc::new(TokioPool));
//! checker.start(registry.clone()).await?;
//! // ...
//! checker.stop().await?;
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use config::{CheckPeriodConfig, Config, ServiceConfig};
pub use domain::{DailyWindow, MemoryService, MemoryServiceBuilder, Service, ServiceId, TimePeriod};
pub use error::CheckerError;
pub use events::{EventBus, ServiceEvent};
pub use registry::{ServiceRegistry, ServiceSource};
pub use runner::{AuthorityOracle, CheckJob, CheckRunner, CommandRunner, ExecutionPool, LocalAuthority, TokioPool};
pub use scheduler::{Checker, CheckerConfig, CheckerStats};
