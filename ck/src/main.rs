use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use checker::cli::{Cli, Command};
use checker::config::Config;
use checker::{Checker, CommandRunner, EventBus, LocalAuthority, Service, ServiceRegistry, TokioPool};

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > INFO
    let level = cli_log_level
        .or(config_log_level)
        .map(parse_level)
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("{}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    let bus = EventBus::new(config.checker.event_capacity);
    let registry = Arc::new(ServiceRegistry::new(bus.clone()));
    let mut runner = CommandRunner::new(config.check_timeout());

    for service_config in &config.services {
        let service = service_config.build(&bus)?;
        runner.insert(service.id(), &service_config.command);
        let id = registry.add(service);
        registry.activate(&id);
    }

    let checker = Checker::new(
        config.checker.clone(),
        Arc::new(LocalAuthority),
        Arc::new(runner),
        Arc::new(TokioPool),
    );
    checker.start(registry.clone()).await?;
    info!(services = registry.len(), "Checker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    checker.stop().await?;
    Ok(())
}

fn cmd_validate(config: &Config) -> Result<()> {
    config.validate()?;
    println!(
        "{} Configuration OK ({} services)",
        "✓".green(),
        config.services.len().to_string().cyan()
    );
    Ok(())
}

fn cmd_list(config: &Config) {
    if config.services.is_empty() {
        println!("No services configured");
        return;
    }

    for service in &config.services {
        let state = if service.enable_active_checks {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        let period = service
            .check_period
            .as_ref()
            .map(|p| format!(" [{}-{}]", p.start, p.end))
            .unwrap_or_default();
        println!(
            "{} every {}s {}{} {}",
            service.name.cyan(),
            service.interval_secs,
            state,
            period.dimmed(),
            service.command.dimmed()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run => {
            config.validate()?;
            cmd_run(&config).await
        }
        Command::Validate => cmd_validate(&config),
        Command::List => {
            cmd_list(&config);
            Ok(())
        }
    }
}
