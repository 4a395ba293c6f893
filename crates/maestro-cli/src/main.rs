//! The `maestro` binary: loads configuration, wires the composition
//! root (registry, security, engine, background loops), and runs until
//! interrupted.

use clap::{Parser, Subcommand};
use maestro_core::{EventBus, MaestroError, MaestroResult};
use maestro_engine::{EngineConfig, FileRegistry, NoopWorkflowEngine, OrchestrationEngine};
use maestro_resources::{ResourceLimits, ResourceSampler, ResourceSpec};
use maestro_security::{AuditLog, RbacPolicy, Role};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro — agent orchestration platform")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestration engine and run until interrupted
    Run,
    /// Parse the config file and print the effective settings
    Validate,
}

#[derive(Deserialize)]
struct MaestroConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    resources: Option<ResourceSpec>,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    state: StateConfig,
    #[serde(default)]
    lifecycle: LifecycleConfig,
    #[serde(default)]
    security: SecurityConfig,
}

#[derive(Deserialize)]
struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    max_concurrent: usize,
    #[serde(default = "default_tick_ms")]
    tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Deserialize)]
struct StateConfig {
    #[serde(default = "default_retention")]
    history_retention: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_retention: default_retention(),
        }
    }
}

#[derive(Deserialize)]
struct LifecycleConfig {
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            resources: None,
            scheduler: SchedulerConfig::default(),
            state: StateConfig::default(),
            lifecycle: LifecycleConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Deserialize, Default)]
struct SecurityConfig {
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(default)]
    assignments: HashMap<String, Vec<String>>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_concurrent() -> usize {
    maestro_scheduler::DEFAULT_MAX_CONCURRENT
}

fn default_tick_ms() -> u64 {
    500
}

fn default_retention() -> usize {
    maestro_state::DEFAULT_RETENTION
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

impl MaestroConfig {
    fn load(path: &Path) -> MaestroResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| MaestroError::Config(format!("{}: {e}", path.display())))
    }

    fn limits(&self) -> ResourceLimits {
        self.resources.map_or_else(ResourceLimits::default, ResourceLimits)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            limits: self.limits(),
            max_concurrent: self.scheduler.max_concurrent,
            history_retention: self.state.history_retention,
            lifecycle_max_retries: self.lifecycle.max_retries,
            lifecycle_timeout: Duration::from_secs(self.lifecycle.timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> MaestroResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = MaestroConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Validate => validate(&config),
    }
}

async fn run(config: MaestroConfig) -> MaestroResult<()> {
    let registry = Arc::new(FileRegistry::new(config.data_dir.join("agents")).await?);
    let policy = RbacPolicy::from_config(
        config.security.roles.clone(),
        config.security.assignments.clone(),
    );
    let audit = Arc::new(AuditLog::new(config.data_dir.join("audit")));
    let bus = EventBus::new();

    // No external workflow engine is wired by default; lifecycle starts
    // succeed without dispatching real work.
    let engine = OrchestrationEngine::new(
        config.engine_config(),
        registry,
        Arc::new(policy),
        audit,
        Arc::new(NoopWorkflowEngine),
        bus.clone(),
    );

    let monitor = engine.start_monitor();
    let scheduler_loop = engine
        .scheduler()
        .run(Duration::from_millis(config.scheduler.tick_ms));
    let sampler = ResourceSampler::new(engine.pool().clone(), bus.clone()).start();
    let event_log = spawn_event_logger(&bus);

    info!(
        data_dir = %config.data_dir.display(),
        max_concurrent = config.scheduler.max_concurrent,
        "maestro running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    scheduler_loop.abort();
    sampler.abort();
    monitor.abort();
    event_log.abort();
    Ok(())
}

fn validate(config: &MaestroConfig) -> MaestroResult<()> {
    let limits = config.limits();
    println!("data_dir           = {}", config.data_dir.display());
    println!("resource limits    = {:?}", limits.0);
    println!("max_concurrent     = {}", config.scheduler.max_concurrent);
    println!("tick_ms            = {}", config.scheduler.tick_ms);
    println!("history_retention  = {}", config.state.history_retention);
    println!("lifecycle retries  = {}", config.lifecycle.max_retries);
    println!("lifecycle timeout  = {}s", config.lifecycle.timeout_secs);
    println!("roles              = {}", config.security.roles.len());
    println!("assignments        = {}", config.security.assignments.len());
    Ok(())
}

/// Mirrors every bus event into the structured log, the single-host
/// stand-in for dashboard fan-out.
fn spawn_event_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    info!(kind = %event.kind, payload = %event.payload, "event");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
