//! Engine configuration via `kestrel.toml`
//!
//! Serializable settings live here. Collaborators that cannot be written to
//! a file (store, clock, job handlers, listeners, parser) are supplied on the
//! [`EngineBuilder`](crate::EngineBuilder) instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kestrel_core::{EngineError, Result};
use kestrel_executor::RetryConfig;
use serde::{Deserialize, Serialize};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "kestrel.toml";

/// What to do with the store schema when an engine is built and closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStrategy {
    /// Require an existing schema at the current version
    Validate,
    /// Create the schema if missing
    Update,
    /// Create on build, drop on close
    CreateDrop,
    /// Drop then create on build
    DropCreate,
}

impl SchemaStrategy {
    /// Parse the `schema_update` setting
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "false" => Ok(SchemaStrategy::Validate),
            "true" => Ok(SchemaStrategy::Update),
            "create-drop" => Ok(SchemaStrategy::CreateDrop),
            "drop-create" => Ok(SchemaStrategy::DropCreate),
            other => Err(EngineError::validation(format!(
                "Invalid schema_update '{}'. Expected \"false\", \"true\", \"create-drop\" or \"drop-create\".",
                other
            ))),
        }
    }
}

/// Async executor settings (`[async_executor]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncExecutorConfig {
    /// Start the executor when the engine is built
    pub activate: bool,
    /// Pause between acquisition cycles
    pub acquire_interval_ms: u64,
    /// Upper bound of jobs locked per cycle
    pub max_jobs_per_acquisition: usize,
    /// How long an acquired lock stays valid
    pub lock_time_ms: u64,
    /// Worker threads executing jobs
    pub worker_threads: usize,
    /// Acquired jobs that may wait for a free worker
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace_ms: u64,
    /// Retries given to jobs that do not set their own
    pub default_retries: u32,
    /// First retry delay of a failed job
    pub retry_base_delay_ms: u64,
    /// Largest retry delay of a failed job
    pub retry_max_delay_ms: u64,
}

impl Default for AsyncExecutorConfig {
    fn default() -> Self {
        Self {
            activate: false,
            acquire_interval_ms: 10_000,
            max_jobs_per_acquisition: 1,
            lock_time_ms: 300_000,
            worker_threads: 8,
            queue_capacity: 100,
            shutdown_grace_ms: 60_000,
            default_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 600_000,
        }
    }
}

impl AsyncExecutorConfig {
    /// Acquisition interval as a `Duration`
    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }

    /// Lock time as a `chrono::Duration`
    pub fn lock_time(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lock_time_ms).unwrap_or(i64::MAX))
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Backoff curve for failed jobs
    pub fn job_backoff(&self) -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(self.retry_base_delay_ms)
            .with_max_delay_ms(self.retry_max_delay_ms)
    }
}

/// Engine configuration loaded from `kestrel.toml`.
///
/// # Example
///
/// ```toml
/// name = "orders"
/// schema_update = "true"
///
/// [async_executor]
/// activate = true
/// acquire_interval_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Process-wide registry name
    #[serde(default = "default_name")]
    pub name: String,
    /// `"false"`, `"true"`, `"create-drop"` or `"drop-create"`
    #[serde(default = "default_schema_update")]
    pub schema_update: String,
    /// Async executor settings
    #[serde(default)]
    pub async_executor: AsyncExecutorConfig,
    /// Optimistic-lock retry for schema and job commands
    #[serde(default)]
    pub command_retry: RetryConfig,
    /// Directory classpath-style resource names resolve under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_resource_root: Option<PathBuf>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_schema_update() -> String {
    "true".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            schema_update: default_schema_update(),
            async_executor: AsyncExecutorConfig::default(),
            command_retry: RetryConfig::default(),
            deployment_resource_root: None,
        }
    }
}

impl EngineConfig {
    /// Parse `schema_update` into a [`SchemaStrategy`]
    pub fn schema_strategy(&self) -> Result<SchemaStrategy> {
        SchemaStrategy::parse(&self.schema_update)
    }

    /// Set the engine name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the schema strategy string
    pub fn with_schema_update(mut self, schema_update: impl Into<String>) -> Self {
        self.schema_update = schema_update.into();
        self
    }

    /// Replace the async executor settings
    pub fn with_async_executor(mut self, async_executor: AsyncExecutorConfig) -> Self {
        self.async_executor = async_executor;
        self
    }

    /// Start the async executor on build
    pub fn with_async_executor_activate(mut self, activate: bool) -> Self {
        self.async_executor.activate = activate;
        self
    }

    /// Replace the command retry policy
    pub fn with_command_retry(mut self, retry: RetryConfig) -> Self {
        self.command_retry = retry;
        self
    }

    /// Set the classpath resource root
    pub fn with_deployment_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.deployment_resource_root = Some(root.into());
        self
    }

    /// Parse TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| EngineError::validation(format!("Failed to parse engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            EngineError::Validation { message } => EngineError::validation(format!(
                "{} (in '{}')",
                message,
                path.display()
            )),
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("Engine name must not be empty"));
        }
        self.schema_strategy()?;
        let executor = &self.async_executor;
        if executor.worker_threads == 0 {
            return Err(EngineError::validation(
                "async_executor.worker_threads must be at least 1",
            ));
        }
        if executor.max_jobs_per_acquisition == 0 {
            return Err(EngineError::validation(
                "async_executor.max_jobs_per_acquisition must be at least 1",
            ));
        }
        if executor.lock_time_ms == 0 {
            return Err(EngineError::validation(
                "async_executor.lock_time_ms must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Kestrel engine configuration
#
# Name under which the engine registers process-wide (default: "default")
name = "default"

# Schema handling on build/close:
#   "false"       = require an existing schema
#   "true"        = create the schema if missing (default)
#   "create-drop" = create on build, drop on close
#   "drop-create" = drop and recreate on build
schema_update = "true"

# Directory classpath-style deployment resources are read from.
# deployment_resource_root = "/opt/kestrel/processes"

[async_executor]
activate = false
acquire_interval_ms = 10000
max_jobs_per_acquisition = 1
lock_time_ms = 300000
worker_threads = 8
queue_capacity = 100
shutdown_grace_ms = 60000
default_retries = 3
retry_base_delay_ms = 1000
retry_max_delay_ms = 600000

# Optimistic-lock retry for schema and job commands
[command_retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
"#
    }
}
