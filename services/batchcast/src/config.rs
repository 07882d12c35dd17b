//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Account secrets never live in the TOML; the file only points at the
//! credential store. `BATCHCAST_ACCOUNTS_PATH` overrides `[accounts] path`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use capability::ExternalCommand;
use job_scheduler::{MisfirePolicy, SchedulerConfig};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Login command run before each upload. Absent = no login step.
    #[serde(default)]
    pub login: Option<ExternalCommand>,
    /// Upload command run per account. Required by `serve` and `dispatch`.
    #[serde(default)]
    pub upload: Option<ExternalCommand>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// Admin HTTP listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct AccountsConfig {
    /// Credential store used when a job or CLI call names none
    #[serde(default = "default_accounts_path")]
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchConfig {
    /// Account tasks running at once. Absent or 0 = one task per account.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

/// Resource downloader pool
#[derive(Debug, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default = "default_fetch_command")]
    pub command: ExternalCommand,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerSection {
    /// JSON file holding the job table. Absent = jobs live in memory only.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub misfire_policy: MisfirePolicy,
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    64
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("accounts.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_retries() -> u32 {
    fetch_pool::DEFAULT_RETRY_BUDGET
}

fn default_workers() -> usize {
    fetch_pool::DEFAULT_WORKERS
}

fn default_fetch_command() -> ExternalCommand {
    ExternalCommand::new(
        "twitch-dl",
        vec![
            "download".into(),
            "{resource}".into(),
            "-o".into(),
            "{output_dir}".into(),
        ],
    )
}

fn default_misfire_grace_secs() -> u64 {
    job_scheduler::DEFAULT_MISFIRE_GRACE.as_secs()
}

fn default_history_limit() -> usize {
    job_scheduler::DEFAULT_HISTORY_LIMIT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            path: default_accounts_path(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            retries: default_retries(),
            workers: default_workers(),
            attempt_timeout_secs: None,
            command: default_fetch_command(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            state_path: None,
            misfire_policy: MisfirePolicy::default(),
            misfire_grace_secs: default_misfire_grace_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl SchedulerSection {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            misfire_policy: self.misfire_policy,
            misfire_grace: Duration::from_secs(self.misfire_grace_secs),
            state_path: self.state_path.clone(),
            history_limit: self.history_limit,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> common::Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("BATCHCAST_ACCOUNTS_PATH")
            && !path.trim().is_empty()
        {
            self.accounts.path = PathBuf::from(path);
        }
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.dispatch.task_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "task_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.fetch.retries == 0 {
            return Err(common::Error::Config(
                "fetch retries must be greater than 0".into(),
            ));
        }

        if self.fetch.workers == 0 {
            return Err(common::Error::Config(
                "fetch workers must be greater than 0".into(),
            ));
        }

        if self.fetch.attempt_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "attempt_timeout_secs must be greater than 0".into(),
            ));
        }

        let commands = [
            ("login", self.login.as_ref()),
            ("upload", self.upload.as_ref()),
            ("fetch.command", Some(&self.fetch.command)),
        ];
        for (section, command) in commands {
            let Some(command) = command else { continue };
            if command.program.trim().is_empty() {
                return Err(common::Error::Config(format!(
                    "[{section}] program must not be empty"
                )));
            }
            if command.timeout_secs == Some(0) {
                return Err(common::Error::Config(format!(
                    "[{section}] timeout_secs must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("batchcast.toml")
    }
}
