//! Rollout config file parser.
//!
//! The file is JSON unless its extension is `.toml`. Field names are the
//! PascalCase keys operators already write (`Concurrency`, `CanaryNum`,
//! `LB`, ...).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backend::{check_ip_port, Backend};
use crate::error::{ConfigError, ConfigResult};

/// Placeholder in `Args` replaced by the backend's port.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// The work a rollout has to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RolloutConfig {
    /// Number of servers that can be upgraded at a time.
    pub concurrency: usize,
    /// Canaries to run, one at a time, before the general rollout.
    #[serde(default)]
    pub canary_num: usize,
    /// Bulk-phase failures tolerated before admissions stop. More failures
    /// than this can be recorded because in-flight upgrades finish.
    #[serde(default)]
    pub max_failures: u32,
    /// Local path of the binary to push.
    pub src: PathBuf,
    /// `ip:port` of the load balancer control plane.
    #[serde(rename = "LB")]
    pub lb: String,
    /// Load balancer pool pattern.
    pub pattern: String,
    /// Targets to update, `ip:port`, in rollout order.
    pub backends: Vec<String>,

    /// Destination path on each target. Defaults to
    /// `/usr/local/bin/<file name of Src>`.
    #[serde(default)]
    pub dst: Option<String>,
    /// Arguments for the started binary.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "default_precondition_timeout")]
    pub precondition_timeout_secs: u64,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    #[serde(default = "default_canary_cooldown")]
    pub canary_cooldown_secs: u64,
    #[serde(default = "default_retry_passes")]
    pub retry_passes: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// How commands reach the targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum Transport {
    /// Through the system `ssh` client.
    Ssh(SshConfig),
    /// On this machine. Targets are local processes listening on the
    /// backend ports.
    Local,
}

impl Default for Transport {
    fn default() -> Self {
        Self::Ssh(SshConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SshConfig {
    /// Remote user. Defaults to the invoking user.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key passed to `ssh -i`.
    #[serde(default)]
    pub identity: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: default_ssh_port(),
            identity: None,
        }
    }
}

fn default_health_path() -> String {
    "/healthz".to_string()
}

fn default_precondition_timeout() -> u64 {
    30
}

fn default_action_timeout() -> u64 {
    600
}

fn default_canary_cooldown() -> u64 {
    60
}

fn default_retry_passes() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    300
}

fn default_ssh_port() -> u16 {
    22
}

impl RolloutConfig {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config = if is_toml {
            toml::from_str::<Self>(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })?
        } else {
            Self::from_json_str(&content).map_err(|e| match e {
                ConfigError::Parse { reason, .. } => ConfigError::Parse {
                    path: display,
                    reason,
                },
                other => other,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document without validating it.
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Basic validation of the config.
    pub fn validate(&self) -> ConfigResult<()> {
        check_ip_port(&self.lb).map_err(|e| ConfigError::LoadBalancer {
            addr: self.lb.clone(),
            source: Box::new(e),
        })?;

        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        self.backend_set()?;

        if self.pattern.trim().is_empty() {
            return Err(ConfigError::Pattern(self.pattern.clone()));
        }
        if self.concurrency < 1 {
            return Err(ConfigError::Concurrency(self.concurrency));
        }
        Ok(())
    }

    /// Parse every configured backend, in order.
    pub fn backend_set(&self) -> ConfigResult<Vec<Backend>> {
        self.backends
            .iter()
            .map(|addr| {
                addr.parse::<Backend>().map_err(|e| ConfigError::Backend {
                    addr: addr.clone(),
                    source: Box::new(e),
                })
            })
            .collect()
    }

    /// Where the binary is written on the target listening on `port`.
    pub fn destination(&self, port: u16) -> String {
        match &self.dst {
            Some(dst) => dst.replace(PORT_PLACEHOLDER, &port.to_string()),
            None => format!("/usr/local/bin/{}", self.binary_name()),
        }
    }

    /// The process name the running binary shows up under on a target.
    pub fn process_name(&self, port: u16) -> String {
        let dst = self.destination(port);
        Path::new(&dst)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(dst)
    }

    /// Arguments for the started binary with the backend's port filled in.
    pub fn start_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    pub fn precondition_timeout(&self) -> Duration {
        Duration::from_secs(self.precondition_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn canary_cooldown(&self) -> Duration {
        Duration::from_secs(self.canary_cooldown_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// SHA-256 of the binary being rolled out, hex encoded.
    pub fn source_digest(&self) -> std::io::Result<String> {
        let mut file = std::fs::File::open(&self.src)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn binary_name(&self) -> String {
        self.src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "service".to_string())
    }
}
