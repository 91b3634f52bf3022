//! Configuration for the orchestrator: work directory, lock file, per-service
//! safety-gate minimums, the image channel filter, and the static list of
//! `hostd` endpoints to dial. Loaded file-then-env, mirroring the teacher's
//! `ClusterConfig::load`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub paths: PathsConfig,
    pub hosts: HostPoolConfig,
    pub safety: SafetyConfig,
    pub images: ImageFilterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// `/var/sdcadm/updates` — parent of every per-run work directory.
    pub work_dir_root: String,
    /// `/var/run/<tool>.lock` — the process-wide advisory lock (§4.6).
    pub lock_file: String,
    /// `/var/sdcadm/dc-maint.json`.
    pub dc_maint_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostPoolConfig {
    #[serde(default)]
    pub static_hosts: Vec<HostConfig>,
    pub health_check_interval_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub server_id: String,
    pub address: String,
    pub tls_cert: String,
    pub tls_key: String,
    pub tls_ca: String,
    #[serde(default = "default_tls_domain")]
    pub tls_domain: String,
}

fn default_tls_domain() -> String {
    "localhost".to_string()
}

/// Per-service minimum platform/image-build-date safety gates (§4.3).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SafetyConfig {
    pub minimum_platform: String,
    #[serde(default)]
    pub minimum_image_build_date_by_service: HashMap<String, String>,
}

/// The configurable channel/version constraint the Image Resolver applies
/// (§4.2): "version matches `master`" made into a single predicate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageFilterConfig {
    pub channel_tag: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                work_dir_root: "/var/sdcadm/updates".to_string(),
                lock_file: "/var/run/sdcadm-orchestrator.lock".to_string(),
                dc_maint_file: "/var/sdcadm/dc-maint.json".to_string(),
            },
            hosts: HostPoolConfig {
                static_hosts: vec![],
                health_check_interval_secs: 30,
                reconnect_backoff_secs: 5,
                max_reconnect_attempts: 3,
            },
            safety: SafetyConfig::default(),
            images: ImageFilterConfig { channel_tag: "master".to_string() },
            logging: LoggingConfig { level: "info,orchestrator=debug".to_string(), format: LogFormat::Pretty, output: LogOutput::Stdout },
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file(s) and environment variables.
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&OrchestratorConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        let config_paths = vec!["/etc/sdcadm/orchestrator", "config/orchestrator", "crates/orchestrator/config/orchestrator"];
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__").try_parsing(true));

        builder.build().context("failed to build configuration")?.try_deserialize().context("failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths.work_dir_root.is_empty() {
            anyhow::bail!("paths.work_dir_root must not be empty");
        }
        if self.paths.lock_file.is_empty() {
            anyhow::bail!("paths.lock_file must not be empty");
        }
        for host in &self.hosts.static_hosts {
            for (label, path) in [("cert", &host.tls_cert), ("key", &host.tls_key), ("ca", &host.tls_ca)] {
                if !std::path::Path::new(path).exists() {
                    anyhow::bail!("host '{}' TLS {} file not found: {}", host.server_id, label, path);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.images.channel_tag, "master");
        assert!(!config.paths.lock_file.is_empty());
    }
}
