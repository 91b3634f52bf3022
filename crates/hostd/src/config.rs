//! Configuration for the hostd daemon: bind address, mTLS material, local
//! image cache directory. Loaded file-then-env, matching the precedence
//! the orchestrator crate uses for its own configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostdConfig {
    pub bind_address: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub tls_ca_path: String,
    pub image_cache_dir: String,
    pub max_concurrent_streams: usize,
    /// Server identity reported back via GetSysinfo; normally read from the
    /// host's own inventory but overridable for testing.
    pub server_uuid: String,
    pub hostname: String,
    pub is_headnode: bool,
    pub current_platform: String,
    /// Path to a JSON descriptor of agent-type services installed on this
    /// host, enumerated by Inventory Collector step 3. Format:
    /// `[{"service_name": "...", "instance_id": "...", "image_id": "...", "version": "..."}]`.
    pub agents_manifest_path: String,
}

impl Default for HostdConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7032".to_string(),
            tls_cert_path: "certs/hostd.crt".to_string(),
            tls_key_path: "certs/hostd.key".to_string(),
            tls_ca_path: "certs/ca.crt".to_string(),
            image_cache_dir: "/var/cache/hostd/images".to_string(),
            max_concurrent_streams: 100,
            server_uuid: String::new(),
            hostname: String::new(),
            is_headnode: false,
            current_platform: String::new(),
            agents_manifest_path: "/opt/update/agents.json".to_string(),
        }
    }
}

impl HostdConfig {
    /// Load configuration from file or environment variables.
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path =
            std::env::var("HOSTD_CONFIG_FILE").unwrap_or_else(|_| "/etc/update/hostd.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!("Config file not found at {}, using environment variables", config_path);
            Self::from_env()
        };

        if let Ok(bind) = std::env::var("HOSTD_BIND_ADDRESS") {
            config.bind_address = bind;
        }
        if let Ok(cert) = std::env::var("HOSTD_TLS_CERT") {
            config.tls_cert_path = cert;
        }
        if let Ok(key) = std::env::var("HOSTD_TLS_KEY") {
            config.tls_key_path = key;
        }
        if let Ok(ca) = std::env::var("HOSTD_TLS_CA") {
            config.tls_ca_path = ca;
        }

        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("HOSTD_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            tls_cert_path: std::env::var("HOSTD_TLS_CERT").unwrap_or(defaults.tls_cert_path),
            tls_key_path: std::env::var("HOSTD_TLS_KEY").unwrap_or(defaults.tls_key_path),
            tls_ca_path: std::env::var("HOSTD_TLS_CA").unwrap_or(defaults.tls_ca_path),
            image_cache_dir: std::env::var("HOSTD_IMAGE_CACHE_DIR").unwrap_or(defaults.image_cache_dir),
            max_concurrent_streams: std::env::var("HOSTD_MAX_STREAMS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_streams),
            server_uuid: std::env::var("HOSTD_SERVER_UUID").unwrap_or_default(),
            hostname: std::env::var("HOSTD_HOSTNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_default(),
            is_headnode: std::env::var("HOSTD_IS_HEADNODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            current_platform: std::env::var("HOSTD_CURRENT_PLATFORM").unwrap_or_default(),
            agents_manifest_path: std::env::var("HOSTD_AGENTS_MANIFEST").unwrap_or(defaults.agents_manifest_path),
        }
    }

    /// Validate that all required files exist and values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address.is_empty() {
            return Err("bind_address must not be empty".to_string());
        }
        if self.max_concurrent_streams == 0 {
            return Err("max_concurrent_streams must be > 0".to_string());
        }
        self.validate_file(&self.tls_cert_path, "TLS certificate")?;
        self.validate_file(&self.tls_key_path, "TLS key")?;
        self.validate_file(&self.tls_ca_path, "CA certificate")?;
        Ok(())
    }

    fn validate_file(&self, path: &str, name: &str) -> Result<(), String> {
        if path.is_empty() {
            return Err(format!("{} path is not configured (empty string)", name));
        }
        if !Path::new(path).exists() {
            return Err(format!("{} not found at: {}", name, path));
        }
        Ok(())
    }

    /// Build a rustls ServerConfig with mTLS from the configuration.
    pub fn build_rustls_config(&self) -> Result<std::sync::Arc<rustls::ServerConfig>, Box<dyn std::error::Error>> {
        use rustls::pki_types::CertificateDer;
        use std::io::BufReader;

        let cert_file = std::fs::File::open(&self.tls_cert_path)?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

        let key_file = std::fs::File::open(&self.tls_key_path)?;
        let mut key_reader = BufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or("no private key found in file")?;

        let ca_file = std::fs::File::open(&self.tls_ca_path)?;
        let mut ca_reader = BufReader::new(ca_file);
        let ca_certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut ca_reader).collect::<Result<Vec<_>, _>>()?;

        let mut root_store = rustls::RootCertStore::empty();
        for cert in ca_certs {
            root_store.add(cert)?;
        }

        let client_verifier = rustls::server::WebPkiClientVerifier::builder(std::sync::Arc::new(root_store)).build()?;

        let mut config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs, key)?;

        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(std::sync::Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HostdConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:7032");
        assert!(config.max_concurrent_streams > 0);
    }

    #[test]
    fn validate_rejects_empty_bind_address() {
        let mut config = HostdConfig::default();
        config.bind_address = String::new();
        assert!(config.validate().is_err());
    }
}
