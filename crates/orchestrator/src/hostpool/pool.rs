use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, error, info, warn};

use super::client::HostGrpcClient;
use super::{HostPoolError, Result};
use crate::config::{HostConfig, HostPoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl From<i32> for HealthStatus {
    fn from(value: i32) -> Self {
        match value {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

/// A single `hostd` connection and its liveness tracking.
pub struct HostConnection {
    pub config: HostConfig,
    client: Arc<Mutex<HostGrpcClient>>,
    health_status: Arc<AtomicU8>,
    last_seen: Arc<RwLock<Instant>>,
}

impl HostConnection {
    pub fn is_healthy(&self) -> bool {
        self.health_status() == HealthStatus::Healthy
    }

    pub fn health_status(&self) -> HealthStatus {
        match self.health_status.load(Ordering::Acquire) {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    fn set_health(&self, status: HealthStatus) {
        let value = match status {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Unhealthy => 2,
        };
        self.health_status.store(value, Ordering::Release);
    }

    pub async fn last_seen(&self) -> Instant {
        *self.last_seen.read().await
    }

    async fn touch(&self) {
        *self.last_seen.write().await = Instant::now();
    }

    /// Clone the inner gRPC client for use outside the connection lock.
    pub async fn client(&self) -> HostGrpcClient {
        self.client.lock().await.clone()
    }

    pub async fn check_health(&self) -> Result<()> {
        let mut client = self.client().await;
        let health_check_timeout = Duration::from_secs(5);
        let result = tokio::time::timeout(health_check_timeout, client.check_health()).await;

        match result {
            Ok(Ok(response)) => {
                self.set_health(HealthStatus::from(response.status));
                self.touch().await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_health(HealthStatus::Unhealthy);
                warn!("health check failed for {}: {}", self.config.server_id, e);
                Err(e)
            }
            Err(_) => {
                self.set_health(HealthStatus::Unhealthy);
                warn!("health check timed out for {} after {}s", self.config.server_id, health_check_timeout.as_secs());
                Err(HostPoolError::ConnectionFailed(format!("health check timed out for {}", self.config.server_id)))
            }
        }
    }
}

/// Connection pool over every configured `hostd` endpoint.
pub struct HostPool {
    connections: DashMap<String, Arc<HostConnection>>,
    config: HostPoolConfig,
}

impl HostPool {
    pub fn new(config: HostPoolConfig) -> Self {
        Self { connections: DashMap::new(), config }
    }

    pub async fn initialize(&self) -> Result<()> {
        info!("initializing host pool with {} static hosts", self.config.static_hosts.len());
        for host in &self.config.static_hosts {
            match self.add_host(host.clone()).await {
                Ok(_) => info!("host '{}' added successfully", host.server_id),
                Err(e) => error!("failed to add host '{}': {}", host.server_id, e),
            }
        }
        info!("host pool initialized with {} hosts", self.connections.len());
        Ok(())
    }

    pub async fn add_host(&self, config: HostConfig) -> Result<()> {
        debug!("adding host: {}", config.server_id);
        let channel = Self::create_channel(&config).await?;
        let client = HostGrpcClient::new(channel);

        let connection = Arc::new(HostConnection {
            config: config.clone(),
            client: Arc::new(Mutex::new(client)),
            health_status: Arc::new(AtomicU8::new(0)),
            last_seen: Arc::new(RwLock::new(Instant::now())),
        });

        if let Err(e) = connection.check_health().await {
            warn!("initial health check failed for host {}: {}", config.server_id, e);
        }

        self.connections.insert(config.server_id.clone(), connection);
        Ok(())
    }

    pub fn remove_host(&self, server_id: &str) -> Option<Arc<HostConnection>> {
        self.connections.remove(server_id).map(|(_, conn)| conn)
    }

    pub fn get_host(&self, server_id: &str) -> Option<Arc<HostConnection>> {
        self.connections.get(server_id).map(|entry| entry.value().clone())
    }

    pub fn list_hosts(&self) -> Vec<Arc<HostConnection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn count_healthy(&self) -> usize {
        self.connections.iter().filter(|entry| entry.value().is_healthy()).count()
    }

    /// Reconnect an unhealthy host with exponential backoff,
    /// `base * 2^(attempt-1)` capped at 60s.
    async fn reconnect_host(&self, server_id: &str) -> Result<()> {
        let config = self.connections.get(server_id).map(|c| c.value().config.clone()).ok_or_else(|| HostPoolError::NotFound(server_id.to_string()))?;

        let backoff_base = Duration::from_secs(self.config.reconnect_backoff_secs);
        let max_attempts = self.config.max_reconnect_attempts;

        for attempt in 1..=max_attempts {
            info!("reconnecting host {} (attempt {}/{})", server_id, attempt, max_attempts);

            match Self::create_channel(&config).await {
                Ok(channel) => {
                    let client = HostGrpcClient::new(channel);
                    if let Some(conn) = self.connections.get(server_id) {
                        let mut guard = conn.client.lock().await;
                        *guard = client;
                    }
                    if let Some(conn) = self.connections.get(server_id) {
                        if conn.check_health().await.is_ok() {
                            info!("host {} reconnected successfully", server_id);
                            return Ok(());
                        }
                    }
                }
                Err(e) => warn!("reconnect attempt {}/{} failed for host {}: {}", attempt, max_attempts, server_id, e),
            }

            let delay = backoff_base.saturating_mul(1u32 << (attempt - 1).min(5)).min(Duration::from_secs(60));
            tokio::time::sleep(delay).await;
        }

        error!("failed to reconnect host {} after {} attempts", server_id, max_attempts);
        Err(HostPoolError::ConnectionFailed(format!("failed to reconnect host {} after {} attempts", server_id, max_attempts)))
    }

    pub async fn health_check_all(&self) {
        debug!("running health check on all {} hosts", self.connections.len());

        let hosts: Vec<(String, Arc<HostConnection>)> = self.connections.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();

        let mut tasks = Vec::new();
        for (server_id, host) in hosts {
            tasks.push(tokio::spawn(async move {
                let _ = host.check_health().await;
                (server_id, host.health_status())
            }));
        }

        let mut unhealthy_ids = Vec::new();
        for task in tasks {
            if let Ok((id, status)) = task.await {
                if status == HealthStatus::Unhealthy {
                    unhealthy_ids.push(id);
                }
            }
        }

        for server_id in &unhealthy_ids {
            if let Err(e) = self.reconnect_host(server_id).await {
                debug!("reconnection failed for host {}: {}", server_id, e);
            }
        }

        info!("health check complete: {} healthy, {} unhealthy", self.count_healthy(), unhealthy_ids.len());
    }

    async fn create_channel(config: &HostConfig) -> Result<Channel> {
        debug!("creating mTLS channel to host {} at {}", config.server_id, config.address);

        let cert = tokio::fs::read(&config.tls_cert).await.map_err(|e| HostPoolError::Tls(format!("failed to read client cert: {}", e)))?;
        let key = tokio::fs::read(&config.tls_key).await.map_err(|e| HostPoolError::Tls(format!("failed to read client key: {}", e)))?;
        let ca = tokio::fs::read(&config.tls_ca).await.map_err(|e| HostPoolError::Tls(format!("failed to read CA cert: {}", e)))?;

        let identity = Identity::from_pem(cert, key);
        let ca_cert = Certificate::from_pem(ca);

        let tls_config = ClientTlsConfig::new().identity(identity).ca_certificate(ca_cert).domain_name(&config.tls_domain);

        let endpoint = Channel::from_shared(format!("https://{}", config.address))
            .map_err(|e| HostPoolError::InvalidConfig(format!("invalid address: {}", e)))?
            .tls_config(tls_config)
            .map_err(|e| HostPoolError::Tls(format!("TLS config error: {}", e)))?
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Some(Duration::from_secs(60)));

        endpoint.connect().await.map_err(|e| HostPoolError::ConnectionFailed(format!("failed to connect to {}: {}", config.address, e)))
    }
}
