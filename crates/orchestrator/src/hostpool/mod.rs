//! Host pool — manages mTLS gRPC connections to every `hostd` daemon in the
//! fleet, mirroring the teacher's `agent::{pool, registry, client}` split.

pub mod adapter;
pub mod client;
pub mod pool;
pub mod registry;

pub use client::HostGrpcClient;
pub use pool::{HostConnection, HostPool};
pub use registry::HostRegistry;

pub type Result<T> = std::result::Result<T, HostPoolError>;

#[derive(Debug, thiserror::Error)]
pub enum HostPoolError {
    #[error("host not found: {0}")]
    NotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
}
