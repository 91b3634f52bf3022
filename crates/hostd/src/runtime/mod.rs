//! Runtime module — server lifecycle: boot, TLS, serve, shutdown.

pub mod boot;
pub mod serve;
pub mod stop;
pub mod tls;
