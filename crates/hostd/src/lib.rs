//! hostd — per-server daemon for the update orchestrator.
//!
//! Exposes the concrete gRPC transport behind the orchestrator's
//! `RemoteShellFanout` and `NodeInventory` contracts: remote command
//! execution, sysinfo/on-host-agent enumeration, and local image cache
//! management.

pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod image;
pub mod inventory;
pub mod runtime;
pub mod state;

pub mod proto {
    tonic::include_proto!("update.hostd");
}
