//! orchestrator — plans and executes in-place upgrades of a fleet of
//! infrastructure services across a cluster of physical servers.
//!
//! Five components compose the core: the Inventory Collector, the Image
//! Resolver, the Plan Builder, the Procedure Coordinator, and the Procedure
//! Executors (of which the replicated-database updater is the largest).
//! A process-wide advisory lock serializes every mutating entry point.

pub mod config;
pub mod error;
pub mod external;
pub mod history;
pub mod hostpool;
pub mod image_resolver;
pub mod inventory_collector;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod plan_builder;
pub mod procedure;

pub mod proto {
    tonic::include_proto!("update.hostd");
}
