//! Data model shared by the Inventory Collector, Image Resolver, Plan
//! Builder, Procedure Coordinator and Procedure Executors.

pub mod change;
pub mod history;
pub mod image;
pub mod instance;
pub mod plan;
pub mod server;
pub mod service;

pub use change::{ChangeRequest, InstanceRef, NormalizedChange};
pub use history::HistoryRecord;
pub use image::Image;
pub use instance::Instance;
pub use plan::UpdatePlan;
pub use server::Server;
pub use service::{Service, ServiceType};
