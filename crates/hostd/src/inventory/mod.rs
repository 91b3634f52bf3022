pub mod route;

pub use route::InventoryServiceImpl;
