pub mod route;

pub use route::CommandServiceImpl;
