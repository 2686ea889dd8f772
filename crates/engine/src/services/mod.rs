//! Service facades handed out by the process engine

mod management;
mod repository;

pub use management::ManagementService;
pub use repository::RepositoryService;
