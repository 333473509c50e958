pub mod error;
pub mod locks;
pub mod registry;
pub mod store;

pub use error::RegistryError;
pub use locks::{NameLock, NameLockManager};
pub use registry::{RecordFilter, ToolRegistry};
pub use store::RegistryStore;
