pub mod error;
pub mod types;

pub use error::{ShopsyncError, ShopsyncResult};
pub use types::{ResourceType, ServiceInfo};
