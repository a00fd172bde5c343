pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod password;
pub mod utils;

// Re-export commonly used types for easier access
pub use backend::{Capabilities, IdentityBackend, UserBackend};
pub use config::{BackendConfiguration, QueryName};
pub use error::{AppError, AppResult};
