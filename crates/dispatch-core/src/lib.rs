pub mod budget;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod prompt;
pub mod request;
pub mod shell;
pub mod types;

pub use budget::BudgetPolicy;
pub use config::ControllerConfig;
pub use credentials::{ProviderCredentials, ProviderKind};
pub use request::{TaskRequest, ValidationError};
pub use types::*;
