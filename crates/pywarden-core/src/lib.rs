pub mod config;
pub mod error;
pub mod ids;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{Config, ConfigPaths};
pub use error::{ProvisionStep, RuntimeError};
pub use ids::{ConsumerId, RunId};
pub use paths::RuntimeLayout;
pub use store::{RecordStore, ToolEnvironmentRecord};
pub use types::{ExecutionOptions, ExecutionResult, OutputCallback, OutputStream, RuntimeStatus};
