//! Provisioning of the managed interpreter, its shared environment and
//! per-consumer package directories, all driven through the external
//! package tool.

pub mod deps;
pub mod environment;
pub mod interpreter;
pub mod locator;
pub mod process;

#[cfg(any(test, feature = "test-support"))]
pub mod fake_tool;

pub use deps::{list_isolated, DependencyInstaller, InstallOptions, InstallTarget, PackageSource};
pub use environment::EnvironmentProvisioner;
pub use interpreter::InterpreterInstaller;
pub use locator::{ToolAvailability, ToolLocation, ToolLocator};
