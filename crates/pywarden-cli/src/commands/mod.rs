pub mod config;
pub mod install;
pub mod packages;
pub mod run;
pub mod status;
