//! # ORT Config
//!
//! Configuration management for the ORT job monitor.
//! Values are layered from TOML files and `ORT__`-prefixed environment
//! variables, then validated as a whole before anything starts.

mod app_config;
mod loader;
mod monitor;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use monitor::*;
pub use validation::*;
