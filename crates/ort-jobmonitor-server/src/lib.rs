//! # ORT Job Monitor Server
//!
//! Assembles the job monitor from its configuration: connects the cluster,
//! the orchestrator transport and the database, then either runs the
//! configured tasks once or keeps the sweeps and the watcher running until
//! the process is asked to stop.

pub mod app;
pub mod startup;

pub use app::{Dependencies, Monitor, Repositories};
