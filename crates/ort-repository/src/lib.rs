//! # ORT Repository
//!
//! Read access to the persisted state of ORT runs: the jobs recorded for each
//! worker and the runs that are still active. The job monitor compares this
//! state with what actually exists in the cluster.

pub mod model;
pub mod pool;
pub mod postgres;
pub mod traits;

pub use model::*;
pub use pool::DatabasePool;
pub use postgres::{PgOrtRunRepository, PgWorkerJobRepository};
pub use traits::*;
