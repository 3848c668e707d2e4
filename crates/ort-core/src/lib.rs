//! # ORT Core
//!
//! Core types shared by every crate of the ORT job monitor: the unified error
//! type, the closed set of worker types, an injectable clock and the tracing
//! setup used by the binaries.

pub mod clock;
pub mod error;
pub mod result;
pub mod telemetry;
pub mod worker;

pub use clock::*;
pub use error::*;
pub use result::*;
pub use worker::*;
