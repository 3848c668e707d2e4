//! Receivers of messages.

use ort_core::WorkerType;
use std::fmt;

/// A component messages can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// The component driving ORT runs.
    Orchestrator,
    /// A worker executing one stage of a run.
    Worker(WorkerType),
}

impl Endpoint {
    /// Returns the orchestrator followed by all worker endpoints.
    pub fn all() -> impl Iterator<Item = Self> {
        std::iter::once(Self::Orchestrator).chain(WorkerType::ALL.into_iter().map(Self::Worker))
    }

    /// Prefix used for job names, labels and configuration sections.
    #[must_use]
    pub const fn config_prefix(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Worker(worker) => worker.config_prefix(),
        }
    }

    /// Looks up an endpoint by its configuration prefix.
    #[must_use]
    pub fn from_config_prefix(prefix: &str) -> Option<Self> {
        Self::all().find(|e| e.config_prefix() == prefix)
    }

    /// Prefix of environment variables that are meant for this endpoint only,
    /// e.g. `ANALYZER_`.
    #[must_use]
    pub fn env_prefix(self) -> String {
        format!("{}_", self.config_prefix().to_uppercase())
    }

    /// The worker type, if this is a worker endpoint.
    #[must_use]
    pub const fn worker_type(self) -> Option<WorkerType> {
        match self {
            Self::Orchestrator => None,
            Self::Worker(worker) => Some(worker),
        }
    }
}

impl From<WorkerType> for Endpoint {
    fn from(worker: WorkerType) -> Self {
        Self::Worker(worker)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_prefix())
    }
}
