//! The closed set of worker types the orchestrator dispatches jobs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OrtError;

/// A worker type executing one stage of an ORT run.
///
/// The set is closed: adding a worker type forces every exhaustive `match`
/// over it (timeouts, repositories, selectors) to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Config,
    Analyzer,
    Advisor,
    Scanner,
    Evaluator,
    Reporter,
    Notifier,
}

impl WorkerType {
    /// All worker types.
    pub const ALL: [Self; 7] = [
        Self::Config,
        Self::Analyzer,
        Self::Advisor,
        Self::Scanner,
        Self::Evaluator,
        Self::Reporter,
        Self::Notifier,
    ];

    /// The prefix used for job names, labels and configuration sections.
    #[must_use]
    pub const fn config_prefix(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Analyzer => "analyzer",
            Self::Advisor => "advisor",
            Self::Scanner => "scanner",
            Self::Evaluator => "evaluator",
            Self::Reporter => "reporter",
            Self::Notifier => "notifier",
        }
    }

    /// Looks up a worker type by its configuration prefix.
    #[must_use]
    pub fn from_config_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.config_prefix() == prefix)
    }

    /// Whether the worker has its own persisted job records.
    ///
    /// Config jobs are only visible in the cluster.
    #[must_use]
    pub const fn has_job_repository(self) -> bool {
        match self {
            Self::Config => false,
            Self::Analyzer
            | Self::Advisor
            | Self::Scanner
            | Self::Evaluator
            | Self::Reporter
            | Self::Notifier => true,
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_prefix())
    }
}

impl FromStr for WorkerType {
    type Err = OrtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_config_prefix(&s.to_lowercase())
            .ok_or_else(|| OrtError::InvalidInput(format!("Unknown worker type: {s}")))
    }
}
