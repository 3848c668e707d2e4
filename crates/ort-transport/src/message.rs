//! Messages exchanged between the orchestrator and the workers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata travelling with every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Access token for the receiver.
    #[serde(default)]
    pub token: String,

    /// Correlates all activity belonging to one run. May be blank, in which
    /// case the sender generates one.
    #[serde(default)]
    pub trace_id: String,

    /// Id of the ORT run the message belongs to.
    pub ort_run_id: i64,

    /// Transport specific settings, e.g. `kubernetes.image_tag`.
    #[serde(default)]
    pub transport_properties: BTreeMap<String, String>,
}

impl MessageHeader {
    /// Creates a header for a run.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, ort_run_id: i64) -> Self {
        Self {
            trace_id: trace_id.into(),
            ort_run_id,
            ..Self::default()
        }
    }

    /// Sets the token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Adds a transport property.
    #[must_use]
    pub fn with_transport_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transport_properties.insert(key.into(), value.into());
        self
    }
}

/// A header plus an endpoint specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    pub header: MessageHeader,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(header: MessageHeader, payload: T) -> Self {
        Self { header, payload }
    }
}

/// Notifications the job monitor sends to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrchestratorMessage {
    /// A worker job failed or disappeared.
    #[serde(rename_all = "camelCase")]
    WorkerError { endpoint_name: String },

    /// A run is active but nothing is scheduled for it anymore.
    #[serde(rename_all = "camelCase")]
    LostSchedule { ort_run_id: i64 },

    /// A run is active although all of its jobs have finished.
    #[serde(rename_all = "camelCase")]
    StuckJobs { ort_run_id: i64 },
}
