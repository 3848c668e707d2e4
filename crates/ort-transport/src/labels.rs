//! Labels identifying the jobs created for ORT runs.
//!
//! Label values are limited to 63 characters, so the trace id is split into
//! chunks of [`TRACE_ID_CHUNK_LENGTH`] stored under `trace-id-0`, `trace-id-1`,
//! and so on. [`trace_id_labels`] and [`trace_id_from_labels`] are the two
//! halves of that encoding and must be kept in sync.

use std::collections::BTreeMap;

use crate::Endpoint;

/// Label holding the config prefix of the worker a job belongs to.
pub const WORKER_LABEL: &str = "ort-worker";

/// Label holding the id of the ORT run.
pub const RUN_ID_LABEL: &str = "run-id";

/// Prefix of the labels holding the trace id chunks.
pub const TRACE_ID_LABEL_PREFIX: &str = "trace-id-";

/// Label Kubernetes puts on the pods of a job.
pub const JOB_NAME_LABEL: &str = "job-name";

/// Number of trace id characters stored in one label.
pub const TRACE_ID_CHUNK_LENGTH: usize = 60;

/// Maximum length of a generated job name.
pub const MAX_JOB_NAME_LENGTH: usize = 64;

/// Splits a trace id into chunk labels.
#[must_use]
pub fn trace_id_labels(trace_id: &str) -> BTreeMap<String, String> {
    let chars: Vec<char> = trace_id.chars().collect();
    chars
        .chunks(TRACE_ID_CHUNK_LENGTH)
        .enumerate()
        .map(|(index, chunk)| {
            (
                format!("{TRACE_ID_LABEL_PREFIX}{index}"),
                chunk.iter().collect(),
            )
        })
        .collect()
}

/// Reassembles a trace id from its chunk labels.
///
/// Chunks are joined in numeric suffix order. Reassembly stops at the first
/// missing index, so a label set with gaps yields only the leading part.
#[must_use]
pub fn trace_id_from_labels(labels: &BTreeMap<String, String>) -> String {
    let mut chunks: Vec<(usize, &str)> = labels
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(TRACE_ID_LABEL_PREFIX)
                .and_then(|suffix| suffix.parse().ok())
                .map(|index| (index, value.as_str()))
        })
        .collect();
    chunks.sort_unstable_by_key(|(index, _)| *index);

    chunks
        .into_iter()
        .enumerate()
        .take_while(|(expected, (index, _))| expected == index)
        .map(|(_, (_, value))| value)
        .collect()
}

/// Builds the name of the job for a message to an endpoint.
#[must_use]
pub fn job_name(endpoint: Endpoint, trace_id: &str) -> String {
    format!("{}-{}", endpoint.config_prefix(), trace_id)
        .chars()
        .take(MAX_JOB_NAME_LENGTH)
        .collect()
}

/// Selector matching the jobs of all endpoints.
#[must_use]
pub fn all_workers_selector() -> String {
    let mut prefixes: Vec<&str> = Endpoint::all().map(Endpoint::config_prefix).collect();
    prefixes.sort_unstable();
    format!("{WORKER_LABEL} in ({})", prefixes.join(","))
}

/// Selector matching the jobs of a single endpoint.
#[must_use]
pub fn worker_selector(endpoint: Endpoint) -> String {
    format!("{WORKER_LABEL}={}", endpoint.config_prefix())
}

/// Selector matching the pods of a job.
#[must_use]
pub fn job_pods_selector(job_name: &str) -> String {
    format!("{JOB_NAME_LABEL}={job_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ort_core::WorkerType;

    #[test]
    fn test_short_trace_id_uses_one_label() {
        let labels = trace_id_labels("0123-abc");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["trace-id-0"], "0123-abc");
    }

    #[test]
    fn test_long_trace_id_is_chunked() {
        let trace_id: String = "0123456789".repeat(20);
        let labels = trace_id_labels(&trace_id);

        assert_eq!(labels.len(), 4);
        for index in 0..4 {
            let value = &labels[&format!("trace-id-{index}")];
            assert!(value.len() <= TRACE_ID_CHUNK_LENGTH);
        }
        assert_eq!(labels["trace-id-3"].len(), 20);
        assert_eq!(trace_id_from_labels(&labels), trace_id);
    }

    #[test]
    fn test_trace_id_round_trips_for_every_length() {
        let alphabet: Vec<char> = "0123456789abcdef-".chars().collect();
        for length in 0..=200 {
            let trace_id: String = (0..length).map(|i| alphabet[i % alphabet.len()]).collect();
            let labels = trace_id_labels(&trace_id);

            assert_eq!(labels.len(), length.div_ceil(TRACE_ID_CHUNK_LENGTH), "length {length}");
            assert_eq!(trace_id_from_labels(&labels), trace_id, "length {length}");
        }
    }

    #[test]
    fn test_reassembly_orders_numerically() {
        let mut labels = BTreeMap::new();
        for index in 0..12 {
            labels.insert(format!("trace-id-{index}"), format!("<{index}>"));
        }
        labels.insert(WORKER_LABEL.to_string(), "analyzer".to_string());

        let expected: String = (0..12).map(|i| format!("<{i}>")).collect();
        assert_eq!(trace_id_from_labels(&labels), expected);
    }

    #[test]
    fn test_reassembly_stops_at_gap() {
        let labels = BTreeMap::from([
            ("trace-id-0".to_string(), "a".to_string()),
            ("trace-id-1".to_string(), "b".to_string()),
            ("trace-id-3".to_string(), "d".to_string()),
            ("trace-id-x".to_string(), "?".to_string()),
        ]);
        assert_eq!(trace_id_from_labels(&labels), "ab");
    }

    #[test]
    fn test_no_trace_labels() {
        assert_eq!(trace_id_from_labels(&BTreeMap::new()), "");
    }

    #[test]
    fn test_job_name_is_truncated() {
        let endpoint = Endpoint::Worker(WorkerType::Analyzer);
        assert_eq!(job_name(endpoint, "abc"), "analyzer-abc");

        let name = job_name(endpoint, &"x".repeat(100));
        assert_eq!(name.len(), MAX_JOB_NAME_LENGTH);
        assert!(name.starts_with("analyzer-xxx"));
    }

    #[test]
    fn test_selectors() {
        assert_eq!(
            all_workers_selector(),
            "ort-worker in (advisor,analyzer,config,evaluator,notifier,orchestrator,reporter,scanner)"
        );
        assert_eq!(
            worker_selector(Endpoint::Worker(WorkerType::Scanner)),
            "ort-worker=scanner"
        );
        assert_eq!(job_pods_selector("scanner-1"), "job-name=scanner-1");
    }
}
