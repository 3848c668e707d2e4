//! In-memory [`ClusterJobGateway`] for tests.
//!
//! Available to other crates through the `test-util` feature.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use ort_core::{OrtError, OrtResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use super::ClusterJobGateway;

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    CreateJob,
    ListJobs,
    DeleteJob,
    ListPods,
    DeletePod,
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<String, Job>,
    pods: BTreeMap<String, Pod>,
    deleted_jobs: Vec<String>,
    deleted_pods: Vec<String>,
    failing: HashSet<GatewayOperation>,
    failing_pods: HashSet<String>,
}

/// Keeps jobs and pods in memory and records every deletion.
#[derive(Default)]
pub struct InMemoryJobGateway {
    state: Mutex<State>,
}

impl InMemoryJobGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a job, replacing one with the same name.
    pub fn add_job(&self, job: Job) {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.state.lock().jobs.insert(name, job);
    }

    /// Stores a pod, replacing one with the same name.
    pub fn add_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state.lock().pods.insert(name, pod);
    }

    /// Returns the stored jobs ordered by name.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Returns the names of deleted jobs in deletion order.
    #[must_use]
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().deleted_jobs.clone()
    }

    /// Returns the names of deleted pods in deletion order.
    #[must_use]
    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().deleted_pods.clone()
    }

    /// Makes an operation fail until [`InMemoryJobGateway::recover`] is called.
    pub fn fail(&self, operation: GatewayOperation) {
        self.state.lock().failing.insert(operation);
    }

    /// Makes the deletion of a single pod fail.
    pub fn fail_pod_deletion(&self, pod_name: &str) {
        self.state.lock().failing_pods.insert(pod_name.to_string());
    }

    /// Lets a failing operation succeed again.
    pub fn recover(&self, operation: GatewayOperation) {
        self.state.lock().failing.remove(&operation);
    }

    fn check(state: &State, operation: GatewayOperation) -> OrtResult<()> {
        if state.failing.contains(&operation) {
            Err(OrtError::kubernetes(format!("{operation:?} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterJobGateway for InMemoryJobGateway {
    async fn create_job(&self, job: &Job) -> OrtResult<Job> {
        let mut state = self.state.lock();
        Self::check(&state, GatewayOperation::CreateJob)?;

        let name = job
            .metadata
            .name
            .clone()
            .ok_or_else(|| OrtError::InvalidInput("Job without a name".to_string()))?;
        if state.jobs.contains_key(&name) {
            return Err(OrtError::kubernetes(format!("jobs \"{name}\" already exists")));
        }
        state.jobs.insert(name, job.clone());
        Ok(job.clone())
    }

    async fn list_jobs(&self, label_selector: &str) -> OrtResult<Vec<Job>> {
        let selector = LabelSelector::parse(label_selector)?;
        let state = self.state.lock();
        Self::check(&state, GatewayOperation::ListJobs)?;

        Ok(state
            .jobs
            .values()
            .filter(|job| selector.matches(job.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, name: &str) -> OrtResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, GatewayOperation::DeleteJob)?;

        state.jobs.remove(name);
        state.deleted_jobs.push(name.to_string());
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> OrtResult<Vec<Pod>> {
        let selector = LabelSelector::parse(label_selector)?;
        let state = self.state.lock();
        Self::check(&state, GatewayOperation::ListPods)?;

        Ok(state
            .pods
            .values()
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> OrtResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, GatewayOperation::DeletePod)?;
        if state.failing_pods.contains(name) {
            return Err(OrtError::kubernetes(format!("Deleting pod {name} failed")));
        }

        state.pods.remove(name);
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    fn watch_jobs(&self, label_selector: &str) -> BoxStream<'static, OrtResult<Job>> {
        let jobs = match LabelSelector::parse(label_selector) {
            Ok(selector) => self
                .state
                .lock()
                .jobs
                .values()
                .filter(|job| selector.matches(job.metadata.labels.as_ref()))
                .cloned()
                .map(Ok)
                .collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(jobs).boxed()
    }
}

/// A single term of an equality- or set-based label selector.
#[derive(Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, Vec<String>),
}

/// The subset of Kubernetes label selectors used by the transport:
/// `key=value`, `key==value` and `key in (a,b)`, joined by commas.
#[derive(Debug, PartialEq, Eq)]
struct LabelSelector(Vec<Requirement>);

impl LabelSelector {
    fn parse(selector: &str) -> OrtResult<Self> {
        let mut requirements = Vec::new();
        for term in split_terms(selector) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(Self::parse_term(term)?);
        }
        Ok(Self(requirements))
    }

    fn parse_term(term: &str) -> OrtResult<Requirement> {
        if let Some((key, values)) = term.split_once(" in ") {
            let values = values
                .trim()
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| OrtError::InvalidInput(format!("Invalid set selector: {term}")))?;
            return Ok(Requirement::In(
                key.trim().to_string(),
                values.split(',').map(|v| v.trim().to_string()).collect(),
            ));
        }

        let (key, value) = term
            .split_once("==")
            .or_else(|| term.split_once('='))
            .ok_or_else(|| OrtError::InvalidInput(format!("Unsupported selector: {term}")))?;
        Ok(Requirement::Equals(key.trim().to_string(), value.trim().to_string()))
    }

    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.0.iter().all(|requirement| match requirement {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
        })
    }
}

/// Splits a selector at commas that are not inside parentheses.
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}
