//! Access to jobs and pods in the cluster.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use ort_core::{OrtError, OrtResult};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Operations on jobs and pods of one namespace.
///
/// Deleting an object that no longer exists succeeds, so concurrent cleanups
/// of the same job do not produce errors.
#[async_trait]
pub trait ClusterJobGateway: Send + Sync {
    /// Creates a job and returns it as stored by the cluster.
    async fn create_job(&self, job: &Job) -> OrtResult<Job>;

    /// Lists the jobs matching a label selector.
    async fn list_jobs(&self, label_selector: &str) -> OrtResult<Vec<Job>>;

    /// Deletes a job by name.
    async fn delete_job(&self, name: &str) -> OrtResult<()>;

    /// Lists the pods matching a label selector.
    async fn list_pods(&self, label_selector: &str) -> OrtResult<Vec<Pod>>;

    /// Deletes a pod by name.
    async fn delete_pod(&self, name: &str) -> OrtResult<()>;

    /// Streams every job matching the selector whenever it is added or changed.
    fn watch_jobs(&self, label_selector: &str) -> BoxStream<'static, OrtResult<Job>>;
}

/// [`ClusterJobGateway`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeJobGateway {
    jobs: Api<Job>,
    pods: Api<Pod>,
    namespace: String,
    request_timeout: Duration,
}

impl KubeJobGateway {
    /// Creates a gateway for a namespace using an existing client.
    #[must_use]
    pub fn new(client: Client, namespace: &str, request_timeout: Duration) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            request_timeout,
        }
    }

    /// Runs an API call, bounded by the request timeout.
    async fn call<T, F>(&self, operation: &str, request: F) -> OrtResult<T>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(kube_error),
            Err(_) => Err(OrtError::Timeout(format!(
                "{operation} in namespace '{}' did not complete within {:?}",
                self.namespace, self.request_timeout
            ))),
        }
    }
}

fn kube_error(err: kube::Error) -> OrtError {
    OrtError::Kubernetes(err.to_string())
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterJobGateway for KubeJobGateway {
    async fn create_job(&self, job: &Job) -> OrtResult<Job> {
        self.call("create job", self.jobs.create(&PostParams::default(), job))
            .await
    }

    async fn list_jobs(&self, label_selector: &str) -> OrtResult<Vec<Job>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.call("list jobs", self.jobs.list(&params)).await?;
        Ok(list.items)
    }

    async fn delete_job(&self, name: &str) -> OrtResult<()> {
        let params = DeleteParams::background();
        self.call("delete job", async {
            match self.jobs.delete(name, &params).await {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => {
                    debug!(job_name = %name, "Job already deleted");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn list_pods(&self, label_selector: &str) -> OrtResult<Vec<Pod>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.call("list pods", self.pods.list(&params)).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &str) -> OrtResult<()> {
        let params = DeleteParams::default();
        self.call("delete pod", async {
            match self.pods.delete(name, &params).await {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => {
                    debug!(pod_name = %name, "Pod already deleted");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    fn watch_jobs(&self, label_selector: &str) -> BoxStream<'static, OrtResult<Job>> {
        let config = watcher::Config::default().labels(label_selector);
        watcher(self.jobs.clone(), config)
            .applied_objects()
            .map(|event| event.map_err(|e| OrtError::Kubernetes(format!("Job watch failed: {e}"))))
            .boxed()
    }
}
