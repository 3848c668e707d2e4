//! Sends messages by creating one Kubernetes job per message.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PersistentVolumeClaimVolumeSource,
    PodSecurityContext, PodSpec, PodTemplateSpec, ResourceRequirements, SecretVolumeSource,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ort_core::OrtResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{resolve_placeholders, ClusterJobGateway, KubernetesSenderConfig};
use crate::labels::{self, RUN_ID_LABEL, WORKER_LABEL};
use crate::{Endpoint, Message, MessageHeader, MessageSender};

/// Process variables never forwarded to a worker container.
const BLOCKED_ENV_VARIABLES: [&str; 4] = ["_", "HOME", "PATH", "PWD"];

/// Container variable holding the message token.
pub const TOKEN_VARIABLE: &str = "token";
/// Container variable holding the trace id.
pub const TRACE_ID_VARIABLE: &str = "traceId";
/// Container variable holding the run id.
pub const RUN_ID_VARIABLE: &str = "runId";
/// Container variable holding the serialized payload.
pub const PAYLOAD_VARIABLE: &str = "payload";

/// [`MessageSender`] that creates a Kubernetes job for every message.
///
/// The job carries the message header as labels (see [`labels`]) and as
/// environment variables, next to the variables of the sending process.
pub struct KubernetesMessageSender {
    gateway: Arc<dyn ClusterJobGateway>,
    config: KubernetesSenderConfig,
    endpoint: Endpoint,
    environment: Option<BTreeMap<String, String>>,
}

impl KubernetesMessageSender {
    /// Creates a sender that forwards the environment of the current process.
    pub fn new(
        gateway: Arc<dyn ClusterJobGateway>,
        config: KubernetesSenderConfig,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            gateway,
            config,
            endpoint,
            environment: None,
        }
    }

    /// Uses a fixed set of variables instead of the process environment.
    #[must_use]
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Builds the job for a message without submitting it.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be serialized.
    pub fn build_job<T: Serialize>(&self, message: &Message<T>) -> OrtResult<Job> {
        let header = &message.header;
        let trace_id = if header.trace_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            header.trace_id.clone()
        };
        let payload = serde_json::to_string(&message.payload)?;
        let properties = &header.transport_properties;
        let resolve = |value: &str| resolve_placeholders(value, properties);

        let name = labels::job_name(self.endpoint, &trace_id);
        let mut job_labels = labels::trace_id_labels(&trace_id);
        job_labels.insert(RUN_ID_LABEL.to_string(), header.ort_run_id.to_string());
        job_labels.insert(
            WORKER_LABEL.to_string(),
            self.endpoint.config_prefix().to_string(),
        );

        let (volumes, volume_mounts) = self.volumes(&resolve);

        let container = Container {
            name: name.clone(),
            image: Some(resolve(&self.config.image_name)),
            image_pull_policy: Some(resolve(&self.config.image_pull_policy)),
            command: non_empty(self.config.commands.clone()),
            args: non_empty(self.config.args.clone()),
            env: Some(self.container_env(header, &trace_id, payload)),
            volume_mounts: non_empty(volume_mounts),
            resources: self.resources(&resolve),
            ..Container::default()
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            restart_policy: Some(self.config.restart_policy.clone()),
            image_pull_secrets: self.config.image_pull_secret.as_deref().map(|secret| {
                vec![LocalObjectReference {
                    name: resolve(secret).into(),
                }]
            }),
            service_account_name: self.config.service_account_name.as_deref().map(resolve),
            security_context: self.config.run_as_user.map(|user| PodSecurityContext {
                run_as_user: Some(user),
                ..PodSecurityContext::default()
            }),
            volumes: non_empty(volumes),
            ..PodSpec::default()
        };

        let annotations: BTreeMap<String, String> = self
            .config
            .annotations
            .iter()
            .map(|(key, value)| (key.clone(), resolve(value)))
            .collect();

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(job_labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(self.config.backoff_limit),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(job_labels),
                        annotations: (!annotations.is_empty()).then_some(annotations),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(pod_spec),
                },
                ..JobSpec::default()
            }),
            ..Job::default()
        })
    }

    /// Variables of the sending process plus the message header and payload.
    ///
    /// A variable `<ENDPOINT>_NAME` is passed on as `NAME` and wins over an
    /// unprefixed `NAME`.
    fn container_env(&self, header: &MessageHeader, trace_id: &str, payload: String) -> Vec<EnvVar> {
        let source: BTreeMap<String, String> = match &self.environment {
            Some(environment) => environment.clone(),
            None => std::env::vars().collect(),
        };
        let prefix = self.endpoint.env_prefix();

        let mut variables = BTreeMap::new();
        let mut overrides = BTreeMap::new();
        for (name, value) in source {
            if BLOCKED_ENV_VARIABLES.contains(&name.as_str()) {
                continue;
            }
            match name.strip_prefix(&prefix) {
                Some(stripped) if !stripped.is_empty() => {
                    overrides.insert(stripped.to_string(), value);
                }
                _ => {
                    variables.insert(name, value);
                }
            }
        }
        variables.extend(overrides);

        variables.insert(TOKEN_VARIABLE.to_string(), header.token.clone());
        variables.insert(TRACE_ID_VARIABLE.to_string(), trace_id.to_string());
        variables.insert(RUN_ID_VARIABLE.to_string(), header.ort_run_id.to_string());
        variables.insert(PAYLOAD_VARIABLE.to_string(), payload);

        variables
            .into_iter()
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                ..EnvVar::default()
            })
            .collect()
    }

    fn volumes(&self, resolve: &dyn Fn(&str) -> String) -> (Vec<Volume>, Vec<VolumeMount>) {
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();

        for (index, secret) in self.config.secret_volumes.iter().enumerate() {
            let name = format!("secret-volume-{}", index + 1);
            volumes.push(Volume {
                name: name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(resolve(&secret.secret)),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
            mounts.push(VolumeMount {
                name,
                mount_path: resolve(&secret.mount_path),
                read_only: Some(true),
                ..VolumeMount::default()
            });
        }

        for (index, pvc) in self.config.pvc_volumes.iter().enumerate() {
            let name = format!("pvc-volume-{}", index + 1);
            volumes.push(Volume {
                name: name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: resolve(&pvc.claim_name),
                    read_only: Some(pvc.read_only),
                }),
                ..Volume::default()
            });
            mounts.push(VolumeMount {
                name,
                mount_path: resolve(&pvc.mount_path),
                read_only: Some(pvc.read_only),
                ..VolumeMount::default()
            });
        }

        (volumes, mounts)
    }

    fn resources(&self, resolve: &dyn Fn(&str) -> String) -> Option<ResourceRequirements> {
        let settings = &self.config.resources;
        let quantities = |entries: [(&str, &Option<String>); 2]| {
            let map: BTreeMap<String, Quantity> = entries
                .into_iter()
                .filter_map(|(key, value)| {
                    value
                        .as_deref()
                        .map(|v| (key.to_string(), Quantity(resolve(v))))
                })
                .collect();
            (!map.is_empty()).then_some(map)
        };

        let requests = quantities([
            ("cpu", &settings.cpu_request),
            ("memory", &settings.memory_request),
        ]);
        let limits = quantities([("cpu", &settings.cpu_limit), ("memory", &settings.memory_limit)]);

        (requests.is_some() || limits.is_some()).then(|| ResourceRequirements {
            requests,
            limits,
            ..ResourceRequirements::default()
        })
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

#[async_trait]
impl<T> MessageSender<T> for KubernetesMessageSender
where
    T: Serialize + Send + Sync + 'static,
{
    fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn send(&self, message: Message<T>) -> OrtResult<()> {
        let job = self.build_job(&message).map_err(|e| {
            error!(
                endpoint = %self.endpoint,
                ort_run_id = message.header.ort_run_id,
                error = %e,
                "Failed to build job for message"
            );
            e
        })?;
        let job_name = job.metadata.name.clone().unwrap_or_default();

        if self.config.enable_debug_logging {
            debug!(job_name = %job_name, job = ?job, "Submitting job");
        }

        match self.gateway.create_job(&job).await {
            Ok(_) => {
                info!(
                    endpoint = %self.endpoint,
                    job_name = %job_name,
                    ort_run_id = message.header.ort_run_id,
                    "Created job"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    endpoint = %self.endpoint,
                    job_name = %job_name,
                    ort_run_id = message.header.ort_run_id,
                    error = %e,
                    "Failed to create job"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::{InMemoryJobGateway, PvcVolumeMount, SecretVolumeMount};
    use crate::GatewayOperation;
    use ort_core::WorkerType;

    #[derive(Serialize)]
    struct AnalyzerRequest {
        analyzer_job_id: i64,
    }

    fn analyzer() -> Endpoint {
        Endpoint::Worker(WorkerType::Analyzer)
    }

    fn sender(gateway: Arc<InMemoryJobGateway>, config: KubernetesSenderConfig) -> KubernetesMessageSender {
        KubernetesMessageSender::new(gateway, config, analyzer()).with_environment(BTreeMap::from([
            ("SHELL".to_string(), "/bin/bash".to_string()),
            ("HOME".to_string(), "/home/ort".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("PWD".to_string(), "/".to_string()),
            ("_".to_string(), "/usr/bin/env".to_string()),
            ("SPECIFIC_PROPERTY".to_string(), "generic".to_string()),
            ("ANALYZER_SPECIFIC_PROPERTY".to_string(), "specific".to_string()),
            ("SCANNER_OTHER".to_string(), "untouched".to_string()),
        ]))
    }

    fn message(trace_id: &str) -> Message<AnalyzerRequest> {
        Message::new(
            MessageHeader::new(trace_id, 17)
                .with_token("tok")
                .with_transport_property("kubernetes.tag", "1.0"),
            AnalyzerRequest { analyzer_job_id: 5 },
        )
    }

    fn env_of(job: &Job) -> BTreeMap<String, String> {
        let spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        spec.containers[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|var| (var.name, var.value.unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_job_carries_labels_and_name() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let sender = sender(gateway, KubernetesSenderConfig::new("ort", "ort/analyzer:${tag}"));

        let job = sender.build_job(&message("trace-1")).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("analyzer-trace-1"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("ort"));
        let labels = job.metadata.labels.clone().unwrap();
        assert_eq!(labels["ort-worker"], "analyzer");
        assert_eq!(labels["run-id"], "17");
        assert_eq!(labels["trace-id-0"], "trace-1");

        let template_labels = job.spec.as_ref().unwrap().template.metadata.clone().unwrap().labels;
        assert_eq!(template_labels, Some(labels));

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.containers[0].name, "analyzer-trace-1");
        assert_eq!(pod.containers[0].image.as_deref(), Some("ort/analyzer:1.0"));
        assert_eq!(pod.containers[0].image_pull_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn test_long_trace_id_produces_chunk_labels() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let sender = sender(gateway, KubernetesSenderConfig::new("ort", "img"));
        let trace_id = "abcdefghij".repeat(20);

        let job = sender.build_job(&message(&trace_id)).unwrap();

        let labels = job.metadata.labels.clone().unwrap();
        for index in 0..4 {
            assert!(labels.contains_key(&format!("trace-id-{index}")));
        }
        assert_eq!(labels::trace_id_from_labels(&labels), trace_id);
        let name = job.metadata.name.clone().unwrap();
        assert_eq!(name.len(), labels::MAX_JOB_NAME_LENGTH);
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].name, name);
    }

    #[test]
    fn test_blank_trace_id_is_generated() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let sender = sender(gateway, KubernetesSenderConfig::new("ort", "img"));

        let job = sender.build_job(&message("  ")).unwrap();

        let env = env_of(&job);
        let trace_id = &env[TRACE_ID_VARIABLE];
        assert!(Uuid::parse_str(trace_id).is_ok());
        assert_eq!(
            labels::trace_id_from_labels(job.metadata.labels.as_ref().unwrap()),
            *trace_id
        );
        assert_eq!(job.metadata.name, Some(format!("analyzer-{trace_id}")));
    }

    #[test]
    fn test_container_environment() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let sender = sender(gateway, KubernetesSenderConfig::new("ort", "img"));

        let env = env_of(&sender.build_job(&message("trace-1")).unwrap());

        assert_eq!(env["SHELL"], "/bin/bash");
        for blocked in BLOCKED_ENV_VARIABLES {
            assert!(!env.contains_key(blocked), "{blocked} must not be forwarded");
        }
        assert_eq!(env["SPECIFIC_PROPERTY"], "specific");
        assert!(!env.contains_key("ANALYZER_SPECIFIC_PROPERTY"));
        assert_eq!(env["SCANNER_OTHER"], "untouched");

        assert_eq!(env[TOKEN_VARIABLE], "tok");
        assert_eq!(env[TRACE_ID_VARIABLE], "trace-1");
        assert_eq!(env[RUN_ID_VARIABLE], "17");
        assert_eq!(env[PAYLOAD_VARIABLE], r#"{"analyzer_job_id":5}"#);
    }

    #[test]
    fn test_optional_pod_settings() {
        let mut config = KubernetesSenderConfig::new("ort", "img");
        config.image_pull_secret = Some("registry-${tag}".to_string());
        config.service_account_name = Some("ort-worker".to_string());
        config.run_as_user = Some(1000);
        config.commands = vec!["/bin/sh".to_string()];
        config.args = vec!["-c".to_string(), "run worker".to_string()];
        config.annotations = BTreeMap::from([("team".to_string(), "ort".to_string())]);
        config.resources.cpu_request = Some("500m".to_string());
        config.resources.memory_limit = Some("4Gi".to_string());

        let gateway = Arc::new(InMemoryJobGateway::new());
        let job = sender(gateway, config).build_job(&message("t")).unwrap();
        let template = &job.spec.as_ref().unwrap().template;
        let pod = template.spec.as_ref().unwrap();

        assert_eq!(
            serde_json::to_value(&pod.image_pull_secrets).unwrap(),
            serde_json::json!([{"name": "registry-1.0"}])
        );
        assert_eq!(pod.service_account_name.as_deref(), Some("ort-worker"));
        assert_eq!(pod.security_context.as_ref().unwrap().run_as_user, Some(1000));
        assert_eq!(pod.containers[0].command, Some(vec!["/bin/sh".to_string()]));
        assert_eq!(pod.containers[0].args.as_ref().unwrap()[1], "run worker");

        let annotations = template.metadata.as_ref().unwrap().annotations.clone().unwrap();
        assert_eq!(annotations["team"], "ort");

        let resources = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(resources.requests.as_ref().unwrap()["cpu"], Quantity("500m".to_string()));
        assert_eq!(resources.limits.as_ref().unwrap()["memory"], Quantity("4Gi".to_string()));
        assert!(!resources.requests.as_ref().unwrap().contains_key("memory"));
    }

    #[test]
    fn test_defaults_leave_optional_fields_empty() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let job = sender(gateway, KubernetesSenderConfig::new("ort", "img"))
            .build_job(&message("t"))
            .unwrap();
        let template = &job.spec.as_ref().unwrap().template;
        let pod = template.spec.as_ref().unwrap();

        assert!(pod.image_pull_secrets.is_none());
        assert!(pod.security_context.is_none());
        assert!(pod.volumes.is_none());
        assert!(pod.containers[0].resources.is_none());
        assert!(pod.containers[0].command.is_none());
        assert!(template.metadata.as_ref().unwrap().annotations.is_none());
    }

    #[test]
    fn test_volumes() {
        let mut config = KubernetesSenderConfig::new("ort", "img");
        config.secret_volumes = vec![
            SecretVolumeMount {
                secret: "db".to_string(),
                mount_path: "/mnt/db".to_string(),
            },
            SecretVolumeMount {
                secret: "git".to_string(),
                mount_path: "/mnt/git".to_string(),
            },
        ];
        config.pvc_volumes = vec![PvcVolumeMount {
            claim_name: "cache".to_string(),
            mount_path: "/mnt/cache".to_string(),
            read_only: false,
        }];

        let gateway = Arc::new(InMemoryJobGateway::new());
        let job = sender(gateway, config).build_job(&message("t")).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();

        let volumes = pod.volumes.unwrap();
        let names: Vec<_> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["secret-volume-1", "secret-volume-2", "pvc-volume-1"]);
        assert_eq!(
            volumes[1].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("git")
        );
        assert_eq!(volumes[2].persistent_volume_claim.as_ref().unwrap().claim_name, "cache");

        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].mount_path, "/mnt/db");
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[2].mount_path, "/mnt/cache");
        assert_eq!(mounts[2].read_only, Some(false));
    }

    #[tokio::test]
    async fn test_send_submits_job() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        let sender = sender(gateway.clone(), KubernetesSenderConfig::new("ort", "img"));

        sender.send(message("trace-1")).await.unwrap();

        let jobs = gateway.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].metadata.name.as_deref(), Some("analyzer-trace-1"));
    }

    #[tokio::test]
    async fn test_send_surfaces_cluster_errors() {
        let gateway = Arc::new(InMemoryJobGateway::new());
        gateway.fail(GatewayOperation::CreateJob);
        let sender = sender(gateway.clone(), KubernetesSenderConfig::new("ort", "img"));

        let err = sender.send(message("trace-1")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(gateway.jobs().is_empty());
    }
}
