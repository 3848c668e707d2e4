//! Parsed settings of the Kubernetes message sender.

use ort_config::KubernetesSenderSettings;
use std::collections::BTreeMap;
use tracing::warn;

/// Prefix of transport properties addressed to this transport.
const PROPERTY_PREFIX: &str = "kubernetes.";

/// A secret mounted into the worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVolumeMount {
    pub secret: String,
    pub mount_path: String,
}

/// A persistent volume claim mounted into the worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvcVolumeMount {
    pub claim_name: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// Resource requests and limits of the worker container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSettings {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

/// Everything needed to turn a message into a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesSenderConfig {
    pub namespace: String,
    pub image_name: String,
    pub image_pull_policy: String,
    pub image_pull_secret: Option<String>,
    pub restart_policy: String,
    pub backoff_limit: i32,
    pub commands: Vec<String>,
    pub args: Vec<String>,
    pub run_as_user: Option<i64>,
    pub service_account_name: Option<String>,
    pub secret_volumes: Vec<SecretVolumeMount>,
    pub pvc_volumes: Vec<PvcVolumeMount>,
    pub annotations: BTreeMap<String, String>,
    pub resources: ResourceSettings,
    pub enable_debug_logging: bool,
}

impl KubernetesSenderConfig {
    /// Parses the raw settings, reading annotation variables from the process
    /// environment.
    #[must_use]
    pub fn from_settings(settings: &KubernetesSenderSettings) -> Self {
        Self::from_settings_with_env(settings, |name| std::env::var(name).ok())
    }

    /// Parses the raw settings with a custom environment lookup.
    #[must_use]
    pub fn from_settings_with_env<F>(settings: &KubernetesSenderSettings, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            namespace: settings.namespace.clone(),
            image_name: settings.image_name.clone(),
            image_pull_policy: settings.image_pull_policy.clone(),
            image_pull_secret: settings.image_pull_secret.clone().filter(|s| !s.is_empty()),
            restart_policy: settings.restart_policy.clone(),
            backoff_limit: settings.backoff_limit,
            commands: split_quoted(&settings.commands),
            args: split_quoted(&settings.args),
            run_as_user: settings.user_id,
            service_account_name: settings
                .service_account_name
                .clone()
                .filter(|s| !s.is_empty()),
            secret_volumes: parse_secret_mounts(&settings.mount_secrets),
            pvc_volumes: parse_pvc_mounts(&settings.mount_pvcs),
            annotations: parse_annotations(&settings.annotation_variables, env),
            resources: ResourceSettings {
                cpu_request: settings.cpu_request.clone(),
                cpu_limit: settings.cpu_limit.clone(),
                memory_request: settings.memory_request.clone(),
                memory_limit: settings.memory_limit.clone(),
            },
            enable_debug_logging: settings.enable_debug_logging,
        }
    }

    /// Creates a configuration with default settings for a namespace and image.
    #[must_use]
    pub fn new(namespace: impl Into<String>, image_name: impl Into<String>) -> Self {
        let settings = KubernetesSenderSettings {
            namespace: namespace.into(),
            image_name: image_name.into(),
            ..KubernetesSenderSettings::default()
        };
        Self::from_settings_with_env(&settings, |_| None)
    }
}

/// Splits a string at whitespace; double quotes group words into one element.
#[must_use]
pub fn split_quoted(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Splits `source->target`, trimming both sides. Both must be non-empty.
fn parse_mapping(entry: &str) -> Option<(String, String)> {
    let (source, target) = entry.split_once("->")?;
    let (source, target) = (source.trim(), target.trim());
    if source.is_empty() || target.is_empty() {
        None
    } else {
        Some((source.to_string(), target.to_string()))
    }
}

/// Parses `secret->/mount/path` entries. Invalid entries are skipped.
#[must_use]
pub fn parse_secret_mounts(input: &str) -> Vec<SecretVolumeMount> {
    split_quoted(input)
        .iter()
        .filter_map(|entry| {
            let mount = parse_mapping(entry);
            if mount.is_none() {
                warn!(entry = %entry, "Ignoring invalid secret mount declaration");
            }
            mount
        })
        .map(|(secret, mount_path)| SecretVolumeMount { secret, mount_path })
        .collect()
}

/// Parses `claim->/mount/path,R` and `claim->/mount/path,W` entries. Invalid
/// entries are skipped.
#[must_use]
pub fn parse_pvc_mounts(input: &str) -> Vec<PvcVolumeMount> {
    split_quoted(input)
        .iter()
        .filter_map(|entry| {
            let mount = parse_mapping(entry).and_then(|(claim_name, target)| {
                let (mount_path, mode) = target.rsplit_once(',')?;
                let read_only = match mode.trim() {
                    "R" | "r" => true,
                    "W" | "w" => false,
                    _ => return None,
                };
                let mount_path = mount_path.trim();
                (!mount_path.is_empty()).then(|| PvcVolumeMount {
                    claim_name,
                    mount_path: mount_path.to_string(),
                    read_only,
                })
            });
            if mount.is_none() {
                warn!(entry = %entry, "Ignoring invalid PVC mount declaration");
            }
            mount
        })
        .collect()
}

/// Reads annotations from the environment variables named in a comma
/// separated list. Each variable must hold `key=value`; missing or malformed
/// variables are skipped.
#[must_use]
pub fn parse_annotations<F>(variables: &str, env: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    variables
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let Some(value) = env(name) else {
                warn!(variable = %name, "Annotation variable is not set");
                return None;
            };
            let Some((key, value)) = value.split_once('=') else {
                warn!(variable = %name, "Annotation variable is not of the form key=value");
                return None;
            };
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Replaces `${name}` placeholders with the `kubernetes.<name>` transport
/// properties. Unknown placeholders are left untouched.
#[must_use]
pub fn resolve_placeholders(value: &str, properties: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let name = &after[..end];
        match properties.get(&format!("{PROPERTY_PREFIX}{name}")) {
            Some(replacement) => result.push_str(replacement),
            None => result.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}
