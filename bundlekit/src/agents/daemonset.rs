//! Agent DaemonSet manifest.
//!
//! One agent pod per selected node. Each agent collects host artifacts and
//! posts them to the manager's callback URL under its node name.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::AgentWorkloadDescriptor;

/// Label shared by every agent pod.
pub const AGENT_APP_LABEL: &str = "support-bundle-agent";

/// Label carrying the bundle name, so agents of concurrent runs don't collide.
pub const BUNDLE_LABEL: &str = "rancher/supportbundle";

/// Env var the agent reads its own node name from.
pub const NODE_NAME_ENV: &str = "SUPPORT_BUNDLE_NODE_NAME";

/// Env var the agent reads the manager URL from.
pub const MANAGER_URL_ENV: &str = "SUPPORT_BUNDLE_MANAGER_URL";

/// Where the host root filesystem is mounted in the agent.
pub const HOST_MOUNT_PATH: &str = "/host";

fn labels(descriptor: &AgentWorkloadDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), AGENT_APP_LABEL.to_string()),
        (BUNDLE_LABEL.to_string(), descriptor.bundle_name.clone()),
    ])
}

/// Builds the DaemonSet for a descriptor.
#[must_use]
pub fn agent_daemonset(descriptor: &AgentWorkloadDescriptor) -> DaemonSet {
    let node_selector = if descriptor.node_selector.is_empty() {
        None
    } else {
        Some(descriptor.node_selector.clone())
    };

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(descriptor.name.clone()),
            namespace: Some(descriptor.namespace.clone()),
            labels: Some(labels(descriptor)),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels(descriptor)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(descriptor)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_selector,
                    // Agents must run on every selected node, tainted or not.
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".to_string()),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: "agent".to_string(),
                        image: Some(descriptor.image.clone()),
                        image_pull_policy: Some(descriptor.pull_policy.clone()),
                        args: Some(vec!["agent".to_string()]),
                        env: Some(vec![
                            EnvVar {
                                name: NODE_NAME_ENV.to_string(),
                                value_from: Some(EnvVarSource {
                                    field_ref: Some(ObjectFieldSelector {
                                        field_path: "spec.nodeName".to_string(),
                                        ..Default::default()
                                    }),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            EnvVar {
                                name: MANAGER_URL_ENV.to_string(),
                                value: Some(descriptor.callback_url.clone()),
                                ..Default::default()
                            },
                        ]),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "host".to_string(),
                            mount_path: HOST_MOUNT_PATH.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "host".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: "/".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
