#![deny(missing_docs)]
//! Kubernetes-backed implementation of [`draind_types::NodeClient`].
//!
//! Uses the `kube::Api<T>` idiom scoped per-resource: `Patch::Merge` for
//! label/taint mutation, `ListParams`/`DeleteParams` for drain.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use draind_types::{DrainOptions, EventReason, NodeClient, NodeError, TaintEffect};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Node, Pod, Taint};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PropagationPolicy};
use kube::Client;
use serde_json::json;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// `NodeClient` implementation backed by a live `kube::Client`.
pub struct KubeNodeClient {
    client: Client,
    field_manager: String,
}

impl KubeNodeClient {
    /// Build a client from the ambient kubeconfig/in-cluster config.
    pub async fn try_new(field_manager: impl Into<String>) -> Result<Self, NodeError> {
        let client = Client::try_default()
            .await
            .map_err(|e| NodeError::Api(e.to_string()))?;
        Ok(Self {
            client,
            field_manager: field_manager.into(),
        })
    }

    /// Build a client from an explicit `kube::Client` (tests, custom config).
    #[must_use]
    pub fn from_client(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    async fn get_node(&self, node_name: &str) -> Result<Node, NodeError> {
        self.nodes().get(node_name).await.map_err(|e| map_kube_error(node_name, e))
    }

    fn is_daemonset_pod(pod: &Pod) -> bool {
        pod.metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
    }
}

fn map_kube_error(node_name: &str, err: kube::Error) -> NodeError {
    if let kube::Error::Api(resp) = &err {
        if resp.code == 404 {
            return NodeError::NotFound(node_name.to_string());
        }
        if resp.code == 429 {
            return NodeError::RateLimited(resp.message.clone());
        }
    }
    NodeError::Api(err.to_string())
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn get_node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>, NodeError> {
        let node = self.get_node(node_name).await?;
        Ok(node.metadata.labels.unwrap_or_default().into_iter().collect())
    }

    async fn list_pod_names_on_node(&self, node_name: &str) -> Result<Vec<String>, NodeError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let list = pods.list(&lp).await.map_err(|e| map_kube_error(node_name, e))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    async fn node_name_from_provider_id(&self, provider_id: &str) -> Result<Option<String>, NodeError> {
        let list = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(|e| NodeError::Api(e.to_string()))?;
        Ok(list.items.into_iter().find_map(|n| {
            let matches = n
                .spec
                .as_ref()
                .and_then(|s| s.provider_id.as_deref())
                .is_some_and(|p| p.contains(provider_id));
            if matches {
                n.metadata.name
            } else {
                None
            }
        }))
    }

    async fn node_name_by_label(&self, key: &str, value: &str) -> Result<Option<String>, NodeError> {
        let lp = ListParams::default().labels(&format!("{key}={value}"));
        let list = self.nodes().list(&lp).await.map_err(|e| NodeError::Api(e.to_string()))?;
        Ok(list.items.into_iter().next().and_then(|n| n.metadata.name))
    }

    async fn is_node_ready(&self, node_name: &str) -> Result<bool, NodeError> {
        let node = match self.get_node(node_name).await {
            Ok(n) => n,
            Err(NodeError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let ready = node
            .status
            .and_then(|s| s.conditions)
            .into_iter()
            .flatten()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        Ok(ready)
    }

    async fn cordon(&self, node_name: &str, reason: &str) -> Result<(), NodeError> {
        tracing::info!(node_name, reason, "cordoning node");
        let patch = json!({ "spec": { "unschedulable": true } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn cordon_and_drain(&self, node_name: &str, reason: &str, opts: &DrainOptions) -> Result<(), NodeError> {
        self.cordon(node_name, reason).await?;
        tracing::info!(node_name, reason, ?opts.force, "draining node");

        let pods_api: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let list = pods_api.list(&lp).await.map_err(|e| map_kube_error(node_name, e))?;

        let grace = if opts.pod_termination_grace_period < 0 {
            None
        } else {
            Some(opts.pod_termination_grace_period)
        };

        let mut deletions = Vec::new();
        for pod in list.items {
            if !opts.ignore_all_daemon_sets && Self::is_daemonset_pod(&pod) {
                continue;
            }
            if opts.ignore_all_daemon_sets && Self::is_daemonset_pod(&pod) {
                continue;
            }
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let mut dp = DeleteParams::default();
            dp.grace_period_seconds = if opts.force { Some(0) } else { grace.map(|g| g as u32) };
            dp.propagation_policy = Some(PropagationPolicy::Background);
            let api = pods_api.clone();
            deletions.push(async move { api.delete(&name, &dp).await });
        }

        let timeout = Duration::from_secs(opts.node_termination_grace_period.max(1));
        let drain = async { join_all(deletions).await };
        match tokio::time::timeout(timeout, drain).await {
            Ok(results) => {
                for r in results {
                    if let Err(e) = r {
                        if !matches!(&e, kube::Error::Api(resp) if resp.code == 404) {
                            return Err(NodeError::Api(e.to_string()));
                        }
                    }
                }
                Ok(())
            }
            Err(_) => Err(NodeError::Api(format!(
                "drain of {node_name} did not complete within {}s",
                opts.node_termination_grace_period
            ))),
        }
    }

    async fn uncordon(&self, node_name: &str) -> Result<(), NodeError> {
        tracing::info!(node_name, "uncordoning node");
        let patch = json!({ "spec": { "unschedulable": false } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn add_label(&self, node_name: &str, key: &str, value: &str) -> Result<(), NodeError> {
        let patch = json!({ "metadata": { "labels": { key: value } } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn remove_label(&self, node_name: &str, key: &str) -> Result<(), NodeError> {
        let patch = json!({ "metadata": { "labels": { key: serde_json::Value::Null } } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn add_taint(&self, node_name: &str, key: &str, value: &str, effect: TaintEffect) -> Result<(), NodeError> {
        let node = self.get_node(node_name).await?;
        let mut taints: Vec<Taint> = node
            .spec
            .and_then(|s| s.taints)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.key != key)
            .collect();
        taints.push(Taint {
            key: key.to_string(),
            value: Some(value.to_string()),
            effect: effect.as_str().to_string(),
            time_added: None,
        });
        let patch = json!({ "spec": { "taints": taints } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn remove_taint(&self, node_name: &str, key: &str) -> Result<(), NodeError> {
        let node = self.get_node(node_name).await?;
        let taints: Vec<Taint> = node
            .spec
            .and_then(|s| s.taints)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.key != key)
            .collect();
        let patch = json!({ "spec": { "taints": taints } });
        self.nodes()
            .patch(node_name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node_name, e))?;
        Ok(())
    }

    async fn taint_out_of_service(&self, node_name: &str) -> Result<(), NodeError> {
        self.add_taint(
            node_name,
            "node.kubernetes.io/out-of-service",
            "nodeshutdown",
            TaintEffect::NoExecute,
        )
        .await
    }

    async fn record_event(&self, node_name: &str, reason: EventReason, message: &str) {
        if reason.is_failure() {
            tracing::warn!(node_name, ?reason, message, "node event");
        } else {
            tracing::info!(node_name, ?reason, message, "node event");
        }
        // Emitting a real `core/v1 Event` object requires an `Api<Event>`
        // write with an involved-object reference; omitted here since the
        // cluster event recorder itself is an external collaborator (spec
        // §1) and the tracing line above carries the same information for
        // this workspace's own tests and operators.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemonset_pod_detection() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

        let mut pod = Pod::default();
        pod.metadata = ObjectMeta {
            owner_references: Some(vec![OwnerReference {
                kind: "DaemonSet".to_string(),
                name: "ds".to_string(),
                api_version: "apps/v1".to_string(),
                uid: "1".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(KubeNodeClient::is_daemonset_pod(&pod));

        let plain = Pod::default();
        assert!(!KubeNodeClient::is_daemonset_pod(&plain));
    }
}
