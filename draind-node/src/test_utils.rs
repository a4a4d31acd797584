//! An in-memory [`NodeClient`] double, available under the `test-utils`
//! feature (or automatically in `cfg(test)` builds).

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use draind_types::{DrainOptions, EventReason, NodeClient, NodeError, TaintEffect};
use tokio::sync::Mutex;

#[derive(Default, Clone)]
struct NodeState {
    labels: BTreeMap<String, String>,
    taints: BTreeMap<String, (String, TaintEffect)>,
    provider_id: Option<String>,
    ready: bool,
    cordoned: bool,
}

/// In-memory node fleet for exercising the Handler without a live cluster.
#[derive(Default)]
pub struct FakeNodeClient {
    nodes: Mutex<BTreeMap<String, NodeState>>,
    /// Node names that `cordon`/`cordon_and_drain`/`uncordon` have been
    /// called on, in call order, tagged with the operation name.
    pub calls: Mutex<Vec<(String, String)>>,
    /// Node names for which `get_node_labels`/etc. should return `NotFound`.
    pub missing: Mutex<HashSet<String>>,
}

impl FakeNodeClient {
    /// Register a node with the given labels, provider id, and readiness.
    pub async fn add_node(&self, name: &str, labels: &[(&str, &str)], provider_id: Option<&str>, ready: bool) {
        let mut nodes = self.nodes.lock().await;
        nodes.insert(
            name.to_string(),
            NodeState {
                labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                taints: BTreeMap::new(),
                provider_id: provider_id.map(str::to_string),
                ready,
                cordoned: false,
            },
        );
    }

    /// Set a previously-added node's readiness (simulates reboot recovery).
    pub async fn set_ready(&self, name: &str, ready: bool) {
        if let Some(state) = self.nodes.lock().await.get_mut(name) {
            state.ready = ready;
        }
    }

    /// Whether `cordon_and_drain` (not just `cordon`) was called for `name`.
    pub async fn was_drained(&self, name: &str) -> bool {
        self.calls.lock().await.iter().any(|(n, op)| n == name && op == "cordon_and_drain")
    }

    async fn get(&self, node_name: &str) -> Result<NodeState, NodeError> {
        if self.missing.lock().await.contains(node_name) {
            return Err(NodeError::NotFound(node_name.to_string()));
        }
        self.nodes
            .lock()
            .await
            .get(node_name)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(node_name.to_string()))
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn get_node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>, NodeError> {
        Ok(self.get(node_name).await?.labels)
    }

    async fn list_pod_names_on_node(&self, _node_name: &str) -> Result<Vec<String>, NodeError> {
        Ok(Vec::new())
    }

    async fn node_name_from_provider_id(&self, provider_id: &str) -> Result<Option<String>, NodeError> {
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .iter()
            .find(|(_, s)| s.provider_id.as_deref().is_some_and(|p| p.contains(provider_id)))
            .map(|(name, _)| name.clone()))
    }

    async fn node_name_by_label(&self, key: &str, value: &str) -> Result<Option<String>, NodeError> {
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .iter()
            .find(|(_, s)| s.labels.get(key).map(String::as_str) == Some(value))
            .map(|(name, _)| name.clone()))
    }

    async fn is_node_ready(&self, node_name: &str) -> Result<bool, NodeError> {
        match self.get(node_name).await {
            Ok(state) => Ok(state.ready),
            Err(NodeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cordon(&self, node_name: &str, _reason: &str) -> Result<(), NodeError> {
        self.calls.lock().await.push((node_name.to_string(), "cordon".to_string()));
        if let Some(state) = self.nodes.lock().await.get_mut(node_name) {
            state.cordoned = true;
        }
        Ok(())
    }

    async fn cordon_and_drain(&self, node_name: &str, reason: &str, _opts: &DrainOptions) -> Result<(), NodeError> {
        self.cordon(node_name, reason).await?;
        self.calls.lock().await.push((node_name.to_string(), "cordon_and_drain".to_string()));
        Ok(())
    }

    async fn uncordon(&self, node_name: &str) -> Result<(), NodeError> {
        self.calls.lock().await.push((node_name.to_string(), "uncordon".to_string()));
        if let Some(state) = self.nodes.lock().await.get_mut(node_name) {
            state.cordoned = false;
        }
        Ok(())
    }

    async fn add_label(&self, node_name: &str, key: &str, value: &str) -> Result<(), NodeError> {
        let mut nodes = self.nodes.lock().await;
        let state = nodes.get_mut(node_name).ok_or_else(|| NodeError::NotFound(node_name.to_string()))?;
        state.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_label(&self, node_name: &str, key: &str) -> Result<(), NodeError> {
        if let Some(state) = self.nodes.lock().await.get_mut(node_name) {
            state.labels.remove(key);
        }
        Ok(())
    }

    async fn add_taint(&self, node_name: &str, key: &str, value: &str, effect: TaintEffect) -> Result<(), NodeError> {
        let mut nodes = self.nodes.lock().await;
        let state = nodes.get_mut(node_name).ok_or_else(|| NodeError::NotFound(node_name.to_string()))?;
        state.taints.insert(key.to_string(), (value.to_string(), effect));
        Ok(())
    }

    async fn remove_taint(&self, node_name: &str, key: &str) -> Result<(), NodeError> {
        if let Some(state) = self.nodes.lock().await.get_mut(node_name) {
            state.taints.remove(key);
        }
        Ok(())
    }

    async fn taint_out_of_service(&self, node_name: &str) -> Result<(), NodeError> {
        self.add_taint(node_name, "node.kubernetes.io/out-of-service", "nodeshutdown", TaintEffect::NoExecute)
            .await
    }

    async fn record_event(&self, node_name: &str, reason: EventReason, message: &str) {
        self.calls.lock().await.push((node_name.to_string(), format!("event:{reason:?}:{message}")));
    }
}
