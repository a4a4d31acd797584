#![deny(missing_docs)]
//! Loading of [`EngineConfig`], the operational surface spec §6 treats as an
//! external collaborator. Hand-rolled `from_env`/`from_path` (`std::env::args`,
//! a JSON file read straight into a `serde`-derived struct) rather than
//! reaching for `clap`.

use std::collections::BTreeSet;
use std::path::Path;

use draind_types::ConfigError;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_node_grace() -> u64 {
    120
}

fn default_pod_grace() -> i64 {
    -1
}

fn default_metadata_tries() -> u32 {
    3
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_until() -> u64 {
    150
}

/// The full operational surface, populated from the environment or a JSON
/// file at startup (spec §6 "Operational surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds subtracted from `StartTime` to form the drain deadline, and
    /// the drain RPC timeout.
    pub node_termination_grace_period: u64,
    /// Per-pod grace seconds; negative means "use pod spec".
    pub pod_termination_grace_period: i64,
    /// Suppresses the drain step; nodes are cordoned only.
    pub cordon_only: bool,
    /// Enable the spot-interruption metadata source.
    pub enable_spot_interruption_draining: bool,
    /// Enable the scheduled-event metadata source.
    pub enable_scheduled_event_draining: bool,
    /// Enable draining from queue-sourced state-change notifications.
    pub enable_sqs_termination_draining: bool,
    /// Enable draining from ASG terminate-lifecycle hooks.
    pub enable_asg_lifecycle_draining: bool,
    /// Enable rebalance-recommendation monitoring (tainting without draining).
    pub enable_rebalance_monitoring: bool,
    /// Enable draining on rebalance-recommendation.
    pub enable_rebalance_draining: bool,
    /// Restrict handling to instances carrying `managed_asg_tag`.
    pub check_asg_tag_before_draining: bool,
    /// The tag key `check_asg_tag_before_draining` requires.
    pub managed_asg_tag: String,
    /// Delete the queue message when its target node is not found.
    pub delete_sqs_msg_if_node_not_found: bool,
    /// Apply the out-of-service taint after a successful drain.
    pub enable_out_of_service_taint: bool,
    /// Resolve the node via provider-id substring match rather than
    /// instance-id label.
    pub use_provider_id: bool,
    /// Width of the Handler's worker pool.
    pub workers: usize,
    /// Seconds between lifecycle heartbeat extensions.
    pub heartbeat_interval_secs: u64,
    /// Total seconds heartbeats may run before giving up.
    pub heartbeat_until_secs: u64,
    /// Metadata poll retry attempts.
    pub metadata_tries: u32,
    /// Event ids seeded into the Store's Ignored Set at startup.
    pub ignored_events: BTreeSet<String>,
    /// Base URL of the instance metadata service.
    pub imds_base_url: String,
    /// Base URL of the interruption message queue endpoint.
    pub queue_base_url: String,
    /// Base URL of the lifecycle-action endpoint.
    pub lifecycle_base_url: String,
    /// Operator-supplied webhook URL. Empty disables the notifier.
    pub webhook_url: String,
    /// Bind address for the `/metrics` + `/healthz` HTTP server.
    pub metrics_bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_termination_grace_period: default_node_grace(),
            pod_termination_grace_period: default_pod_grace(),
            cordon_only: false,
            enable_spot_interruption_draining: default_true(),
            enable_scheduled_event_draining: default_true(),
            enable_sqs_termination_draining: false,
            enable_asg_lifecycle_draining: false,
            enable_rebalance_monitoring: default_true(),
            enable_rebalance_draining: false,
            check_asg_tag_before_draining: false,
            managed_asg_tag: String::new(),
            delete_sqs_msg_if_node_not_found: false,
            enable_out_of_service_taint: false,
            use_provider_id: false,
            workers: default_workers(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_until_secs: default_heartbeat_until(),
            metadata_tries: default_metadata_tries(),
            ignored_events: BTreeSet::new(),
            imds_base_url: "http://169.254.169.254".to_string(),
            queue_base_url: String::new(),
            lifecycle_base_url: String::new(),
            webhook_url: String::new(),
            metrics_bind_addr: "0.0.0.0:9898".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, falling back to defaults for any missing
    /// field.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Invalid { field: "<file>".to_string(), message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `DRAIND_*`-prefixed environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DRAIND_NODE_TERMINATION_GRACE_PERIOD") {
            config.node_termination_grace_period = parse_env("DRAIND_NODE_TERMINATION_GRACE_PERIOD", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_POD_TERMINATION_GRACE_PERIOD") {
            config.pod_termination_grace_period = parse_env("DRAIND_POD_TERMINATION_GRACE_PERIOD", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_CORDON_ONLY") {
            config.cordon_only = parse_bool("DRAIND_CORDON_ONLY", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_SPOT_INTERRUPTION_DRAINING") {
            config.enable_spot_interruption_draining = parse_bool("DRAIND_ENABLE_SPOT_INTERRUPTION_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_SCHEDULED_EVENT_DRAINING") {
            config.enable_scheduled_event_draining = parse_bool("DRAIND_ENABLE_SCHEDULED_EVENT_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_SQS_TERMINATION_DRAINING") {
            config.enable_sqs_termination_draining = parse_bool("DRAIND_ENABLE_SQS_TERMINATION_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_ASG_LIFECYCLE_DRAINING") {
            config.enable_asg_lifecycle_draining = parse_bool("DRAIND_ENABLE_ASG_LIFECYCLE_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_REBALANCE_MONITORING") {
            config.enable_rebalance_monitoring = parse_bool("DRAIND_ENABLE_REBALANCE_MONITORING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_REBALANCE_DRAINING") {
            config.enable_rebalance_draining = parse_bool("DRAIND_ENABLE_REBALANCE_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_CHECK_ASG_TAG_BEFORE_DRAINING") {
            config.check_asg_tag_before_draining = parse_bool("DRAIND_CHECK_ASG_TAG_BEFORE_DRAINING", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_MANAGED_ASG_TAG") {
            config.managed_asg_tag = v;
        }
        if let Ok(v) = std::env::var("DRAIND_DELETE_SQS_MSG_IF_NODE_NOT_FOUND") {
            config.delete_sqs_msg_if_node_not_found = parse_bool("DRAIND_DELETE_SQS_MSG_IF_NODE_NOT_FOUND", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_ENABLE_OUT_OF_SERVICE_TAINT") {
            config.enable_out_of_service_taint = parse_bool("DRAIND_ENABLE_OUT_OF_SERVICE_TAINT", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_USE_PROVIDER_ID") {
            config.use_provider_id = parse_bool("DRAIND_USE_PROVIDER_ID", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_WORKERS") {
            config.workers = parse_env("DRAIND_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval_secs = parse_env("DRAIND_HEARTBEAT_INTERVAL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_HEARTBEAT_UNTIL_SECS") {
            config.heartbeat_until_secs = parse_env("DRAIND_HEARTBEAT_UNTIL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_METADATA_TRIES") {
            config.metadata_tries = parse_env("DRAIND_METADATA_TRIES", &v)?;
        }
        if let Ok(v) = std::env::var("DRAIND_IGNORED_EVENTS") {
            config.ignored_events = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("DRAIND_IMDS_BASE_URL") {
            config.imds_base_url = v;
        }
        if let Ok(v) = std::env::var("DRAIND_QUEUE_BASE_URL") {
            config.queue_base_url = v;
        }
        if let Ok(v) = std::env::var("DRAIND_LIFECYCLE_BASE_URL") {
            config.lifecycle_base_url = v;
        }
        if let Ok(v) = std::env::var("DRAIND_WEBHOOK_URL") {
            config.webhook_url = v;
        }
        if let Ok(v) = std::env::var("DRAIND_METRICS_BIND_ADDR") {
            config.metrics_bind_addr = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the engine misbehave at
    /// startup rather than fail confusingly later (spec §7, "Configuration
    /// invalid: fatal at startup").
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.check_asg_tag_before_draining && self.managed_asg_tag.is_empty() {
            return Err(ConfigError::Invalid {
                field: "managed_asg_tag".to_string(),
                message: "required when check_asg_tag_before_draining is set".to_string(),
            });
        }
        if self.enable_sqs_termination_draining || self.enable_asg_lifecycle_draining {
            if self.queue_base_url.is_empty() {
                return Err(ConfigError::Missing("queue_base_url".to_string()));
            }
        }
        if self.enable_asg_lifecycle_draining && self.lifecycle_base_url.is_empty() {
            return Err(ConfigError::Missing("lifecycle_base_url".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field: name.to_string(),
        message: format!("could not parse {value:?}"),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field: name.to_string(),
            message: format!("expected a boolean, got {value:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_is_invalid() {
        let mut config = EngineConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn asg_tag_check_requires_tag_value() {
        let mut config = EngineConfig::default();
        config.check_asg_tag_before_draining = true;
        assert!(config.validate().is_err());
        config.managed_asg_tag = "kubernetes.io/managed".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lifecycle_draining_requires_queue_and_lifecycle_urls() {
        let mut config = EngineConfig::default();
        config.enable_asg_lifecycle_draining = true;
        assert!(config.validate().is_err());
        config.queue_base_url = "http://queue.local".to_string();
        assert!(config.validate().is_err());
        config.lifecycle_base_url = "http://lifecycle.local".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_path_round_trips_a_minimal_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("draind-config-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"workers": 8}"#).unwrap();
        let config = EngineConfig::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.workers, 8);
        assert_eq!(config.node_termination_grace_period, default_node_grace());
    }
}
