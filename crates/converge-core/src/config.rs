//! converge.toml configuration parser.
//!
//! ```toml
//! [controller]
//! tick_interval = "15s"
//! sampling_interval = "15s"
//! metrics_timeout = "60s"
//!
//! [[workload]]
//! name = "web"
//! min_replicas = 2
//! max_replicas = 10
//! target_utilization_percent = 60
//! image = "registry.local/web:1.4.0"
//! max_surge = "25%"
//! max_unavailable = 1
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::quantity::IntOrPercent;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConvergeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub workload: Vec<WorkloadConfig>,
}

/// The `[controller]` table. Durations stay as strings until
/// [`ControllerConfig::settings`] interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: String,
    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout: String,
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_tick_interval() -> String {
    "15s".to_string()
}

fn default_sampling_interval() -> String {
    "15s".to_string()
}

fn default_metrics_timeout() -> String {
    "60s".to_string()
}

fn default_call_timeout() -> String {
    "3s".to_string()
}

fn default_degraded_threshold() -> u32 {
    5
}

fn default_api_port() -> u16 {
    8480
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            sampling_interval: default_sampling_interval(),
            metrics_timeout: default_metrics_timeout(),
            call_timeout: default_call_timeout(),
            degraded_threshold: default_degraded_threshold(),
            api_port: default_api_port(),
        }
    }
}

/// Typed controller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Period of one reconciliation tick per workload.
    pub tick_interval: Duration,
    /// Expected spacing of metric samples; freshness window is twice this.
    pub sampling_interval: Duration,
    /// How long a workload may go without any metric sample before its
    /// observed samples are dropped.
    pub metrics_timeout: Duration,
    /// Deadline for a single backend call.
    pub call_timeout: Duration,
    /// Consecutive failed ticks before a workload reports `Degraded`.
    pub degraded_threshold: u32,
    pub api_port: u16,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            sampling_interval: Duration::from_secs(15),
            metrics_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(3),
            degraded_threshold: 5,
            api_port: 8480,
        }
    }
}

impl ControllerConfig {
    pub fn settings(&self) -> ConfigResult<ControllerSettings> {
        let tick_interval = parse_duration(&self.tick_interval)?;
        let sampling_interval = parse_duration(&self.sampling_interval)?;
        if tick_interval.is_zero() {
            return Err(invalid("controller.tick_interval", "must be greater than zero"));
        }
        if sampling_interval.is_zero() {
            return Err(invalid("controller.sampling_interval", "must be greater than zero"));
        }
        if self.degraded_threshold == 0 {
            return Err(invalid("controller.degraded_threshold", "must be at least 1"));
        }
        Ok(ControllerSettings {
            tick_interval,
            sampling_interval,
            metrics_timeout: parse_duration(&self.metrics_timeout)?,
            call_timeout: parse_duration(&self.call_timeout)?,
            degraded_threshold: self.degraded_threshold,
            api_port: self.api_port,
        })
    }
}

/// One `[[workload]]` entry. Optional fields fall back to the defaults of
/// the workload model when converted into a spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    pub min_replicas: Option<u32>,
    pub max_replicas: u32,
    pub target_utilization_percent: u32,
    /// Pinned replica count; overrides the autoscaler.
    pub replicas: Option<u32>,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub max_surge: Option<IntOrPercent>,
    pub max_unavailable: Option<IntOrPercent>,
    pub behavior: Option<BehaviorConfig>,
    pub rollout: Option<RolloutConfig>,
    pub simulate: Option<SimulateConfig>,
}

/// Autoscaler rate limits and stabilization windows.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BehaviorConfig {
    pub scale_up_percent: Option<u32>,
    pub scale_up_min_step: Option<u32>,
    pub scale_down_percent: Option<u32>,
    pub scale_up_stabilization: Option<String>,
    pub scale_down_stabilization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolloutConfig {
    pub unhealthy_threshold: Option<u32>,
    pub readiness_grace: Option<String>,
    pub auto_rollback: Option<bool>,
}

/// Knobs for the simulated cluster used by `convergd run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    #[serde(default = "default_sim_utilization")]
    pub utilization: f64,
    pub ready_delay: Option<String>,
}

fn default_sim_utilization() -> f64 {
    50.0
}

impl ConvergeConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: ConvergeConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| invalid("config", &e.to_string()))
    }

    /// Scaffold a config with a single autoscaled workload.
    pub fn scaffold(name: &str, image: &str) -> Self {
        ConvergeConfig {
            controller: ControllerConfig::default(),
            workload: vec![WorkloadConfig {
                name: name.to_string(),
                min_replicas: Some(2),
                max_replicas: 10,
                target_utilization_percent: 60,
                replicas: None,
                image: image.to_string(),
                env: BTreeMap::new(),
                max_surge: Some(IntOrPercent::Percent(25)),
                max_unavailable: Some(IntOrPercent::Int(1)),
                behavior: None,
                rollout: None,
                simulate: None,
            }],
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
