//! Measurement task data model.
//!
//! These types are shared by the task wire codec and the server's JSON task
//! file loader; the serde field names match the JSON keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Width of an agent id field on the wire.
pub const AGENT_ID_WIDTH: usize = 5;
/// Width of a task id field on the wire.
pub const TASK_ID_WIDTH: usize = 10;

#[derive(Error, Debug)]
#[error("invalid id '{0}': ids are non-empty ASCII, at most the wire field width")]
pub struct InvalidId(pub String);

/// Identifier of an agent (a monitored device). At most 5 ASCII characters;
/// right-padded with spaces on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
        let id = id.into();
        let trimmed = id.trim_end();
        if trimmed.is_empty() || trimmed.len() > AGENT_ID_WIDTH || !trimmed.is_ascii() {
            return Err(InvalidId(id));
        }
        Ok(AgentId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a task. At most 10 ASCII characters; right-padded with
/// spaces on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
        let id = id.into();
        let trimmed = id.trim_end();
        if trimmed.is_empty() || trimmed.len() > TASK_ID_WIDTH || !trimmed.is_ascii() {
            return Err(InvalidId(id));
        }
        Ok(TaskId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scheduled measurement plan referencing one or more devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    /// Run interval in seconds.
    pub frequency: u32,
    pub devices: Vec<DeviceSpec>,
}

impl Task {
    /// The device entry for a given agent, if this task references it.
    pub fn device(&self, id: &AgentId) -> Option<&DeviceSpec> {
        self.devices.iter().find(|d| &d.device_id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub device_id: AgentId,
    pub device_metrics: DeviceMetricsSpec,
    pub link_metrics: LinkMetricsSpec,
}

/// Which host conditions to sample on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetricsSpec {
    pub cpu_usage: bool,
    pub ram_usage: bool,
    #[serde(default)]
    pub interface_stats: Vec<String>,
}

/// Per-link measurement configuration. Each sub-spec is optional and
/// present-flag tagged on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkMetricsSpec {
    #[serde(default)]
    pub bandwidth: Option<ThroughputSpec>,
    #[serde(default)]
    pub jitter: Option<ThroughputSpec>,
    #[serde(default)]
    pub packet_loss: Option<ThroughputSpec>,
    #[serde(default)]
    pub latency: Option<LatencySpec>,
    #[serde(default)]
    pub alertflow_conditions: Option<AlertConditions>,
}

impl LinkMetricsSpec {
    /// Whether any configured metric needs this device to run an iperf
    /// server.
    pub fn wants_iperf_server(&self) -> bool {
        [&self.bandwidth, &self.jitter, &self.packet_loss]
            .into_iter()
            .flatten()
            .any(|m| m.tool == "iperf" && m.is_server)
    }
}

/// Configuration shared by the bandwidth, jitter and packet-loss metrics
/// (all driven by iperf between a client and a server device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSpec {
    pub tool: String,
    pub is_server: bool,
    pub server_address: String,
    /// Measurement duration in seconds.
    pub duration: u32,
    pub transport: Transport,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Transport::Tcp),
            "udp" => Some(Transport::Udp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySpec {
    pub tool: String,
    pub destination_address: String,
    pub packet_count: u32,
    pub frequency: u32,
}

/// Upper thresholds; an alert fires when the current-tick value is strictly
/// greater than the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConditions {
    pub cpu_usage: u32,
    pub ram_usage: u32,
    pub interface_stats: u32,
    pub packet_loss: u32,
    pub jitter: u32,
}
