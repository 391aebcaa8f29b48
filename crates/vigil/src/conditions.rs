//! Host condition sampling: CPU and RAM utilization via `top`/`free`, and
//! interface packet counters from `/proc/net/dev`. Parsers are pure
//! functions over the tool output.

use log::{error, warn};
use tokio::process::Command;
use vigil_net::task::DeviceMetricsSpec;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conditions {
    pub cpu_percent: Option<f32>,
    pub ram_percent: Option<f32>,
    /// Sum of sent and received packets over the configured interfaces.
    pub interface_packets: Option<u64>,
}

/// Samples the conditions the device spec asks for.
pub async fn sample(spec: &DeviceMetricsSpec) -> Conditions {
    let mut conditions = Conditions::default();
    if spec.cpu_usage {
        conditions.cpu_percent = cpu_usage().await;
    }
    if spec.ram_usage {
        conditions.ram_percent = ram_usage().await;
    }
    if !spec.interface_stats.is_empty() {
        conditions.interface_packets = interface_packets(&spec.interface_stats).await;
    }
    conditions
}

async fn cpu_usage() -> Option<f32> {
    match Command::new("top").arg("-bn1").output().await {
        Ok(output) => parse_top(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            error!("failed to execute top: {}", e);
            None
        }
    }
}

async fn ram_usage() -> Option<f32> {
    match Command::new("free").arg("-m").output().await {
        Ok(output) => parse_free(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            error!("failed to execute free: {}", e);
            None
        }
    }
}

async fn interface_packets(interfaces: &[String]) -> Option<u64> {
    match tokio::fs::read_to_string("/proc/net/dev").await {
        Ok(content) => Some(parse_net_dev(&content, interfaces)),
        Err(e) => {
            error!("failed to read /proc/net/dev: {}", e);
            None
        }
    }
}

/// Extracts total CPU utilization from the `%Cpu(s):` summary line as
/// 100 minus the idle share.
pub(crate) fn parse_top(output: &str) -> Option<f32> {
    let line = output.lines().find(|line| line.contains("Cpu(s)"))?;
    let idle = line
        .split(',')
        .find(|field| field.trim_end().ends_with("id"))?
        .trim()
        .split_whitespace()
        .next()?
        .parse::<f32>()
        .ok()?;
    Some(100.0 - idle)
}

/// Extracts used-memory percentage from the `Mem:` line of `free -m`.
pub(crate) fn parse_free(output: &str) -> Option<f32> {
    let line = output.lines().find(|line| line.starts_with("Mem"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let total = fields.get(1)?.parse::<f32>().ok()?;
    let used = fields.get(2)?.parse::<f32>().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(used / total * 100.0)
}

/// Sums sent and received packet counters over the listed interfaces.
/// Interfaces absent from the table are logged and skipped.
pub(crate) fn parse_net_dev(content: &str, interfaces: &[String]) -> u64 {
    let mut total = 0u64;
    for interface in interfaces {
        let mut found = false;
        for line in content.lines() {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            if name.trim() != interface {
                continue;
            }
            let fields: Vec<&str> = rest.split_whitespace().collect();
            // Field 1 is received packets, field 9 transmitted packets.
            let received = fields.get(1).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            let transmitted = fields.get(9).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            total += received + transmitted;
            found = true;
            break;
        }
        if !found {
            warn!("interface {} not found in network stats", interface);
        }
    }
    total
}
