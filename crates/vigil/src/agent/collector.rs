//! One-shot measurement collector: runs the configured probes for a single
//! task tick, reports the metrics to the server and evaluates the alert
//! thresholds.

use super::AgentContext;
use crate::conditions::{self, Conditions};
use crate::{alerts, probes};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use vigil_net::protocol::{AlertKind, AlertMessage, MetricsReport, Packet};
use vigil_net::task::{AgentId, AlertConditions, LinkMetricsSpec, Task, TaskId, Transport};

#[derive(Debug, Clone, PartialEq, Default)]
pub(super) struct LinkResults {
    pub bandwidth: Option<f32>,
    pub jitter: Option<f32>,
    pub loss: Option<f32>,
    pub latency: Option<f32>,
}

impl LinkResults {
    fn is_empty(&self) -> bool {
        self.bandwidth.is_none()
            && self.jitter.is_none()
            && self.loss.is_none()
            && self.latency.is_none()
    }
}

pub(super) async fn collect_and_report(ctx: Arc<AgentContext>, task: Task) {
    let Some(device) = task.device(&ctx.agent_id) else {
        warn!("task {} does not reference this agent", task.id);
        return;
    };

    let link = measure_link(&device.link_metrics).await;
    if link.is_empty() {
        debug!("task {}: no link metric produced a value, skipping tick", task.id);
        return;
    }

    let host = conditions::sample(&device.device_metrics).await;
    let now = unix_now();

    let report = MetricsReport {
        task_id: task.id.clone(),
        device_id: ctx.agent_id.clone(),
        bandwidth: link.bandwidth,
        jitter: link.jitter,
        loss: link.loss,
        latency: link.latency,
        timestamp: now as u32,
    };
    if !ctx
        .socket
        .send(Packet::metrics(report), ctx.server_datagram)
        .await
    {
        error!("metric report for task {} was not delivered", task.id);
    }

    if let Some(thresholds) = &device.link_metrics.alertflow_conditions {
        let alerts =
            evaluate_conditions(&task.id, &ctx.agent_id, thresholds, &link, &host, now);
        for alert in alerts {
            if let Err(e) = alerts::send_alert(ctx.server_stream, &alert).await {
                error!("error sending {} alert: {}", alert.kind.name(), e);
            }
        }
    }
}

/// Runs the probes this agent is the client side of. A spec whose
/// `is_server` flag is set is someone else's measurement target; latency has
/// no server side at all.
async fn measure_link(spec: &LinkMetricsSpec) -> LinkResults {
    let mut results = LinkResults::default();

    if let Some(bandwidth) = &spec.bandwidth {
        if bandwidth.tool != "iperf" {
            error!("{} tool is not supported for bandwidth", bandwidth.tool);
        } else if !bandwidth.is_server {
            let outcome = probes::iperf_client(
                &bandwidth.server_address,
                bandwidth.duration,
                bandwidth.transport,
            )
            .await;
            if let Some(error) = outcome.error {
                error!("bandwidth probe failed: {}", error);
            }
            results.bandwidth = outcome.bandwidth_mbits;
        }
    }

    if let Some(jitter) = &spec.jitter {
        if jitter.tool != "iperf" {
            error!("{} tool is not supported for jitter", jitter.tool);
        } else if jitter.transport == Transport::Tcp {
            error!("jitter is only supported for UDP");
        } else if !jitter.is_server {
            let outcome =
                probes::iperf_client(&jitter.server_address, jitter.duration, jitter.transport)
                    .await;
            if let Some(error) = outcome.error {
                error!("jitter probe failed: {}", error);
            }
            results.jitter = outcome.jitter_ms;
        }
    }

    if let Some(loss) = &spec.packet_loss {
        if loss.tool != "iperf" {
            error!("{} tool is not supported for packet loss", loss.tool);
        } else if !loss.is_server {
            let outcome =
                probes::iperf_client(&loss.server_address, loss.duration, loss.transport).await;
            if let Some(error) = outcome.error {
                error!("packet loss probe failed: {}", error);
            }
            results.loss = outcome.packet_loss;
        }
    }

    if let Some(latency) = &spec.latency {
        if latency.tool != "ping" {
            error!("{} tool is not supported for latency", latency.tool);
        } else {
            let outcome = probes::ping(
                &latency.destination_address,
                latency.packet_count,
                latency.frequency,
            )
            .await;
            if let Some(error) = outcome.error {
                error!("latency probe failed: {}", error);
            }
            results.latency = outcome.latency_ms;
        }
    }

    results
}

/// One alert per violated condition; strictly greater than the threshold,
/// current-tick values only.
fn evaluate_conditions(
    task_id: &TaskId,
    device_id: &AgentId,
    thresholds: &AlertConditions,
    link: &LinkResults,
    host: &Conditions,
    timestamp: u64,
) -> Vec<AlertMessage> {
    let mut alerts = Vec::new();
    let mut push = |kind: AlertKind, details: String| {
        alerts.push(AlertMessage {
            task_id: task_id.clone(),
            device_id: device_id.clone(),
            kind,
            details,
            timestamp,
        });
    };

    if let Some(cpu) = host.cpu_percent {
        if cpu > thresholds.cpu_usage as f32 {
            push(
                AlertKind::HighCpuUsage,
                format!("cpu usage {:.1}% above threshold {}%", cpu, thresholds.cpu_usage),
            );
        }
    }

    if let Some(ram) = host.ram_percent {
        if ram > thresholds.ram_usage as f32 {
            push(
                AlertKind::HighRamUsage,
                format!("ram usage {:.1}% above threshold {}%", ram, thresholds.ram_usage),
            );
        }
    }

    if let Some(packets) = host.interface_packets {
        if packets > u64::from(thresholds.interface_stats) {
            push(
                AlertKind::HighInterfaceStats,
                format!(
                    "interface packet count {} above threshold {}",
                    packets, thresholds.interface_stats
                ),
            );
        }
    }

    if let Some(loss) = link.loss {
        if loss > thresholds.packet_loss as f32 {
            push(
                AlertKind::HighPacketLoss,
                format!(
                    "packet loss {:.1}% above threshold {}%",
                    loss, thresholds.packet_loss
                ),
            );
        }
    }

    if let Some(jitter) = link.jitter {
        if jitter > thresholds.jitter as f32 {
            push(
                AlertKind::HighJitter,
                format!(
                    "jitter {:.3}ms above threshold {}ms",
                    jitter, thresholds.jitter
                ),
            );
        }
    }

    alerts
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AlertConditions {
        AlertConditions {
            cpu_usage: 50,
            ram_usage: 50,
            interface_stats: 1000,
            packet_loss: 5,
            jitter: 10,
        }
    }

    fn ids() -> (TaskId, AgentId) {
        (TaskId::new("T0001").unwrap(), AgentId::new("AG001").unwrap())
    }

    #[test]
    fn each_violated_condition_yields_one_alert() {
        let (task_id, device_id) = ids();
        let link = LinkResults {
            loss: Some(10.0),
            jitter: Some(3.0),
            ..LinkResults::default()
        };
        let host = Conditions {
            cpu_percent: Some(60.0),
            ram_percent: Some(40.0),
            interface_packets: Some(500),
        };

        let alerts = evaluate_conditions(&task_id, &device_id, &thresholds(), &link, &host, 1);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(alerts.len(), 2);
        assert!(kinds.contains(&AlertKind::HighCpuUsage));
        assert!(kinds.contains(&AlertKind::HighPacketLoss));
    }

    #[test]
    fn thresholds_are_strictly_greater_than() {
        let (task_id, device_id) = ids();
        let link = LinkResults {
            loss: Some(5.0),
            jitter: Some(10.0),
            ..LinkResults::default()
        };
        let host = Conditions {
            cpu_percent: Some(50.0),
            ram_percent: Some(50.0),
            interface_packets: Some(1000),
        };

        let alerts = evaluate_conditions(&task_id, &device_id, &thresholds(), &link, &host, 1);
        assert!(alerts.is_empty());
    }

    #[test]
    fn unmeasured_values_never_alert() {
        let (task_id, device_id) = ids();
        let alerts = evaluate_conditions(
            &task_id,
            &device_id,
            &thresholds(),
            &LinkResults::default(),
            &Conditions::default(),
            1,
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn alert_details_name_the_violation() {
        let (task_id, device_id) = ids();
        let link = LinkResults {
            jitter: Some(12.5),
            ..LinkResults::default()
        };
        let alerts = evaluate_conditions(
            &task_id,
            &device_id,
            &thresholds(),
            &link,
            &Conditions::default(),
            7,
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighJitter);
        assert_eq!(alerts[0].timestamp, 7);
        assert!(alerts[0].details.contains("12.5"));
    }
}
