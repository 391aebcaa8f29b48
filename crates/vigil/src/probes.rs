//! Measurement probes: thin adapters around the `ping` and `iperf` command
//! line tools. The stdout parsers are separate pure functions so tests can
//! feed canned tool transcripts. Probes never fail the caller; a failed
//! measurement is an absent value plus an error string.

use log::{error, info};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use vigil_net::task::Transport;

static PING_LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)% packet loss").unwrap());
static PING_RTT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"min/avg/max/mdev = [\d.]+/([\d.]+)/[\d.]+/[\d.]+ ms").unwrap());
static IPERF_BANDWIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+) (\w+)/sec").unwrap());
static IPERF_JITTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([\d.]+) ms").unwrap());
static IPERF_LOSS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").unwrap());

/// iperf client attempts before giving up.
const IPERF_ATTEMPTS: u32 = 4;
const IPERF_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PingOutcome {
    /// Percent of lost packets.
    pub packet_loss: Option<f32>,
    /// Average round-trip time in milliseconds.
    pub latency_ms: Option<f32>,
    pub error: Option<String>,
}

/// Runs `ping -c <count> -i <interval> <destination>`.
pub async fn ping(destination: &str, packet_count: u32, interval_secs: u32) -> PingOutcome {
    let output = Command::new("ping")
        .arg("-c")
        .arg(packet_count.to_string())
        .arg("-i")
        .arg(interval_secs.to_string())
        .arg(destination)
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            error!("failed to execute ping: {}", e);
            return PingOutcome {
                error: Some(format!("failed to execute ping command: {}", e)),
                ..PingOutcome::default()
            };
        }
    };

    if !output.status.success() {
        return PingOutcome {
            error: Some(format!(
                "ping command failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )),
            ..PingOutcome::default()
        };
    }

    parse_ping(&String::from_utf8_lossy(&output.stdout))
}

pub(crate) fn parse_ping(output: &str) -> PingOutcome {
    let packet_loss = PING_LOSS_RE
        .captures(output)
        .and_then(|captures| captures[1].parse::<f32>().ok());
    let latency_ms = PING_RTT_RE
        .captures(output)
        .and_then(|captures| captures[1].parse::<f32>().ok());

    let error = if packet_loss.is_none() || latency_ms.is_none() {
        Some(format!("failed to parse ping output: {}", output))
    } else {
        None
    };

    PingOutcome {
        packet_loss,
        latency_ms,
        error,
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IperfOutcome {
    /// Normalized to Mbit/s.
    pub bandwidth_mbits: Option<f32>,
    pub jitter_ms: Option<f32>,
    pub packet_loss: Option<f32>,
    pub error: Option<String>,
}

/// Runs the iperf client against `server_address`, retrying up to four
/// times with a one second pause between attempts.
pub async fn iperf_client(
    server_address: &str,
    duration_secs: u32,
    transport: Transport,
) -> IperfOutcome {
    if server_address.is_empty() {
        return IperfOutcome {
            error: Some("server address is required for client mode".to_string()),
            ..IperfOutcome::default()
        };
    }

    for attempt in 1..=IPERF_ATTEMPTS {
        let mut command = Command::new("iperf");
        command
            .arg("-c")
            .arg(server_address)
            .arg("-t")
            .arg(duration_secs.to_string());
        if transport == Transport::Udp {
            command.arg("-u");
        }

        match command.output().await {
            Ok(output) if output.status.success() => {
                return parse_iperf(&String::from_utf8_lossy(&output.stdout), transport);
            }
            Ok(_) | Err(_) => {
                if attempt < IPERF_ATTEMPTS {
                    tokio::time::sleep(IPERF_BACKOFF).await;
                }
            }
        }
    }

    IperfOutcome {
        error: Some(format!(
            "iperf command failed after {} attempts",
            IPERF_ATTEMPTS
        )),
        ..IperfOutcome::default()
    }
}

/// Starts a long-lived iperf server child. It runs until the agent process
/// exits.
pub async fn iperf_server(transport: Transport) {
    let mut command = Command::new("iperf");
    command.arg("-s").arg("-i").arg("1");
    if transport == Transport::Udp {
        command.arg("-u");
    }

    info!("starting {} iperf server", transport.as_str());
    match command.spawn() {
        Ok(mut child) => {
            if let Err(e) = child.wait().await {
                error!("iperf {} server exited abnormally: {}", transport.as_str(), e);
            }
        }
        Err(e) => error!("failed to start iperf server: {}", e),
    }
}

pub(crate) fn parse_iperf(output: &str, transport: Transport) -> IperfOutcome {
    let mut outcome = IperfOutcome::default();

    if transport == Transport::Udp {
        outcome.jitter_ms = IPERF_JITTER_RE
            .captures(output)
            .and_then(|captures| captures[1].parse::<f32>().ok());
        outcome.packet_loss = IPERF_LOSS_RE
            .captures(output)
            .and_then(|captures| captures[1].parse::<f32>().ok());
    }

    outcome.bandwidth_mbits = IPERF_BANDWIDTH_RE.captures(output).and_then(|captures| {
        let magnitude = captures[1].parse::<f32>().ok()?;
        normalize_bandwidth(magnitude, &captures[2])
    });

    outcome
}

/// Converts an iperf rate to Mbit/s.
fn normalize_bandwidth(magnitude: f32, unit: &str) -> Option<f32> {
    match unit {
        "bits" => Some(magnitude / 1_000_000.0),
        "Kbits" => Some(magnitude / 1_000.0),
        "Mbits" => Some(magnitude),
        "Gbits" => Some(magnitude * 1_000.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUTPUT: &str = "\
PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.
64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=5.01 ms
64 bytes from 10.0.0.2: icmp_seq=2 ttl=64 time=4.99 ms

--- 10.0.0.2 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 4.912/5.000/5.113/0.071 ms
";

    const IPERF_TCP_OUTPUT: &str = "\
------------------------------------------------------------
Client connecting to 10.0.0.2, TCP port 5001
------------------------------------------------------------
[  3] local 10.0.0.1 port 49873 connected with 10.0.0.2 port 5001
[ ID] Interval       Transfer     Bandwidth
[  3]  0.0-10.0 sec   112 MBytes  93.4 Mbits/sec
";

    const IPERF_UDP_OUTPUT: &str = "\
------------------------------------------------------------
Client connecting to 10.0.0.2, UDP port 5001
------------------------------------------------------------
[  3] local 10.0.0.1 port 51515 connected with 10.0.0.2 port 5001
[ ID] Interval       Transfer     Bandwidth        Jitter   Lost/Total Datagrams
[  3]  0.0-10.0 sec  1.25 MBytes  1.05 Mbits/sec   0.031 ms    2/  893 (2%)
";

    #[test]
    fn ping_output_parses_loss_and_latency() {
        let outcome = parse_ping(PING_OUTPUT);
        assert_eq!(outcome.packet_loss, Some(0.0));
        assert_eq!(outcome.latency_ms, Some(5.0));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn unparsable_ping_output_reports_an_error() {
        let outcome = parse_ping("ping: unknown host");
        assert!(outcome.packet_loss.is_none());
        assert!(outcome.latency_ms.is_none());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn tcp_iperf_yields_only_bandwidth() {
        let outcome = parse_iperf(IPERF_TCP_OUTPUT, Transport::Tcp);
        assert_eq!(outcome.bandwidth_mbits, Some(93.4));
        assert!(outcome.jitter_ms.is_none());
        assert!(outcome.packet_loss.is_none());
    }

    #[test]
    fn udp_iperf_yields_jitter_and_loss_too() {
        let outcome = parse_iperf(IPERF_UDP_OUTPUT, Transport::Udp);
        assert_eq!(outcome.bandwidth_mbits, Some(1.05));
        assert_eq!(outcome.jitter_ms, Some(0.031));
        assert_eq!(outcome.packet_loss, Some(2.0));
    }

    #[test]
    fn bandwidth_units_normalize_to_mbits() {
        assert_eq!(normalize_bandwidth(500.0, "Kbits"), Some(0.5));
        assert_eq!(normalize_bandwidth(1.5, "Gbits"), Some(1500.0));
        assert_eq!(normalize_bandwidth(2_000_000.0, "bits"), Some(2.0));
        assert_eq!(normalize_bandwidth(3.0, "parsecs"), None);
    }
}
