//! Agent runtime: registration, task receipt, and the per-task periodic
//! schedulers.

mod collector;

use crate::probes;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use vigil_net::ReliableSocket;
use vigil_net::protocol::{Packet, Payload, RegistrationStatus};
use vigil_net::task::{AgentId, Task, Transport};

pub struct AgentContext {
    pub agent_id: AgentId,
    pub socket: ReliableSocket,
    /// Server's datagram endpoint (registration, tasks, metric reports).
    pub server_datagram: SocketAddr,
    /// Server's stream endpoint (alerts).
    pub server_stream: SocketAddr,
}

/// Sends the registration packet. The outcome arrives later as a
/// RegisterAgentResponse on the inbound channel; false means the server
/// never acknowledged the registration itself.
pub async fn register(ctx: &AgentContext) -> bool {
    info!("registering agent {} with {}", ctx.agent_id, ctx.server_datagram);
    ctx.socket
        .send(Packet::register(ctx.agent_id.clone()), ctx.server_datagram)
        .await
}

/// The agent's packet loop. Exits the process with status 1 on a fatal
/// registration outcome.
pub async fn run(ctx: Arc<AgentContext>, mut inbound: mpsc::Receiver<(Packet, SocketAddr)>) {
    let mut iperf_servers_started = false;

    while let Some((packet, peer)) = inbound.recv().await {
        ctx.socket.acknowledge(&packet, peer).await;

        match packet.payload {
            Payload::RegisterAgentResponse { status } => match status {
                RegistrationStatus::Success => {
                    info!("agent {} registered successfully", ctx.agent_id);
                }
                RegistrationStatus::AlreadyRegistered => {
                    error!("an agent with id {} is already registered", ctx.agent_id);
                    std::process::exit(1);
                }
                RegistrationStatus::InvalidId => {
                    error!(
                        "the server isn't configured to accept agents with id {}",
                        ctx.agent_id
                    );
                    std::process::exit(1);
                }
            },
            Payload::Task { tasks } => {
                info!("received {} task(s)", tasks.len());

                if !iperf_servers_started && needs_iperf_server(&ctx.agent_id, &tasks) {
                    iperf_servers_started = true;
                    tokio::spawn(probes::iperf_server(Transport::Tcp));
                    tokio::spawn(probes::iperf_server(Transport::Udp));
                }

                for task in tasks {
                    tokio::spawn(run_task_periodically(ctx.clone(), task));
                }
            }
            ref other => debug!("ignoring unexpected packet: {:?}", other),
        }
    }
}

/// Whether any task wants this agent on the serving side of an iperf
/// measurement.
fn needs_iperf_server(agent_id: &AgentId, tasks: &[Task]) -> bool {
    tasks.iter().any(|task| {
        task.device(agent_id)
            .is_some_and(|device| device.link_metrics.wants_iperf_server())
    })
}

/// One runner per task: every `frequency` seconds, launch a collector in the
/// background so a slow measurement never delays the next tick.
async fn run_task_periodically(ctx: Arc<AgentContext>, task: Task) {
    info!("scheduling task {} every {}s", task.id, task.frequency);
    let mut ticker = interval(Duration::from_secs(u64::from(task.frequency.max(1))));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tokio::spawn(collector::collect_and_report(ctx.clone(), task.clone()));
    }
}
