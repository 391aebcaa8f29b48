//! Server controller: registration barrier, task dispatch, and metric
//! intake on the datagram channel.

use crate::registry::AgentRegistry;
use crate::store::MetricsStore;
use crate::tasks;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use vigil_net::ReliableSocket;
use vigil_net::protocol::{MetricsReport, Packet, Payload, RegistrationStatus};
use vigil_net::task::{AgentId, Task};

pub struct Controller {
    socket: ReliableSocket,
    registry: AgentRegistry,
    store: Arc<MetricsStore>,
    tasks: Vec<Task>,
    /// Every device id any task references; registrations outside this set
    /// are answered with InvalidID.
    known_agents: HashSet<AgentId>,
    /// Shrinks as agents register; tasks are dispatched when it empties.
    required: Mutex<HashSet<AgentId>>,
    all_present: Notify,
}

impl Controller {
    pub fn new(socket: ReliableSocket, store: Arc<MetricsStore>, tasks: Vec<Task>) -> Arc<Self> {
        let known_agents = tasks::required_agents(&tasks);
        info!(
            "waiting for {} agent(s) before dispatching tasks",
            known_agents.len()
        );
        Arc::new(Controller {
            socket,
            registry: AgentRegistry::new(),
            store,
            known_agents: known_agents.clone(),
            required: Mutex::new(known_agents),
            all_present: Notify::new(),
            tasks,
        })
    }

    /// Datagram ingress: acknowledge, then dispatch concurrently so a slow
    /// handler never stalls the channel.
    pub async fn run_ingress(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<(Packet, SocketAddr)>,
    ) {
        while let Some((packet, peer)) = inbound.recv().await {
            self.socket.acknowledge(&packet, peer).await;
            let controller = self.clone();
            tokio::spawn(async move {
                controller.dispatch(packet, peer).await;
            });
        }
    }

    async fn dispatch(&self, packet: Packet, peer: SocketAddr) {
        match packet.payload {
            Payload::RegisterAgent { agent_id } => self.handle_register(agent_id, peer).await,
            Payload::Metrics(report) => self.handle_metrics(report, peer),
            ref other => debug!("ignoring unexpected packet from {}: {:?}", peer, other),
        }
    }

    async fn handle_register(&self, agent_id: AgentId, peer: SocketAddr) {
        let status = if !self.known_agents.contains(&agent_id) {
            warn!("rejecting unknown agent id {} from {}", agent_id, peer);
            RegistrationStatus::InvalidId
        } else if self.registry.register(agent_id.clone(), peer) {
            info!("Agent {} registered from {}", agent_id, peer);
            let remaining = {
                let mut required = self.required.lock().unwrap();
                required.remove(&agent_id);
                required.len()
            };
            if remaining == 0 {
                self.all_present.notify_waiters();
            } else {
                info!("{} required agent(s) still missing", remaining);
            }
            RegistrationStatus::Success
        } else {
            warn!("agent {} is already registered", agent_id);
            RegistrationStatus::AlreadyRegistered
        };

        if !self
            .socket
            .send(Packet::register_response(status), peer)
            .await
        {
            error!("registration response to {} was not delivered", peer);
        }
    }

    fn handle_metrics(&self, report: MetricsReport, peer: SocketAddr) {
        if !self.registry.contains(&report.device_id) {
            warn!(
                "dropping metrics from unregistered device {} ({})",
                report.device_id, peer
            );
            return;
        }

        info!(
            "metrics from {} for task {}: bandwidth={:?} jitter={:?} loss={:?} latency={:?}",
            report.device_id,
            report.task_id,
            report.bandwidth,
            report.jitter,
            report.loss,
            report.latency
        );
        if let Err(e) = self.store.insert_metrics(&report) {
            error!("failed to persist metrics: {}", e);
        }
    }

    /// Blocks until every required agent has registered.
    pub async fn wait_for_agents(&self) {
        loop {
            let notified = self.all_present.notified();
            if self.required.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Sends each registered agent the tasks that reference it. A delivery
    /// the transport gives up on is logged and not redelivered.
    pub async fn dispatch_tasks(&self) {
        for (device_id, tasks) in tasks::tasks_by_device(&self.tasks) {
            let Some(address) = self.registry.address_of(&device_id) else {
                warn!("no address for agent {}, skipping dispatch", device_id);
                continue;
            };
            let count = tasks.len();
            if self.socket.send(Packet::tasks(tasks), address).await {
                info!("{} task(s) sent to agent {}", count, device_id);
            } else {
                error!("task delivery to agent {} failed", device_id);
            }
        }
    }
}
