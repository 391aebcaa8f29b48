//! Reliable datagram transport.
//!
//! One [`ReliableSocket`] per process owns the UDP socket, a global outbound
//! sequence counter, the in-flight table and the per-peer inbound state.
//! Sending blocks until the packet is acknowledged or the retry budget is
//! exhausted; receiving hands packets to the application through a channel,
//! strictly in per-peer sequence order. The application decides when to
//! acknowledge (see [`ReliableSocket::acknowledge`]); the transport only
//! acknowledges what it consumes itself: flow-control packets, duplicates,
//! and packets that failed checksum validation (the sender must stop
//! retrying even though the payload is undeliverable).

mod ordering;

use crate::protocol::{HEADER_LEN, Packet, PacketKind, ProtocolError};
use log::{debug, error, info, warn};
use ordering::{PeerQueue, Slot, next_seq};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::timeout;

/// Largest admissible send window. The in-flight table is keyed by the raw
/// u8 sequence number, so two outstanding packets must never share a value
/// on the 255-slot ring.
const MAX_FLOW_WINDOW: usize = 254;

/// Capacity of the channel handing in-order packets to the application.
const DELIVERY_CAPACITY: usize = 128;

/// How often the reorder horizon is checked.
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long to wait for an acknowledgment before retransmitting.
    pub retransmission_timeout: Duration,
    /// Total transmit attempts per packet.
    pub max_retries: u32,
    /// Maximum un-acked packets outstanding system-wide; also the inbound
    /// queue depth that triggers receiver-side flow control.
    pub flow_window: usize,
    /// How long an out-of-order packet waits on a missing sequence before
    /// the gap is considered dead (a sequence the sender spent on another
    /// peer, or one whose sender gave up).
    pub reorder_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            retransmission_timeout: Duration::from_secs(2),
            max_retries: 3,
            flow_window: 20,
            reorder_timeout: Duration::from_secs(2),
        }
    }
}

struct PeerState {
    queue: PeerQueue,
    /// Our permission to send to this peer, driven by its flow-control
    /// notifications.
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
    /// True once we have told this peer to pause.
    paused_peer: bool,
}

impl PeerState {
    fn new() -> Self {
        let (gate_tx, gate_rx) = watch::channel(true);
        PeerState {
            queue: PeerQueue::new(),
            gate_tx,
            gate_rx,
            paused_peer: false,
        }
    }
}

struct Shared {
    config: TransportConfig,
    /// Last assigned outbound sequence number (one space for all peers).
    last_seq: Mutex<u8>,
    /// Un-acked outbound packets, keyed by sequence number. The stored
    /// notify wakes the sender the moment the matching ack arrives.
    in_flight: Mutex<HashMap<u8, Arc<tokio::sync::Notify>>>,
    peers: Mutex<HashMap<SocketAddr, PeerState>>,
    /// Send-window credit.
    window: Arc<Semaphore>,
}

/// Reliable, in-order, flow-controlled datagram endpoint.
#[derive(Clone)]
pub struct ReliableSocket {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
}

impl ReliableSocket {
    /// Binds the endpoint and starts the receive loop. Returns the socket
    /// handle and the channel on which in-order packets are delivered.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: TransportConfig,
    ) -> io::Result<(Self, mpsc::Receiver<(Packet, SocketAddr)>)> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let window = config.flow_window.min(MAX_FLOW_WINDOW).max(1);

        let shared = Arc::new(Shared {
            config,
            last_seq: Mutex::new(0),
            in_flight: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            window: Arc::new(Semaphore::new(window)),
        });

        let endpoint = ReliableSocket { socket, shared };
        let (deliveries_tx, deliveries_rx) = mpsc::channel(DELIVERY_CAPACITY);

        info!(
            "datagram endpoint bound on {}",
            endpoint.local_addr().map_or("?".to_string(), |a| a.to_string())
        );

        tokio::spawn(endpoint.clone().receive_loop(deliveries_tx.clone()));
        tokio::spawn(endpoint.clone().reorder_sweeper(deliveries_tx));

        Ok((endpoint, deliveries_rx))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends `packet` to `peer` reliably: assigns the next sequence number,
    /// transmits, and retransmits on each ack timeout until the retry budget
    /// runs out. Returns true once the peer acknowledged. Ack packets are
    /// fire-and-forget.
    ///
    /// Suspends while the send window is full or while the peer has flow
    /// control asserted.
    pub async fn send(&self, mut packet: Packet, peer: SocketAddr) -> bool {
        if packet.kind() == PacketKind::Ack {
            return self.transmit_once(&packet, peer).await;
        }

        self.wait_for_peer_gate(peer).await;

        // Window credit is held until the packet leaves the in-flight table,
        // acked or abandoned; releasing it wakes the next blocked sender.
        let _credit = self
            .shared
            .window
            .acquire()
            .await
            .expect("window semaphore never closes");

        packet.seq = self.next_seq();
        let seq = packet.seq;

        let encoded = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode {:?} packet: {}", packet.kind(), e);
                return false;
            }
        };

        let acked = Arc::new(tokio::sync::Notify::new());
        self.shared
            .in_flight
            .lock()
            .unwrap()
            .insert(seq, acked.clone());

        let config = &self.shared.config;
        let mut delivered = false;
        for attempt in 1..=config.max_retries {
            if let Err(e) = self.socket.send_to(&encoded, peer).await {
                error!("transmit of #{} to {} failed: {}", seq, peer, e);
                break;
            }
            debug!(
                "sent {:?} #{} to {} (attempt {}/{})",
                packet.kind(),
                seq,
                peer,
                attempt,
                config.max_retries
            );

            match timeout(config.retransmission_timeout, acked.notified()).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(_) => debug!("no ack for #{} yet, retrying", seq),
            }
        }

        self.shared.in_flight.lock().unwrap().remove(&seq);
        if !delivered {
            error!(
                "gave up on #{} to {} after {} attempts",
                seq, peer, config.max_retries
            );
        }
        delivered
    }

    /// Acknowledges a payload-carrying packet received from `peer`. Called
    /// by the application before it dispatches business logic.
    pub async fn acknowledge(&self, packet: &Packet, peer: SocketAddr) {
        if packet.has_payload() && packet.seq != 0 {
            self.transmit_once(&Packet::ack_of(packet.seq), peer).await;
        }
    }

    /// Serializes and transmits exactly once, no sequencing or retries.
    async fn transmit_once(&self, packet: &Packet, peer: SocketAddr) -> bool {
        let encoded = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode {:?} packet: {}", packet.kind(), e);
                return false;
            }
        };
        match self.socket.send_to(&encoded, peer).await {
            Ok(_) => true,
            Err(e) => {
                error!("transmit to {} failed: {}", peer, e);
                false
            }
        }
    }

    fn next_seq(&self) -> u8 {
        let mut last = self.shared.last_seq.lock().unwrap();
        *last = next_seq(*last);
        *last
    }

    /// Blocks while this peer has flow control asserted against us.
    async fn wait_for_peer_gate(&self, peer: SocketAddr) {
        let mut gate = {
            let mut peers = self.shared.peers.lock().unwrap();
            peers
                .entry(peer)
                .or_insert_with(PeerState::new)
                .gate_rx
                .clone()
        };
        // The sender half lives in the peer table for the process lifetime.
        let _ = gate.wait_for(|can_send| *can_send).await;
    }

    async fn receive_loop(self, deliveries: mpsc::Sender<(Packet, SocketAddr)>) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("datagram receive failed: {}", e);
                    return;
                }
            };
            let data = &buf[..len];

            match Packet::decode(data) {
                Ok(packet) if packet.ack != 0 => self.process_ack(packet.ack),
                Ok(packet) if packet.kind() == PacketKind::Ack => {
                    // An ack that acknowledges nothing.
                    debug!("ignoring empty ack from {}", peer);
                }
                Ok(packet) if packet.kind() == PacketKind::FlowControl => {
                    self.handle_flow_control(packet, peer).await;
                }
                Ok(packet) => self.enqueue(packet, peer, &deliveries).await,
                Err(ProtocolError::BadChecksum) => {
                    // Ack it anyway so the sender stops retrying; the
                    // payload is never delivered.
                    error!("checksum mismatch on datagram from {}", peer);
                    if len >= HEADER_LEN && data[1] != 0 {
                        let seq = data[1];
                        self.mark_consumed(seq, peer);
                        self.transmit_once(&Packet::ack_of(seq), peer).await;
                    }
                }
                Err(e) => error!("dropping undecodable datagram from {}: {}", peer, e),
            }
        }
    }

    /// Wakes the sender waiting on `ack` and retires the in-flight entry.
    fn process_ack(&self, ack: u8) {
        let entry = self.shared.in_flight.lock().unwrap().remove(&ack);
        match entry {
            Some(acked) => {
                debug!("ack received for #{}", ack);
                acked.notify_one();
            }
            None => debug!("ack for unknown or already retired #{}", ack),
        }
    }

    /// A flow-control notification from `peer`: gate our sends accordingly.
    /// Consumed at the transport layer, so the transport also acknowledges
    /// it and fills its sequence slot.
    async fn handle_flow_control(&self, packet: Packet, peer: SocketAddr) {
        let can_send = matches!(
            packet.payload,
            crate::protocol::Payload::FlowControl { can_send: true }
        );
        {
            let mut peers = self.shared.peers.lock().unwrap();
            let state = peers.entry(peer).or_insert_with(PeerState::new);
            state.gate_tx.send_replace(can_send);
            state.queue.insert(packet.seq, Slot::Consumed);
            let _ = state.queue.pop_ready();
        }
        if can_send {
            info!("peer {} resumed our sending", peer);
        } else {
            warn!("peer {} paused our sending", peer);
        }
        self.acknowledge(&packet, peer).await;
    }

    /// Fills a sequence slot for a packet the application will never see.
    fn mark_consumed(&self, seq: u8, peer: SocketAddr) {
        let mut peers = self.shared.peers.lock().unwrap();
        let state = peers.entry(peer).or_insert_with(PeerState::new);
        state.queue.insert(seq, Slot::Consumed);
        let _ = state.queue.pop_ready();
    }

    /// Buffers an inbound payload packet and releases everything that is now
    /// in order. Duplicates are re-acknowledged and dropped.
    async fn enqueue(
        &self,
        packet: Packet,
        peer: SocketAddr,
        deliveries: &mpsc::Sender<(Packet, SocketAddr)>,
    ) {
        let seq = packet.seq;
        let (accepted, ready, signals) = {
            let mut peers = self.shared.peers.lock().unwrap();
            let state = peers.entry(peer).or_insert_with(PeerState::new);

            if !state.queue.insert(seq, Slot::Deliver(packet)) {
                (false, Vec::new(), Vec::new())
            } else {
                let flow_window = self.shared.config.flow_window;
                let mut signals = Vec::new();
                if state.queue.depth() >= flow_window && !state.paused_peer {
                    state.paused_peer = true;
                    signals.push(false);
                }
                let ready = state.queue.pop_ready();
                if state.queue.depth() < flow_window && state.paused_peer {
                    state.paused_peer = false;
                    signals.push(true);
                }
                (true, ready, signals)
            }
        };

        if !accepted {
            if seq != 0 {
                debug!("duplicate #{} from {}, re-acking", seq, peer);
                self.transmit_once(&Packet::ack_of(seq), peer).await;
            }
            return;
        }

        for can_send in signals {
            let endpoint = self.clone();
            tokio::spawn(async move {
                endpoint.send(Packet::flow_control(can_send), peer).await;
            });
        }

        for packet in ready {
            if deliveries.send((packet, peer)).await.is_err() {
                warn!("application dropped the delivery channel");
                return;
            }
        }
    }

    /// Periodically abandons reorder gaps that outlived the horizon, so one
    /// sequence spent on another peer cannot wedge this peer's queue.
    async fn reorder_sweeper(self, deliveries: mpsc::Sender<(Packet, SocketAddr)>) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let horizon = self.shared.config.reorder_timeout;
            let flow_window = self.shared.config.flow_window;
            let mut released = Vec::new();
            let mut resumed = Vec::new();
            {
                let mut peers = self.shared.peers.lock().unwrap();
                for (peer, state) in peers.iter_mut() {
                    if state.queue.stalled_longer_than(horizon) {
                        let ready = state.queue.force_release();
                        if !ready.is_empty() {
                            warn!(
                                "abandoning reorder gap from {}: releasing {} buffered packet(s)",
                                peer,
                                ready.len()
                            );
                            released.extend(ready.into_iter().map(|p| (p, *peer)));
                        }
                        if state.queue.depth() < flow_window && state.paused_peer {
                            state.paused_peer = false;
                            resumed.push(*peer);
                        }
                    }
                }
            }
            for peer in resumed {
                let endpoint = self.clone();
                tokio::spawn(async move {
                    endpoint.send(Packet::flow_control(true), peer).await;
                });
            }
            for delivery in released {
                if deliveries.send(delivery).await.is_err() {
                    return;
                }
            }
        }
    }
}
