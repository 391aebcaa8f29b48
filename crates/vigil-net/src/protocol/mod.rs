//! Typed packet codec for the datagram channel.
//!
//! Every packet is `[kind:u8][seq:u8][ack:u8][payload..]`. `seq == 0` means
//! no sequence number has been assigned; `ack != 0` means the packet
//! acknowledges that sequence. Task and Metrics packets carry a trailing
//! SHA-256 checksum (64 hex characters) over all preceding bytes; the other
//! kinds do not.

mod alert;
mod metrics;
mod task_codec;

pub use alert::{AlertKind, AlertMessage};
pub use metrics::MetricsReport;

use crate::task::{AgentId, Task};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use thiserror::Error;
use vigil_binary::{BinaryError, ByteReader, ByteWriter};

/// Header length shared by all datagram packets.
pub const HEADER_LEN: usize = 3;
/// Length of the hex-encoded SHA-256 checksum trailer.
pub const CHECKSUM_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown packet kind {0}")]
    UnknownPacketKind(u8),

    #[error("packet truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("checksum mismatch")]
    BadChecksum,

    #[error("unknown registration status {0}")]
    UnknownStatus(u8),

    #[error("invalid alert type {0}")]
    InvalidAlertType(u8),

    #[error("unknown transport '{0}'")]
    UnknownTransport(String),

    #[error("malformed packet: {0}")]
    Malformed(BinaryError),
}

impl From<BinaryError> for ProtocolError {
    fn from(err: BinaryError) -> Self {
        match err {
            BinaryError::UnexpectedEof { needed, remaining } => {
                ProtocolError::Truncated { needed, remaining }
            }
            other => ProtocolError::Malformed(other),
        }
    }
}

/// Tag byte of a datagram packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    RegisterAgent = 0,
    RegisterAgentResponse = 1,
    Task = 2,
    Metrics = 3,
    Ack = 4,
    FlowControl = 5,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(PacketKind::RegisterAgent),
            1 => Ok(PacketKind::RegisterAgentResponse),
            2 => Ok(PacketKind::Task),
            3 => Ok(PacketKind::Metrics),
            4 => Ok(PacketKind::Ack),
            5 => Ok(PacketKind::FlowControl),
            other => Err(ProtocolError::UnknownPacketKind(other)),
        }
    }
}

/// Outcome of a registration attempt, carried by RegisterAgentResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegistrationStatus {
    Success = 0,
    AlreadyRegistered = 1,
    InvalidId = 2,
}

impl RegistrationStatus {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(RegistrationStatus::Success),
            1 => Ok(RegistrationStatus::AlreadyRegistered),
            2 => Ok(RegistrationStatus::InvalidId),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    RegisterAgent { agent_id: AgentId },
    RegisterAgentResponse { status: RegistrationStatus },
    Task { tasks: Vec<Task> },
    Metrics(MetricsReport),
    Ack,
    FlowControl { can_send: bool },
}

/// A datagram packet: header plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Sequence number; 0 until the transport assigns one.
    pub seq: u8,
    /// Acknowledged sequence number; 0 when nothing is acknowledged.
    pub ack: u8,
    pub payload: Payload,
}

impl Packet {
    pub fn new(payload: Payload) -> Self {
        Packet {
            seq: 0,
            ack: 0,
            payload,
        }
    }

    pub fn register(agent_id: AgentId) -> Self {
        Packet::new(Payload::RegisterAgent { agent_id })
    }

    pub fn register_response(status: RegistrationStatus) -> Self {
        Packet::new(Payload::RegisterAgentResponse { status })
    }

    pub fn tasks(tasks: Vec<Task>) -> Self {
        Packet::new(Payload::Task { tasks })
    }

    pub fn metrics(report: MetricsReport) -> Self {
        Packet::new(Payload::Metrics(report))
    }

    /// Acknowledgment of `seq`. Ack packets are never themselves
    /// acknowledged or retransmitted.
    pub fn ack_of(seq: u8) -> Self {
        Packet {
            seq,
            ack: seq,
            payload: Payload::Ack,
        }
    }

    pub fn flow_control(can_send: bool) -> Self {
        Packet::new(Payload::FlowControl { can_send })
    }

    pub fn kind(&self) -> PacketKind {
        match self.payload {
            Payload::RegisterAgent { .. } => PacketKind::RegisterAgent,
            Payload::RegisterAgentResponse { .. } => PacketKind::RegisterAgentResponse,
            Payload::Task { .. } => PacketKind::Task,
            Payload::Metrics(_) => PacketKind::Metrics,
            Payload::Ack => PacketKind::Ack,
            Payload::FlowControl { .. } => PacketKind::FlowControl,
        }
    }

    /// Whether this packet carries a payload the peer's application layer
    /// must see (and therefore acknowledge).
    pub fn has_payload(&self) -> bool {
        !matches!(self.payload, Payload::Ack)
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        buf.write_u8(self.kind() as u8)?;
        buf.write_u8(self.seq)?;
        buf.write_u8(self.ack)?;

        match &self.payload {
            Payload::RegisterAgent { agent_id } => {
                buf.write_fixed_str(agent_id.as_str(), crate::task::AGENT_ID_WIDTH)?;
            }
            Payload::RegisterAgentResponse { status } => {
                buf.write_u8(*status as u8)?;
            }
            Payload::Task { tasks } => {
                let count: u8 = tasks.len().try_into().map_err(|_| {
                    ProtocolError::Malformed(BinaryError::InvalidData(
                        "more than 255 tasks in one packet".to_string(),
                    ))
                })?;
                buf.write_u8(count)?;
                for task in tasks {
                    task_codec::write_task(&mut buf, task)?;
                }
                let digest = checksum_hex(&buf);
                buf.write_bytes(digest.as_bytes())?;
            }
            Payload::Metrics(report) => {
                metrics::write_report(&mut buf, report)?;
                let digest = checksum_hex(&buf);
                buf.write_bytes(digest.as_bytes())?;
            }
            Payload::Ack => {}
            Payload::FlowControl { can_send } => {
                buf.write_bool(*can_send)?;
            }
        }

        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                remaining: data.len(),
            });
        }
        let kind = PacketKind::from_u8(data[0])?;
        let seq = data[1];
        let ack = data[2];

        let mut reader = Bytes::copy_from_slice(&data[HEADER_LEN..]);
        let payload = match kind {
            PacketKind::RegisterAgent => {
                let id = reader.read_fixed_str(crate::task::AGENT_ID_WIDTH)?;
                let agent_id = AgentId::new(id).map_err(|e| {
                    ProtocolError::Malformed(BinaryError::InvalidData(e.to_string()))
                })?;
                Payload::RegisterAgent { agent_id }
            }
            PacketKind::RegisterAgentResponse => {
                let status = RegistrationStatus::from_u8(reader.read_u8()?)?;
                Payload::RegisterAgentResponse { status }
            }
            PacketKind::Task => {
                let count = reader.read_u8()?;
                let mut tasks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    tasks.push(task_codec::read_task(&mut reader)?);
                }
                let body_len = data.len() - reader.remaining();
                verify_checksum(&data[..body_len], &mut reader)?;
                Payload::Task { tasks }
            }
            PacketKind::Metrics => {
                let report = metrics::read_report(&mut reader)?;
                let body_len = data.len() - reader.remaining();
                verify_checksum(&data[..body_len], &mut reader)?;
                Payload::Metrics(report)
            }
            PacketKind::Ack => Payload::Ack,
            PacketKind::FlowControl => {
                let can_send = reader.read_bool()?;
                Payload::FlowControl { can_send }
            }
        };

        Ok(Packet { seq, ack, payload })
    }
}

/// Hex-encoded SHA-256 digest of `data`.
pub fn checksum_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reads the 64-character checksum trailer and validates it against `body`.
fn verify_checksum(body: &[u8], reader: &mut Bytes) -> Result<(), ProtocolError> {
    let stated = reader.read_bytes(CHECKSUM_LEN)?;
    if checksum_hex(body).as_bytes() != &stated[..] {
        return Err(ProtocolError::BadChecksum);
    }
    Ok(())
}
