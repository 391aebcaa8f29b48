//! # vigil-net
//!
//! The wire protocol and the reliable datagram transport of the vigil
//! network monitoring system.
//!
//! `protocol` defines the typed packet codec (registration, task
//! distribution, metric reports, acknowledgments, flow control) and the
//! framed alert message carried on the stream channel. `transport` layers
//! sequencing, retransmission, in-order delivery and flow-control credit on
//! top of a UDP socket. `task` is the measurement-task data model shared by
//! the codec and the server's JSON loader.

pub mod protocol;
pub mod task;
pub mod transport;

pub use protocol::{Packet, PacketKind, Payload, ProtocolError};
pub use transport::{ReliableSocket, TransportConfig};
