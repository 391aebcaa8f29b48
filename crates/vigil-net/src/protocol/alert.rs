//! Out-of-band alert messages carried on the stream channel.
//!
//! One framed message per connection:
//! `task_id_len:u8 | task_id | device_id_len:u8 | device_id | alert_type:u8 |
//!  timestamp:u64-BE | details_len:u32-BE | details`.

use super::ProtocolError;
use crate::task::{AgentId, TaskId};
use bytes::{Bytes, BytesMut};
use vigil_binary::{BinaryError, ByteReader, ByteWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertKind {
    HighJitter = 1,
    HighPacketLoss = 2,
    HighCpuUsage = 3,
    HighRamUsage = 4,
    HighInterfaceStats = 5,
}

impl AlertKind {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(AlertKind::HighJitter),
            2 => Ok(AlertKind::HighPacketLoss),
            3 => Ok(AlertKind::HighCpuUsage),
            4 => Ok(AlertKind::HighRamUsage),
            5 => Ok(AlertKind::HighInterfaceStats),
            other => Err(ProtocolError::InvalidAlertType(other)),
        }
    }

    /// Name stored by the persistence layer.
    pub fn name(self) -> &'static str {
        match self {
            AlertKind::HighJitter => "HighJitter",
            AlertKind::HighPacketLoss => "HighPacketLoss",
            AlertKind::HighCpuUsage => "HighCpuUsage",
            AlertKind::HighRamUsage => "HighRamUsage",
            AlertKind::HighInterfaceStats => "HighInterfaceStats",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub task_id: TaskId,
    pub device_id: AgentId,
    pub kind: AlertKind,
    pub details: String,
    /// Unix epoch seconds.
    pub timestamp: u64,
}

impl AlertMessage {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();

        write_short_str(&mut buf, self.task_id.as_str())?;
        write_short_str(&mut buf, self.device_id.as_str())?;
        buf.write_u8(self.kind as u8)?;
        buf.write_u64_be(self.timestamp)?;
        buf.write_string_u32(&self.details)?;

        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Bytes::copy_from_slice(data);

        let task_id = TaskId::new(read_short_str(&mut reader)?).map_err(invalid)?;
        let device_id = AgentId::new(read_short_str(&mut reader)?).map_err(invalid)?;
        let kind = AlertKind::from_u8(reader.read_u8()?)?;
        let timestamp = reader.read_u64_be()?;
        let details = reader.read_string_u32()?;

        Ok(AlertMessage {
            task_id,
            device_id,
            kind,
            details,
            timestamp,
        })
    }
}

fn write_short_str(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    let len: u8 = value.len().try_into().map_err(|_| {
        ProtocolError::Malformed(BinaryError::InvalidData(format!(
            "id '{}' exceeds u8 length prefix",
            value
        )))
    })?;
    buf.write_u8(len)?;
    buf.write_bytes(value.as_bytes())?;
    Ok(())
}

fn read_short_str(reader: &mut Bytes) -> Result<String, ProtocolError> {
    let len = reader.read_u8()? as usize;
    let bytes = reader.read_bytes(len)?;
    Ok(String::from_utf8(bytes.to_vec()).map_err(BinaryError::from)?)
}

fn invalid(err: crate::task::InvalidId) -> ProtocolError {
    ProtocolError::Malformed(BinaryError::InvalidData(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> AlertMessage {
        AlertMessage {
            task_id: TaskId::new("T0001").unwrap(),
            device_id: AgentId::new("AG001").unwrap(),
            kind: AlertKind::HighCpuUsage,
            details: "cpu_usage 61.2 above threshold 50".to_string(),
            timestamp: 1_700_000_123,
        }
    }

    #[test]
    fn alert_round_trip() {
        let alert = sample_alert();
        let decoded = AlertMessage::decode(&alert.encode().unwrap()).unwrap();
        assert_eq!(decoded, alert);
    }

    #[test]
    fn alert_kind_out_of_range_is_rejected() {
        let mut encoded = sample_alert().encode().unwrap().to_vec();
        // alert_type sits right after the two length-prefixed ids.
        let kind_offset = 1 + 5 + 1 + 5;
        encoded[kind_offset] = 9;
        assert!(matches!(
            AlertMessage::decode(&encoded),
            Err(ProtocolError::InvalidAlertType(9))
        ));
    }

    #[test]
    fn truncated_alert_is_rejected() {
        let encoded = sample_alert().encode().unwrap();
        assert!(AlertMessage::decode(&encoded[..encoded.len() - 3]).is_err());
    }
}
