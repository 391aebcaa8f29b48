//! Metric report payload.
//!
//! Fixed layout: task id (10), device id (5), four f32 metric slots, u32
//! big-endian epoch seconds. A metric the agent did not measure is encoded
//! as IEEE-754 NaN and decoded back to absent.

use super::ProtocolError;
use crate::task::{AGENT_ID_WIDTH, AgentId, TASK_ID_WIDTH, TaskId};
use bytes::{Bytes, BytesMut};
use vigil_binary::{BinaryError, ByteReader, ByteWriter};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    pub task_id: TaskId,
    pub device_id: AgentId,
    /// Mbit/s.
    pub bandwidth: Option<f32>,
    /// Milliseconds.
    pub jitter: Option<f32>,
    /// Percent.
    pub loss: Option<f32>,
    /// Milliseconds.
    pub latency: Option<f32>,
    /// Unix epoch seconds.
    pub timestamp: u32,
}

impl MetricsReport {
    /// True when no link metric was measured this tick.
    pub fn is_empty(&self) -> bool {
        self.bandwidth.is_none()
            && self.jitter.is_none()
            && self.loss.is_none()
            && self.latency.is_none()
    }

}

pub(super) fn write_report(buf: &mut BytesMut, report: &MetricsReport) -> Result<(), ProtocolError> {
    buf.write_fixed_str(report.task_id.as_str(), TASK_ID_WIDTH)?;
    buf.write_fixed_str(report.device_id.as_str(), AGENT_ID_WIDTH)?;
    buf.write_f32_be(report.bandwidth.unwrap_or(f32::NAN))?;
    buf.write_f32_be(report.jitter.unwrap_or(f32::NAN))?;
    buf.write_f32_be(report.loss.unwrap_or(f32::NAN))?;
    buf.write_f32_be(report.latency.unwrap_or(f32::NAN))?;
    buf.write_u32_be(report.timestamp)?;
    Ok(())
}

pub(super) fn read_report(reader: &mut Bytes) -> Result<MetricsReport, ProtocolError> {
    let task_id = TaskId::new(reader.read_fixed_str(TASK_ID_WIDTH)?)
        .map_err(|e| ProtocolError::Malformed(BinaryError::InvalidData(e.to_string())))?;
    let device_id = AgentId::new(reader.read_fixed_str(AGENT_ID_WIDTH)?)
        .map_err(|e| ProtocolError::Malformed(BinaryError::InvalidData(e.to_string())))?;

    let bandwidth = present(reader.read_f32_be()?);
    let jitter = present(reader.read_f32_be()?);
    let loss = present(reader.read_f32_be()?);
    let latency = present(reader.read_f32_be()?);
    let timestamp = reader.read_u32_be()?;

    Ok(MetricsReport {
        task_id,
        device_id,
        bandwidth,
        jitter,
        loss,
        latency,
        timestamp,
    })
}

fn present(value: f32) -> Option<f32> {
    if value.is_nan() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HEADER_LEN, Packet, ProtocolError};

    fn sample_report() -> MetricsReport {
        MetricsReport {
            task_id: TaskId::new("T0001").unwrap(),
            device_id: AgentId::new("AG001").unwrap(),
            bandwidth: None,
            jitter: Some(1.25),
            loss: None,
            latency: Some(5.0),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn absent_metrics_round_trip_as_nan() {
        let packet = Packet::metrics(sample_report());
        let encoded = packet.encode().unwrap();

        // 15 id bytes, 4 floats, u32 timestamp, 64-char checksum.
        assert_eq!(encoded.len(), HEADER_LEN + 15 + 16 + 4 + 64);

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn all_metrics_present_round_trip() {
        let report = MetricsReport {
            bandwidth: Some(93.42),
            jitter: Some(0.031),
            loss: Some(2.0),
            latency: Some(12.5),
            ..sample_report()
        };
        let decoded = Packet::decode(&Packet::metrics(report.clone()).encode().unwrap()).unwrap();
        assert_eq!(decoded, Packet::metrics(report));
    }

    #[test]
    fn flipped_metric_bit_fails_checksum() {
        let encoded = Packet::metrics(sample_report()).encode().unwrap();
        let mut corrupted = encoded.to_vec();
        // Inside the jitter float.
        corrupted[HEADER_LEN + 15 + 4] ^= 0x80;
        assert!(matches!(
            Packet::decode(&corrupted),
            Err(ProtocolError::BadChecksum)
        ));
    }

    #[test]
    fn is_empty_requires_no_link_metrics() {
        let mut report = sample_report();
        assert!(!report.is_empty());
        report.jitter = None;
        report.latency = None;
        assert!(report.is_empty());
    }
}
