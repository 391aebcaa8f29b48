//! Length-prefixed big-endian wire encoding of measurement tasks.
//!
//! ```text
//! task_id:   len:u32, bytes
//! frequency: u32
//! devices:   count:u32, [ device_id_len:u32, bytes,
//!                         device_metrics: cpu:u8, ram:u8,
//!                           if_count:u32, [ len:u32, name ]*,
//!                         link_metrics: 5 x (present:u8, sub-spec?) ]*
//! ```

use super::ProtocolError;
use crate::task::{
    AgentId, AlertConditions, DeviceMetricsSpec, DeviceSpec, LatencySpec, LinkMetricsSpec, Task,
    TaskId, ThroughputSpec, Transport,
};
use bytes::{Bytes, BytesMut};
use vigil_binary::{BinaryError, ByteReader, ByteWriter};

pub(super) fn write_task(buf: &mut BytesMut, task: &Task) -> Result<(), ProtocolError> {
    buf.write_string_u32(task.id.as_str())?;
    buf.write_u32_be(task.frequency)?;

    buf.write_u32_be(task.devices.len() as u32)?;
    for device in &task.devices {
        buf.write_string_u32(device.device_id.as_str())?;
        write_device_metrics(buf, &device.device_metrics)?;
        write_link_metrics(buf, &device.link_metrics)?;
    }
    Ok(())
}

pub(super) fn read_task(reader: &mut Bytes) -> Result<Task, ProtocolError> {
    let id = TaskId::new(reader.read_string_u32()?).map_err(invalid)?;
    let frequency = reader.read_u32_be()?;

    let device_count = reader.read_u32_be()?;
    let mut devices = Vec::with_capacity(device_count.min(64) as usize);
    for _ in 0..device_count {
        let device_id = AgentId::new(reader.read_string_u32()?).map_err(invalid)?;
        let device_metrics = read_device_metrics(reader)?;
        let link_metrics = read_link_metrics(reader)?;
        devices.push(DeviceSpec {
            device_id,
            device_metrics,
            link_metrics,
        });
    }

    Ok(Task {
        id,
        frequency,
        devices,
    })
}

fn write_device_metrics(buf: &mut BytesMut, spec: &DeviceMetricsSpec) -> Result<(), ProtocolError> {
    buf.write_bool(spec.cpu_usage)?;
    buf.write_bool(spec.ram_usage)?;
    buf.write_u32_be(spec.interface_stats.len() as u32)?;
    for interface in &spec.interface_stats {
        buf.write_string_u32(interface)?;
    }
    Ok(())
}

fn read_device_metrics(reader: &mut Bytes) -> Result<DeviceMetricsSpec, ProtocolError> {
    let cpu_usage = reader.read_bool()?;
    let ram_usage = reader.read_bool()?;
    let interface_count = reader.read_u32_be()?;
    let mut interface_stats = Vec::with_capacity(interface_count.min(64) as usize);
    for _ in 0..interface_count {
        interface_stats.push(reader.read_string_u32()?);
    }
    Ok(DeviceMetricsSpec {
        cpu_usage,
        ram_usage,
        interface_stats,
    })
}

fn write_link_metrics(buf: &mut BytesMut, spec: &LinkMetricsSpec) -> Result<(), ProtocolError> {
    write_present(buf, &spec.bandwidth, write_throughput)?;
    write_present(buf, &spec.jitter, write_throughput)?;
    write_present(buf, &spec.packet_loss, write_throughput)?;
    write_present(buf, &spec.latency, write_latency)?;
    write_present(buf, &spec.alertflow_conditions, write_conditions)?;
    Ok(())
}

fn read_link_metrics(reader: &mut Bytes) -> Result<LinkMetricsSpec, ProtocolError> {
    let bandwidth = read_present(reader, read_throughput)?;
    let jitter = read_present(reader, read_throughput)?;
    let packet_loss = read_present(reader, read_throughput)?;
    let latency = read_present(reader, read_latency)?;
    let alertflow_conditions = read_present(reader, read_conditions)?;
    Ok(LinkMetricsSpec {
        bandwidth,
        jitter,
        packet_loss,
        latency,
        alertflow_conditions,
    })
}

fn write_present<T>(
    buf: &mut BytesMut,
    value: &Option<T>,
    write: fn(&mut BytesMut, &T) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    match value {
        Some(inner) => {
            buf.write_u8(1)?;
            write(buf, inner)
        }
        None => Ok(buf.write_u8(0)?),
    }
}

fn read_present<T>(
    reader: &mut Bytes,
    read: fn(&mut Bytes) -> Result<T, ProtocolError>,
) -> Result<Option<T>, ProtocolError> {
    if reader.read_bool()? {
        Ok(Some(read(reader)?))
    } else {
        Ok(None)
    }
}

fn write_throughput(buf: &mut BytesMut, spec: &ThroughputSpec) -> Result<(), ProtocolError> {
    buf.write_string_u32(&spec.tool)?;
    buf.write_bool(spec.is_server)?;
    buf.write_string_u32(&spec.server_address)?;
    buf.write_u32_be(spec.duration)?;
    buf.write_string_u32(spec.transport.as_str())?;
    buf.write_u32_be(spec.frequency)?;
    Ok(())
}

fn read_throughput(reader: &mut Bytes) -> Result<ThroughputSpec, ProtocolError> {
    let tool = reader.read_string_u32()?;
    let is_server = reader.read_bool()?;
    let server_address = reader.read_string_u32()?;
    let duration = reader.read_u32_be()?;
    let transport_name = reader.read_string_u32()?;
    let transport = Transport::from_wire(&transport_name)
        .ok_or(ProtocolError::UnknownTransport(transport_name))?;
    let frequency = reader.read_u32_be()?;
    Ok(ThroughputSpec {
        tool,
        is_server,
        server_address,
        duration,
        transport,
        frequency,
    })
}

fn write_latency(buf: &mut BytesMut, spec: &LatencySpec) -> Result<(), ProtocolError> {
    buf.write_string_u32(&spec.tool)?;
    buf.write_string_u32(&spec.destination_address)?;
    buf.write_u32_be(spec.packet_count)?;
    buf.write_u32_be(spec.frequency)?;
    Ok(())
}

fn read_latency(reader: &mut Bytes) -> Result<LatencySpec, ProtocolError> {
    Ok(LatencySpec {
        tool: reader.read_string_u32()?,
        destination_address: reader.read_string_u32()?,
        packet_count: reader.read_u32_be()?,
        frequency: reader.read_u32_be()?,
    })
}

fn write_conditions(buf: &mut BytesMut, spec: &AlertConditions) -> Result<(), ProtocolError> {
    buf.write_u32_be(spec.cpu_usage)?;
    buf.write_u32_be(spec.ram_usage)?;
    buf.write_u32_be(spec.interface_stats)?;
    buf.write_u32_be(spec.packet_loss)?;
    buf.write_u32_be(spec.jitter)?;
    Ok(())
}

fn read_conditions(reader: &mut Bytes) -> Result<AlertConditions, ProtocolError> {
    Ok(AlertConditions {
        cpu_usage: reader.read_u32_be()?,
        ram_usage: reader.read_u32_be()?,
        interface_stats: reader.read_u32_be()?,
        packet_loss: reader.read_u32_be()?,
        jitter: reader.read_u32_be()?,
    })
}

fn invalid(err: crate::task::InvalidId) -> ProtocolError {
    ProtocolError::Malformed(BinaryError::InvalidData(err.to_string()))
}
