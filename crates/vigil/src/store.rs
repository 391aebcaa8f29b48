//! SQLite persistence for metric reports and alerts.
//!
//! Two tables: `packets` holds the per-tick metric rows, `alertflow` the
//! threshold alerts. Wire timestamps (epoch seconds) are stored as local
//! `%Y-%m-%d %H:%M:%S` strings. Bandwidth is rounded to 2 decimal places,
//! jitter and latency to 3, before storing.

use chrono::{DateTime, Local};
use log::info;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use vigil_net::protocol::{AlertMessage, MetricsReport};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct MetricsStore {
    conn: Mutex<Connection>,
}

impl MetricsStore {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = MetricsStore {
            conn: Mutex::new(conn),
        };
        store.setup()?;
        info!("Metrics and alert database ready at {}", path.display());
        Ok(store)
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let store = MetricsStore {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.setup()?;
        Ok(store)
    }

    fn setup(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS packets (
                task_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                bandwidth REAL,
                jitter REAL,
                loss REAL,
                latency REAL,
                timestamp DATETIME NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS alertflow (
                alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp DATETIME NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn insert_metrics(&self, report: &MetricsReport) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO packets (task_id, device_id, bandwidth, jitter, loss, latency, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.task_id.as_str(),
                report.device_id.as_str(),
                report.bandwidth.map(|v| round_to(v, 2)),
                report.jitter.map(|v| round_to(v, 3)),
                report.loss.map(f64::from),
                report.latency.map(|v| round_to(v, 3)),
                format_timestamp(report.timestamp as i64),
            ],
        )?;
        Ok(())
    }

    pub fn insert_alert(&self, alert: &AlertMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alertflow (task_id, device_id, alert_type, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert.task_id.as_str(),
                alert.device_id.as_str(),
                alert.kind.name(),
                alert.details,
                format_timestamp(alert.timestamp as i64),
            ],
        )?;
        Ok(())
    }
}

fn round_to(value: f32, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (f64::from(value) * factor).round() / factor
}

fn format_timestamp(epoch_secs: i64) -> String {
    DateTime::from_timestamp(epoch_secs, 0)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| epoch_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_net::protocol::AlertKind;
    use vigil_net::task::{AgentId, TaskId};

    fn report() -> MetricsReport {
        MetricsReport {
            task_id: TaskId::new("T0001").unwrap(),
            device_id: AgentId::new("AG001").unwrap(),
            bandwidth: Some(93.4567),
            jitter: Some(1.23456),
            loss: None,
            latency: Some(5.0),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn metrics_row_is_rounded_and_absent_fields_are_null() {
        let store = MetricsStore::open_in_memory().unwrap();
        store.insert_metrics(&report()).unwrap();

        let conn = store.conn.lock().unwrap();
        let (bandwidth, jitter, loss, latency): (
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ) = conn
            .query_row(
                "SELECT bandwidth, jitter, loss, latency FROM packets",
                [],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .unwrap();

        assert_eq!(bandwidth, Some(93.46));
        assert_eq!(jitter, Some(1.235));
        assert_eq!(loss, None);
        assert_eq!(latency, Some(5.0));
    }

    #[test]
    fn timestamp_is_stored_as_datetime_string() {
        let store = MetricsStore::open_in_memory().unwrap();
        store.insert_metrics(&report()).unwrap();

        let conn = store.conn.lock().unwrap();
        let timestamp: String = conn
            .query_row("SELECT timestamp FROM packets", [], |row| row.get(0))
            .unwrap();
        // Local-time rendering of 1_700_000_000; shape only.
        assert_eq!(timestamp.len(), 19);
        assert!(timestamp.starts_with("2023-11-1"));
    }

    #[test]
    fn alerts_store_the_kind_name() {
        let store = MetricsStore::open_in_memory().unwrap();
        store
            .insert_alert(&AlertMessage {
                task_id: TaskId::new("T0001").unwrap(),
                device_id: AgentId::new("AG001").unwrap(),
                kind: AlertKind::HighPacketLoss,
                details: "loss 10% above threshold 5".to_string(),
                timestamp: 1_700_000_000,
            })
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let (alert_type, details): (String, String) = conn
            .query_row("SELECT alert_type, details FROM alertflow", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(alert_type, "HighPacketLoss");
        assert!(details.contains("loss"));
    }
}
