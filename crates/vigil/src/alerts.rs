//! Alert channel: one TCP connection per alert, one framed message per
//! connection.

use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vigil_net::protocol::AlertMessage;

/// Connects to the server's stream endpoint, writes the framed alert and
/// closes the connection.
pub async fn send_alert(server: SocketAddr, alert: &AlertMessage) -> io::Result<()> {
    let encoded = alert
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut stream = TcpStream::connect(server).await?;
    stream.write_all(&encoded).await?;
    stream.shutdown().await?;
    info!(
        "alert {} for task {} sent to {}",
        alert.kind.name(),
        alert.task_id,
        server
    );
    Ok(())
}

/// Accept loop of the server's stream endpoint. Each connection carries
/// exactly one alert; malformed messages are logged and discarded. Every
/// valid alert is handed to `on_alert` (the persistence collaborator).
pub async fn run_alert_listener<F>(addr: SocketAddr, on_alert: F) -> io::Result<()>
where
    F: Fn(AlertMessage) + Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("stream endpoint bound on {}", addr);
    serve_alerts(listener, on_alert).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_alerts<F>(listener: TcpListener, on_alert: F) -> io::Result<()>
where
    F: Fn(AlertMessage) + Clone + Send + Sync + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("error accepting alert connection: {}", e);
                continue;
            }
        };
        let on_alert = on_alert.clone();
        tokio::spawn(handle_alert_connection(stream, peer, on_alert));
    }
}

async fn handle_alert_connection<F>(mut stream: TcpStream, peer: SocketAddr, on_alert: F)
where
    F: Fn(AlertMessage),
{
    let mut data = Vec::new();
    if let Err(e) = stream.read_to_end(&mut data).await {
        warn!("error reading alert from {}: {}", peer, e);
        return;
    }
    if data.is_empty() {
        warn!("empty alert connection from {}", peer);
        return;
    }

    match AlertMessage::decode(&data) {
        Ok(alert) => {
            info!(
                "alert {} from {} (task {})",
                alert.kind.name(),
                alert.device_id,
                alert.task_id
            );
            on_alert(alert);
        }
        Err(e) => error!("malformed alert from {}: {}", peer, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener as RawListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use vigil_net::protocol::AlertKind;
    use vigil_net::task::{AgentId, TaskId};

    fn sample_alert() -> AlertMessage {
        AlertMessage {
            task_id: TaskId::new("T0001").unwrap(),
            device_id: AgentId::new("AG001").unwrap(),
            kind: AlertKind::HighJitter,
            details: "jitter 12.0ms above threshold 10".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn alert_round_trips_through_the_stream_channel() {
        let listener = RawListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        tokio::spawn(serve_alerts(listener, move |alert| {
            tx.try_send(alert).unwrap();
        }));

        send_alert(addr, &sample_alert()).await.unwrap();

        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, sample_alert());
    }

    #[tokio::test]
    async fn malformed_alert_is_dropped() {
        let listener = RawListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();

        tokio::spawn(serve_alerts(listener, move |_| {
            *counter.lock().unwrap() += 1;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0xFF, 0x01, 0x02]).await.unwrap();
        stream.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
