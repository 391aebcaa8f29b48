use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use vigil::server::Controller;
use vigil::store::MetricsStore;
use vigil::{alerts, config, tasks};
use vigil_log::VigilLogger;
use vigil_net::ReliableSocket;

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] vigil::store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    VigilLogger::init(log::Level::Info).expect("logger init");

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <tasks-json-file> <metrics-db-file>", args[0]);
        std::process::exit(1);
    }

    let config = config::handle()?;

    let task_list = tasks::load_tasks(Path::new(&args[1]));
    let store = Arc::new(MetricsStore::open(Path::new(&args[2]))?);

    let stream_addr = format!("0.0.0.0:{}", config.network.stream_port)
        .parse()
        .expect("stream bind address");
    let alert_store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = alerts::run_alert_listener(stream_addr, move |alert| {
            if let Err(e) = alert_store.insert_alert(&alert) {
                error!("failed to persist alert: {}", e);
            }
        })
        .await
        {
            error!("alert listener failed: {}", e);
        }
    });

    let (socket, inbound) = ReliableSocket::bind(
        format!("0.0.0.0:{}", config.network.datagram_port),
        config.transport_config(),
    )
    .await?;

    let controller = Controller::new(socket, store, task_list);
    tokio::spawn(controller.clone().run_ingress(inbound));

    controller.wait_for_agents().await;
    info!("all required agents registered, dispatching tasks");
    controller.dispatch_tasks().await;

    // Ingress and the alert listener keep running for the process lifetime.
    std::future::pending::<()>().await;
    Ok(())
}
