use log::error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use vigil::agent::{self, AgentContext};
use vigil::config;
use vigil_log::VigilLogger;
use vigil_net::ReliableSocket;
use vigil_net::task::AgentId;

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    VigilLogger::init(log::Level::Info).expect("logger init");

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <server_ip> <agent_id>", args[0]);
        std::process::exit(1);
    }

    let server_ip: IpAddr = match args[1].parse() {
        Ok(ip) => ip,
        Err(_) => {
            eprintln!("'{}' is not a valid server address", args[1]);
            std::process::exit(1);
        }
    };
    let agent_id = match AgentId::new(args[2].as_str()) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let config = config::handle()?;

    let (socket, inbound) = ReliableSocket::bind("0.0.0.0:0", config.transport_config()).await?;

    let ctx = Arc::new(AgentContext {
        agent_id,
        socket,
        server_datagram: SocketAddr::new(server_ip, config.network.datagram_port),
        server_stream: SocketAddr::new(server_ip, config.network.stream_port),
    });

    if !agent::register(&ctx).await {
        error!("registration was never acknowledged by the server");
        std::process::exit(1);
    }

    agent::run(ctx, inbound).await;
    Ok(())
}
