//! Per-transport listeners: NetBIOS session service (port 139) and
//! direct SMB-over-TCP (port 445), both handed off to the same
//! [`crate::worker::WorkerPool`] once a connection is accepted (spec
//! §4.2).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::framer::Transport;
use crate::session::Session;
use crate::worker::WorkerPool;

/// Accepts connections on `addr` forever, handing each one to `workers`
/// tagged with `transport`.
pub async fn serve(addr: SocketAddr, transport: Transport, config: Arc<ServerConfig>, workers: Arc<WorkerPool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on {addr} ({transport:?})");

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        if config.socket_keep_alive {
            let _ = stream.set_nodelay(true);
        }

        let session = Session::new(transport, remote_addr, config.effective_max_circuits());
        workers.spawn(session, stream);
    }
}

/// Runs every transport the config enables concurrently, returning once
/// any of them stops (only happens on a bind error; the accept loops
/// themselves never return under normal operation).
pub async fn serve_all(config: Arc<ServerConfig>, workers: Arc<WorkerPool>) -> Result<()> {
    let mut tasks = Vec::new();

    if config.enable_netbios {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.session_port).parse().expect("valid bind address");
        tasks.push(tokio::spawn(serve(addr, Transport::NetBios, config.clone(), workers.clone())));
    }
    if config.enable_tcp_smb {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.smb_port).parse().expect("valid bind address");
        tasks.push(tokio::spawn(serve(addr, Transport::DirectTcp, config.clone(), workers.clone())));
    }

    for task in tasks {
        task.await.map_err(|e| crate::error::Error::Internal(e.to_string()))??;
    }
    Ok(())
}

/// Type alias so callers that only need the stream type don't have to
/// name `tokio::net::TcpStream` directly.
pub type Stream = TcpStream;
