//! Top-level wiring: configuration, packet pool, dispatcher, worker
//! pool, and transport listeners (spec §3, §4.1, §4.2).

use std::sync::Arc;

use crate::collaborators::{Authenticator, ChangeNotifyHandler, FilesystemDriver, IpcHandler, ShareRegistry};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::pool::PacketPool;
use crate::transport;
use crate::worker::WorkerPool;

/// The collaborator implementations a concrete deployment must supply
/// (spec §6); the engine itself never touches storage, identity, or
/// transport-announcement logic directly.
pub struct ServerCollaborators {
    pub authenticator: Arc<dyn Authenticator>,
    pub filesystem: Arc<dyn FilesystemDriver>,
    pub shares: Arc<dyn ShareRegistry>,
    pub notify: Arc<dyn ChangeNotifyHandler>,
    pub ipc: Arc<dyn IpcHandler>,
}

pub struct Server {
    config: Arc<ServerConfig>,
    pool: Arc<PacketPool>,
    workers: Arc<WorkerPool>,
}

impl Server {
    pub fn new(config: ServerConfig, collaborators: ServerCollaborators, max_concurrent_sessions: usize) -> Self {
        let config = Arc::new(config);
        let pool = Arc::new(PacketPool::new(
            config.packet_pool_max_size,
            config.over_size_ceiling,
            config.lease,
            config.allocate_wait,
        ));

        let dispatcher = Arc::new(Dispatcher {
            config: config.clone(),
            pool: pool.clone(),
            authenticator: collaborators.authenticator,
            filesystem: collaborators.filesystem,
            shares: collaborators.shares,
            notify: collaborators.notify,
            ipc: collaborators.ipc,
        });

        let workers = Arc::new(WorkerPool::new(max_concurrent_sessions, config.clone(), pool.clone(), dispatcher));

        Server { config, pool, workers }
    }

    /// Runs every enabled transport listener until one of them fails;
    /// also starts the packet pool's lease-expiry watcher.
    pub async fn run(&self) -> Result<()> {
        self.pool.clone().spawn_lease_watcher();
        transport::serve_all(self.config.clone(), self.workers.clone()).await
    }
}
