//! The shared worker pool that drives one session's request/response
//! loop per task, bounded by a global concurrency limit (spec §4.1,
//! §4.2).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{Error, Result};
use crate::framer::{self, Transport};
use crate::pool::PacketPool;
use crate::session::{Session, SessionState};

/// Caps the number of sessions actively being serviced at once,
/// independent of how many connections are merely accepted (spec §4.1).
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: Arc<ServerConfig>,
    pool: Arc<PacketPool>,
    dispatcher: Arc<Dispatcher>,
}

impl WorkerPool {
    pub fn new(max_concurrent_sessions: usize, config: Arc<ServerConfig>, pool: Arc<PacketPool>, dispatcher: Arc<Dispatcher>) -> Self {
        WorkerPool {
            semaphore: Arc::new(Semaphore::new(max_concurrent_sessions)),
            config,
            pool,
            dispatcher,
        }
    }

    /// Spawns a task that drives `session` to completion: read a
    /// request, dispatch it, write the response (plus any queued async
    /// pushes), repeat until the peer hangs up or the socket times out.
    pub fn spawn<S>(&self, mut session: Session, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let config = self.config.clone();
        let pool = self.pool.clone();
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            if let Err(e) = run_session(&mut session, &mut stream, &config, &pool, &dispatcher).await {
                log::debug!("session {} ended: {e}", session.id);
            }
        });
    }
}

/// Drives one session's request loop, yielding back to the scheduler
/// every `max_packets_per_thread_run` requests so one busy connection
/// can't starve the others sharing this task's executor thread (spec
/// §4.1).
async fn run_session<S>(
    session: &mut Session,
    stream: &mut S,
    config: &ServerConfig,
    pool: &Arc<PacketPool>,
    dispatcher: &Dispatcher,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // NetBIOS sessions open with a SESSION REQUEST/RESPONSE handshake
    // ahead of any SMB traffic (spec §4.2, §4.4); direct-TCP sessions
    // skip straight to SMB-Negotiate and never enter this state.
    if session.transport == Transport::NetBios && session.state == SessionState::NetBiosSessionRequest {
        let (called_name, calling_name) = framer::read_session_request(stream, pool).await?;
        match session.accept_session_request(&called_name, &calling_name, &config.server_name, &config.alias_names) {
            Ok(()) => framer::write_positive_session_response(stream).await?,
            Err(_) => {
                framer::write_negative_session_response(stream, framer::NBSS_ERROR_NOT_LISTENING_ON_CALLED_NAME).await?;
                session.hangup();
                return Ok(());
            }
        }
    }

    let mut processed_since_yield = 0u32;

    loop {
        let read = tokio::time::timeout(config.socket_timeout, framer::read_packet(stream, pool, session.transport, 0)).await;

        let mut request = match read {
            Ok(Ok(packet)) => packet,
            Ok(Err(Error::ConnectionClosed)) => {
                session.hangup();
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                session.hangup();
                return Ok(());
            }
        };

        pool.allocate_with_header(config.packet_pool_max_size, &mut request, 32).await?;

        // A fully-deferred chain takes its response packet out of
        // `request.associated` itself (spec §4.6, §4.7): nothing to
        // write here, and nothing left for `pool.release` below to
        // double-release out from under the pending notify.
        if let DispatchOutcome::Replied { len } = dispatcher.dispatch(session, &mut request).await? {
            if let Some(response) = request.associated.as_ref() {
                framer::write_packet(stream, response, len, session.transport).await?;
            }
        }

        for pushed in session.async_queue.drain() {
            let len = pushed.written_len;
            framer::write_packet(stream, &pushed, len, session.transport).await?;
            pool.release(pushed).await;
        }
        framer::flush(stream).await?;

        pool.release(request).await;

        if !session.is_active() {
            return Ok(());
        }

        processed_since_yield += 1;
        if processed_since_yield >= config.max_packets_per_thread_run {
            processed_since_yield = 0;
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_threshold_is_positive_by_default() {
        assert!(ServerConfig::default().max_packets_per_thread_run > 0);
    }
}
