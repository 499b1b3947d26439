//! Per-connection session state machine (spec §3, §4.4).

pub mod notify;
pub mod tree;
pub mod vc;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::asyncq::{AsyncQueue, AsyncQueueHandle};
use crate::config::Dialect;
use crate::error::{Error, Result};
use crate::framer::Transport;
use crate::pool::Packet;
use crate::session::notify::NotifyList;
use crate::session::vc::VirtualCircuitTable;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle states a session moves through (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NetBiosSessionRequest,
    SmbNegotiate,
    SmbSessionSetup,
    SmbSession,
    NetBiosHangup,
}

/// Scratch state for one in-progress (possibly multi-leg) SPNEGO
/// session-setup exchange, keyed by PID (spec §3's "per-PID
/// session-setup scratch table").
#[derive(Debug, Clone, Default)]
pub struct SessionSetupScratch {
    pub leg: u32,
    pub partial_token: Vec<u8>,
}

/// Per-connection state (spec §3's *Session*).
pub struct Session {
    pub id: u64,
    pub transport: Transport,
    pub remote_addr: SocketAddr,
    pub called_name: String,
    pub calling_name: String,
    pub state: SessionState,
    pub dialect: Option<Dialect>,
    pub client_capabilities: u32,
    pub client_max_buffer_size: u32,
    pub client_max_mpx_count: u16,
    pub virtual_circuits: VirtualCircuitTable,
    pub notify_list: NotifyList,
    pub async_queue: AsyncQueue,
    /// Response packets for requests whose whole `AndX` chain deferred
    /// (spec §4.6, §4.7), keyed by MID so an `NTCancel` or a
    /// collaborator's completion can find the packet again.
    pending_operations: HashMap<u16, Packet>,
    session_setup_scratch: HashMap<u32, SessionSetupScratch>,
    pub signing_key: Option<Vec<u8>>,
    pub encryption_key: Option<Vec<u8>>,
    pub read_in_progress: bool,
    pub created_at: Instant,
    pub max_virtual_circuits: u32,
}

impl Session {
    pub fn new(transport: Transport, remote_addr: SocketAddr, max_virtual_circuits: u32) -> Self {
        let initial_state = match transport {
            Transport::NetBios => SessionState::NetBiosSessionRequest,
            Transport::DirectTcp => SessionState::SmbNegotiate,
        };
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            remote_addr,
            called_name: String::new(),
            calling_name: String::new(),
            state: initial_state,
            dialect: None,
            client_capabilities: 0,
            client_max_buffer_size: 0,
            client_max_mpx_count: 0,
            virtual_circuits: VirtualCircuitTable::new(max_virtual_circuits),
            notify_list: NotifyList::new(),
            async_queue: AsyncQueue::new(),
            pending_operations: HashMap::new(),
            session_setup_scratch: HashMap::new(),
            signing_key: None,
            encryption_key: None,
            read_in_progress: false,
            created_at: Instant::now(),
            max_virtual_circuits,
        }
    }

    /// Validates and applies the `NetBIOS-SessionRequest -> SMB-Negotiate`
    /// transition (spec §4.4): the called name must match the server
    /// name, an alias, or be a local-address wildcard.
    pub fn accept_session_request(&mut self, called_name: &str, calling_name: &str, server_name: &str, aliases: &[String]) -> Result<()> {
        if self.state != SessionState::NetBiosSessionRequest {
            return Err(Error::InvalidState(format!("{:?}", self.state)));
        }
        let matches_server = called_name.eq_ignore_ascii_case(server_name)
            || aliases.iter().any(|a| called_name.eq_ignore_ascii_case(a))
            || called_name == "*SMBSERVER"
            || called_name == "*";
        if !matches_server {
            return Err(Error::Status(crate::error::SmbStatus::LOGON_FAILURE));
        }
        self.called_name = called_name.to_string();
        self.calling_name = calling_name.to_string();
        self.state = SessionState::SmbNegotiate;
        Ok(())
    }

    /// Applies the dialect selected during negotiation and moves to
    /// `SMB-SessionSetup` (if authentication is required) or directly
    /// to `SMB-Session` (Core dialect).
    pub fn complete_negotiate(&mut self, dialect: Dialect) -> Result<()> {
        if self.state != SessionState::SmbNegotiate {
            return Err(Error::InvalidState(format!("{:?}", self.state)));
        }
        self.dialect = Some(dialect);
        self.state = if dialect.requires_session_setup() {
            SessionState::SmbSessionSetup
        } else {
            SessionState::SmbSession
        };
        Ok(())
    }

    /// Parks `response` for a chain whose every block deferred, keyed by
    /// its MID (spec §4.6's deferred-completion contract).
    pub fn register_pending(&mut self, mid: u16, response: Packet) {
        self.pending_operations.insert(mid, response);
    }

    /// Removes and returns a parked response by MID, e.g. for an
    /// `NTCancel` or a collaborator's completion to claim.
    pub fn take_pending(&mut self, mid: u16) -> Option<Packet> {
        self.pending_operations.remove(&mid)
    }

    /// A cloneable handle onto this session's async-response queue, for
    /// handing to a collaborator at registration time (spec §4.7).
    pub fn async_queue_handle(&self) -> AsyncQueueHandle {
        self.async_queue.handle()
    }

    pub fn scratch_for_pid(&mut self, pid: u32) -> &mut SessionSetupScratch {
        self.session_setup_scratch.entry(pid).or_default()
    }

    pub fn clear_scratch_for_pid(&mut self, pid: u32) {
        self.session_setup_scratch.remove(&pid);
    }

    /// Completes session setup, moving to `SMB-Session`.
    pub fn complete_session_setup(&mut self, pid: u32) -> Result<()> {
        if self.state != SessionState::SmbSessionSetup {
            return Err(Error::InvalidState(format!("{:?}", self.state)));
        }
        self.clear_scratch_for_pid(pid);
        self.state = SessionState::SmbSession;
        Ok(())
    }

    /// Unconditionally transitions to hangup; valid from any state
    /// (spec §4.4).
    pub fn hangup(&mut self) {
        self.state = SessionState::NetBiosHangup;
    }

    pub fn is_active(&self) -> bool {
        self.state != SessionState::NetBiosHangup
    }

    /// Tears down every resource a session owns, in the order spec
    /// §4.4's close sequence names: circuits (and their trees and open
    /// files via the caller), notify registrations, then the in-flight
    /// transaction (handled by the caller, since only it can commit or
    /// roll back against the filesystem driver).
    pub fn take_notify_requests_for_hangup(&mut self) -> Vec<crate::collaborators::NotifyRequest> {
        self.notify_list.drain_all()
    }
}
