//! Server configuration surface (spec §6).
//!
//! Every option here has a literal default mirroring the reference
//! configuration surface; `ServerConfig::default()` is what a freshly
//! started `smbd` runs with if no flags are given.

use std::time::Duration;

/// Negotiable SMB1/LanMan dialects, in ascending capability order.
///
/// The dispatcher selects the highest dialect both the client offered
/// and `enabled_dialects` allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dialect {
    /// `PC NETWORK PROGRAM 1.0` — no authentication, minimal negotiate reply.
    Core,
    /// `LANMAN1.0` / `LANMAN2.1` — LanMan-era reply shape, requires session setup.
    LanMan,
    /// `NT LM 0.12` — full NT-era reply shape (capabilities + 64-bit time).
    NtLm,
}

impl Dialect {
    /// Well-known dialect strings recognized during negotiation, in the
    /// order a client typically offers them. The selected dialect is the
    /// highest-indexed one the server also supports.
    pub const NEGOTIATE_TABLE: &'static [(&'static str, Dialect)] = &[
        ("PC NETWORK PROGRAM 1.0", Dialect::Core),
        ("MICROSOFT NETWORKS 1.03", Dialect::Core),
        ("MICROSOFT NETWORKS 3.0", Dialect::Core),
        ("LANMAN1.0", Dialect::LanMan),
        ("LM1.2X002", Dialect::LanMan),
        ("LANMAN2.1", Dialect::LanMan),
        ("NT LM 0.12", Dialect::NtLm),
    ];

    /// Whether this dialect requires a session-setup/authentication leg
    /// before entering `SMB-Session`.
    pub fn requires_session_setup(&self) -> bool {
        !matches!(self, Dialect::Core)
    }
}

/// Security mode: how share access is authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Per-user authentication at session-setup time.
    #[default]
    User,
    /// Per-share password, no user identity.
    Share,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_name: String,
    pub alias_names: Vec<String>,
    pub domain: String,
    pub server_comment: String,
    pub enabled_dialects: Vec<Dialect>,
    pub security_mode: SecurityMode,
    pub max_virtual_circuits_per_session: u32,
    pub session_port: u16,
    pub smb_port: u16,
    pub socket_timeout: Duration,
    pub socket_keep_alive: bool,
    pub packet_pool_max_size: usize,
    pub over_size_ceiling: usize,
    pub lease: Duration,
    pub allocate_wait: Duration,
    pub max_packets_per_thread_run: u32,
    pub enable_netbios: bool,
    pub enable_tcp_smb: bool,
    pub host_announce: bool,
    pub host_announce_interval: Duration,
    pub disable_hashed_openfilemap: bool,
    pub extended_security: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name: "RUSTSMB".to_string(),
            alias_names: Vec::new(),
            domain: "WORKGROUP".to_string(),
            server_comment: String::new(),
            enabled_dialects: vec![Dialect::Core, Dialect::LanMan, Dialect::NtLm],
            security_mode: SecurityMode::User,
            max_virtual_circuits_per_session: 16,
            session_port: 139,
            smb_port: 445,
            socket_timeout: Duration::from_millis(900_000),
            socket_keep_alive: true,
            packet_pool_max_size: 64 * 1024,
            over_size_ceiling: 128 * 1024,
            lease: Duration::from_millis(5_000),
            allocate_wait: Duration::from_millis(250),
            max_packets_per_thread_run: 4,
            enable_netbios: true,
            enable_tcp_smb: true,
            host_announce: false,
            host_announce_interval: Duration::from_secs(12 * 60),
            disable_hashed_openfilemap: false,
            extended_security: true,
        }
    }
}

impl ServerConfig {
    /// `max_virtual_circuits_per_session == 0` means "unlimited within the
    /// UID range minus reserved ids" (spec §9, open question).
    pub fn effective_max_circuits(&self) -> u32 {
        const RESERVED: u32 = 2; // UID 0 and 0xFFFF are never allocated.
        if self.max_virtual_circuits_per_session == 0 {
            u16::MAX as u32 - RESERVED
        } else {
            self.max_virtual_circuits_per_session
        }
    }
}
