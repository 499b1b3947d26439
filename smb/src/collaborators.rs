//! Narrow external interfaces the dispatcher calls into (spec §6).
//!
//! None of these traits are implemented by this crate: a concrete
//! server binds real storage, identity, and transport-announcement
//! logic to them. Keeping them here, rather than folding their
//! signatures into the dispatcher, is what lets the dispatcher stay
//! ignorant of storage and authentication semantics entirely.

use async_trait::async_trait;

use crate::asyncq::AsyncQueueHandle;
use crate::config::SecurityMode;
use crate::error::Result;
use crate::packets::smb1::info_level::FileMetadata;
use crate::session::vc::Uid;

/// Outcome of a user-level authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Guest,
    Denied,
}

/// Outcome of a share-connect authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareAccess {
    Writable,
    ReadOnly,
    NoAccess,
}

/// Challenge/response and extended-security identity material (spec
/// §6's *Authenticator*).
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn access_mode(&self) -> SecurityMode;
    fn encryption_key_length(&self) -> u8;
    /// Challenge bytes to offer in the negotiate response.
    fn auth_context(&self) -> Vec<u8>;
    fn has_extended_security(&self) -> bool;
    /// The SPNEGO `NegTokenInit` to embed in the negotiate response's
    /// security blob, when extended security is in use.
    fn neg_token_init(&self) -> Vec<u8>;
    fn using_spnego(&self) -> bool;

    async fn authenticate_user(&self, client_info: &[u8], challenge: &[u8]) -> Result<AuthOutcome>;
    async fn authenticate_share_connect(&self, uid: Uid, share_name: &str, password: &[u8]) -> Result<ShareAccess>;
}

/// A single matched entry returned while enumerating a directory.
#[derive(Debug, Clone)]
pub struct FindEntry {
    pub file_name: String,
    pub metadata: FileMetadata,
}

/// Lazy result iterator for a `Trans2FindFirst`/`FindNext` search (spec
/// §6's *SearchContext*).
#[async_trait]
pub trait SearchContext: Send + Sync {
    /// Advances and fills `out` with the next match; returns `false`
    /// once exhausted.
    async fn next_file_info(&mut self, out: &mut Option<FindEntry>) -> Result<bool>;
    /// Resumes from a resume key previously handed back to the client.
    async fn restart_at(&mut self, resume_key: &[u8]) -> Result<()>;
    fn has_more_files(&self) -> bool;
}

/// A file or directory handle as exposed by the filesystem driver.
pub type FileHandle = u64;

/// The storage backend (spec §6's *Filesystem driver (Disk)*). All
/// paths are share-relative; the driver owns translating them to
/// whatever backing store it wraps.
#[async_trait]
pub trait FilesystemDriver: Send + Sync {
    async fn file_exists(&self, share: &str, path: &str) -> Result<bool>;
    async fn open_file(&self, share: &str, path: &str, write_access: bool) -> Result<FileHandle>;
    async fn create_file(&self, share: &str, path: &str, attributes: u32) -> Result<FileHandle>;
    async fn close_file(&self, handle: FileHandle) -> Result<()>;
    async fn read_file(&self, handle: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>>;
    async fn write_file(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<usize>;
    async fn rename_file(&self, share: &str, from: &str, to: &str) -> Result<()>;
    async fn delete_file(&self, share: &str, path: &str) -> Result<()>;
    async fn start_search(&self, share: &str, pattern: &str) -> Result<Box<dyn SearchContext>>;
    async fn get_file_information(&self, handle: FileHandle) -> Result<FileMetadata>;
    async fn tree_opened(&self, share: &str) -> Result<()>;
    async fn tree_closed(&self, share: &str) -> Result<()>;
}

/// A pending directory-watch registration (spec §3's *Notify request*).
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub directory_handle: FileHandle,
    pub filter_mask: u32,
    pub watch_subtree: bool,
    pub mid: u16,
    pub pid: u32,
    pub tid: u16,
    pub uid: Uid,
}

/// Delivers asynchronous directory-change events (spec §6's
/// *Change-notify handler*). `queue` is the registering session's own
/// async-reply queue: when a matching change fires, the handler pushes
/// the completed reply onto it directly, from whatever task noticed the
/// change, without needing a `&mut Session` (spec §4.7).
#[async_trait]
pub trait ChangeNotifyHandler: Send + Sync {
    async fn add_notify_request(&self, request: NotifyRequest, queue: AsyncQueueHandle) -> Result<()>;
    async fn remove_notify_requests(&self, session_id: u64) -> Result<()>;
}

/// Share kind, used by the dispatcher to decide IPC routing and
/// default access predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareType {
    Disk,
    AdminPipe,
    Printer,
    Unknown,
}

/// A resolved, bindable share (spec §6's *Share registry*).
#[derive(Debug, Clone)]
pub struct SharedDevice {
    pub name: String,
    pub share_type: ShareType,
    pub access: ShareAccess,
}

#[async_trait]
pub trait ShareRegistry: Send + Sync {
    async fn find_share(&self, name: &str, share_type: ShareType, uid: Uid, create: bool) -> Result<Option<SharedDevice>>;
}

/// Routes IPC$ (named-pipe/DCE-RPC) traffic, kept opaque to the
/// dispatcher (spec §6's *IPC handler*).
#[async_trait]
pub trait IpcHandler: Send + Sync {
    async fn process_ipc_request(&self, uid: Uid, request: &[u8]) -> Result<Vec<u8>>;
    async fn process_transaction(&self, uid: Uid, params: &[u8], data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;
}
