#![allow(dead_code)]
//! Shared harness for the engine's integration tests: minimal stub
//! collaborators plus raw-packet builders that exercise the dispatcher
//! the same way a real transport would, without opening a socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use smb::asyncq::AsyncQueueHandle;
use smb::collaborators::{
    AuthOutcome, ChangeNotifyHandler, FileHandle, FindEntry, NotifyRequest, SearchContext, ShareAccess, ShareType, SharedDevice,
};
use smb::config::SecurityMode;
use smb::dispatcher::Dispatcher;
use smb::error::{Error, Result, SmbStatus};
use smb::framer::Transport;
use smb::packets::smb1::info_level::FileMetadata;
use smb::pool::{Packet, PacketPool};
use smb::session::vc::Uid;
use smb::Session;

pub struct StubAuthenticator {
    pub valid_password: Vec<u8>,
}

impl StubAuthenticator {
    pub fn new(password: &str) -> Self {
        StubAuthenticator {
            valid_password: password.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl smb::Authenticator for StubAuthenticator {
    fn access_mode(&self) -> SecurityMode {
        SecurityMode::User
    }
    fn encryption_key_length(&self) -> u8 {
        0
    }
    fn auth_context(&self) -> Vec<u8> {
        vec![0xAA; 8]
    }
    fn has_extended_security(&self) -> bool {
        false
    }
    fn neg_token_init(&self) -> Vec<u8> {
        Vec::new()
    }
    fn using_spnego(&self) -> bool {
        false
    }

    async fn authenticate_user(&self, client_info: &[u8], challenge: &[u8]) -> Result<AuthOutcome> {
        if client_info.is_empty() {
            Ok(AuthOutcome::Denied)
        } else if challenge == self.valid_password || challenge.is_empty() {
            Ok(AuthOutcome::Authenticated)
        } else {
            Ok(AuthOutcome::Denied)
        }
    }

    async fn authenticate_share_connect(&self, _uid: Uid, _share_name: &str, _password: &[u8]) -> Result<ShareAccess> {
        Ok(ShareAccess::Writable)
    }
}

/// A single named share backed by an in-memory file table, each file a
/// plain byte buffer keyed by a sequential handle.
pub struct StubFilesystem {
    files: Mutex<HashMap<FileHandle, (String, Vec<u8>)>>,
    next_handle: Mutex<FileHandle>,
}

impl StubFilesystem {
    pub fn new() -> Self {
        StubFilesystem {
            files: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
        }
    }

    /// Seeds a file so tests can open/read it without going through
    /// `create_file` first.
    pub async fn seed(&self, path: &str, content: &[u8]) -> FileHandle {
        let mut next = self.next_handle.lock().await;
        let handle = *next;
        *next += 1;
        self.files.lock().await.insert(handle, (path.to_string(), content.to_vec()));
        handle
    }
}

#[async_trait]
impl smb::FilesystemDriver for StubFilesystem {
    async fn file_exists(&self, _share: &str, path: &str) -> Result<bool> {
        Ok(self.files.lock().await.values().any(|(p, _)| p == path))
    }

    async fn open_file(&self, _share: &str, path: &str, _write_access: bool) -> Result<FileHandle> {
        self.files
            .lock()
            .await
            .iter()
            .find(|(_, (p, _))| p == path)
            .map(|(h, _)| *h)
            .ok_or(Error::Status(SmbStatus::OBJECT_NAME_NOT_FOUND))
    }

    async fn create_file(&self, _share: &str, path: &str, _attributes: u32) -> Result<FileHandle> {
        let mut next = self.next_handle.lock().await;
        let handle = *next;
        *next += 1;
        self.files.lock().await.insert(handle, (path.to_string(), Vec::new()));
        Ok(handle)
    }

    async fn close_file(&self, _handle: FileHandle) -> Result<()> {
        Ok(())
    }

    async fn read_file(&self, handle: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>> {
        let files = self.files.lock().await;
        let (_, content) = files.get(&handle).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
        let offset = offset as usize;
        if offset >= content.len() {
            return Ok(Vec::new());
        }
        let end = (offset + len).min(content.len());
        Ok(content[offset..end].to_vec())
    }

    async fn write_file(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        let mut files = self.files.lock().await;
        let (_, content) = files.get_mut(&handle).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
        let offset = offset as usize;
        if content.len() < offset + data.len() {
            content.resize(offset + data.len(), 0);
        }
        content[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    async fn rename_file(&self, _share: &str, _from: &str, _to: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_file(&self, _share: &str, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn start_search(&self, _share: &str, _pattern: &str) -> Result<Box<dyn SearchContext>> {
        let names: Vec<FindEntry> = self
            .files
            .lock()
            .await
            .values()
            .map(|(p, content)| FindEntry {
                file_name: p.clone(),
                metadata: FileMetadata {
                    end_of_file: content.len() as u64,
                    allocation_size: content.len() as u64,
                    ..Default::default()
                },
            })
            .collect();
        Ok(Box::new(StubSearch { entries: names, pos: 0 }))
    }

    async fn get_file_information(&self, handle: FileHandle) -> Result<FileMetadata> {
        let files = self.files.lock().await;
        let (_, content) = files.get(&handle).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
        Ok(FileMetadata {
            end_of_file: content.len() as u64,
            allocation_size: content.len() as u64,
            is_directory: false,
            ..Default::default()
        })
    }

    async fn tree_opened(&self, _share: &str) -> Result<()> {
        Ok(())
    }

    async fn tree_closed(&self, _share: &str) -> Result<()> {
        Ok(())
    }
}

struct StubSearch {
    entries: Vec<FindEntry>,
    pos: usize,
}

#[async_trait]
impl SearchContext for StubSearch {
    async fn next_file_info(&mut self, out: &mut Option<FindEntry>) -> Result<bool> {
        if self.pos >= self.entries.len() {
            *out = None;
            return Ok(false);
        }
        *out = Some(self.entries[self.pos].clone());
        self.pos += 1;
        Ok(true)
    }

    async fn restart_at(&mut self, _resume_key: &[u8]) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn has_more_files(&self) -> bool {
        self.pos < self.entries.len()
    }
}

pub struct StubShares {
    pub name: String,
    pub access: ShareAccess,
}

#[async_trait]
impl smb::ShareRegistry for StubShares {
    async fn find_share(&self, name: &str, share_type: ShareType, _uid: Uid, _create: bool) -> Result<Option<SharedDevice>> {
        if name.eq_ignore_ascii_case(&self.name) && matches!(share_type, ShareType::Disk | ShareType::Unknown) {
            Ok(Some(SharedDevice {
                name: self.name.clone(),
                share_type: ShareType::Disk,
                access: self.access,
            }))
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
pub struct StubNotify {
    pub added: Mutex<Vec<NotifyRequest>>,
    pub removed_sessions: Mutex<Vec<u64>>,
}

#[async_trait]
impl ChangeNotifyHandler for StubNotify {
    async fn add_notify_request(&self, request: NotifyRequest, _queue: AsyncQueueHandle) -> Result<()> {
        self.added.lock().await.push(request);
        Ok(())
    }

    async fn remove_notify_requests(&self, session_id: u64) -> Result<()> {
        self.removed_sessions.lock().await.push(session_id);
        Ok(())
    }
}

pub struct StubIpc;

#[async_trait]
impl smb::IpcHandler for StubIpc {
    async fn process_ipc_request(&self, _uid: Uid, _request: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Status(SmbStatus::NOT_SUPPORTED))
    }
    async fn process_transaction(&self, _uid: Uid, _params: &[u8], _data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        Err(Error::Status(SmbStatus::NOT_SUPPORTED))
    }
}

pub fn test_dispatcher(shares: StubShares, filesystem: Arc<StubFilesystem>, notify: Arc<StubNotify>) -> Dispatcher {
    let config = Arc::new(smb::ServerConfig::default());
    let pool = Arc::new(PacketPool::new(
        config.packet_pool_max_size,
        config.over_size_ceiling,
        Duration::from_millis(200),
        Duration::from_millis(200),
    ));
    Dispatcher {
        config,
        pool,
        authenticator: Arc::new(StubAuthenticator::new("secret")),
        filesystem,
        shares: Arc::new(shares),
        notify,
        ipc: Arc::new(StubIpc),
    }
}

pub fn test_session() -> Session {
    let addr: SocketAddr = "127.0.0.1:445".parse().unwrap();
    Session::new(Transport::DirectTcp, addr, 16)
}

/// Encodes the request byte area for `SMB_COM_NEGOTIATE`: one
/// `Dialect`-typed (`0x02`) null-terminated string per offered name.
pub fn dialect_bytes(names: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.push(0x02);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

pub fn ascii_cstr(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

pub fn utf16_cstr(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
    out.push(0);
    out.push(0);
    out
}

/// One request block: word-count-prefixed parameter words plus a
/// byte-count-prefixed byte area, optionally preceded by the 3-word
/// AndX header (`AndXCommand`, reserved, `AndXOffset`).
pub struct BlockSpec {
    pub command: u8,
    pub params: Vec<u16>,
    pub byte_area: Vec<u8>,
}

fn encode_block(andx_header: Option<(u8, u16)>, params: &[u16], byte_area: &[u8]) -> Vec<u8> {
    let mut words: Vec<u16> = Vec::new();
    if let Some((next_command, next_offset)) = andx_header {
        words.push(next_command as u16);
        words.push(0); // reserved
        words.push(next_offset);
    }
    words.extend_from_slice(params);

    let mut out = Vec::with_capacity(1 + 2 * words.len() + 2 + byte_area.len());
    out.push(words.len() as u8);
    for w in &words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.extend_from_slice(&(byte_area.len() as u16).to_le_bytes());
    out.extend_from_slice(byte_area);
    out
}

/// Builds a framed request packet (with its response pre-allocated and
/// linked via `associated`) for a single, non-chained command.
pub async fn build_request(pool: &PacketPool, command: u8, tid: u16, uid: u16, mid: u16, pid: u32, params: &[u16], byte_area: &[u8]) -> Packet {
    build_chain(pool, &[BlockSpec { command, params: params.to_vec(), byte_area: byte_area.to_vec() }], tid, uid, mid, pid).await
}

/// Builds a framed request packet containing every entry in `blocks`
/// chained via AndX, in order. Each entry must name a command that
/// actually supports AndX chaining except possibly the last.
pub async fn build_chain(pool: &PacketPool, blocks: &[BlockSpec], tid: u16, uid: u16, mid: u16, pid: u32) -> Packet {
    const ANDX_NO_FURTHER_COMMAND: u8 = 0xFF;

    // First pass: compute each block's size assuming every block before
    // the last carries the 3-word AndX header, to get its start offset.
    let mut sizes = Vec::with_capacity(blocks.len());
    for b in blocks {
        let andx_words = if blocks.len() > 1 { 3 } else { 0 };
        let word_count = andx_words + b.params.len();
        sizes.push(1 + 2 * word_count + 2 + b.byte_area.len());
    }
    let mut offsets = Vec::with_capacity(blocks.len());
    let mut acc = 32usize;
    for s in &sizes {
        offsets.push(acc);
        acc += s;
    }

    let mut body = Vec::new();
    for (i, b) in blocks.iter().enumerate() {
        let andx_header = if blocks.len() > 1 {
            let (next_command, next_offset) = if i + 1 < blocks.len() {
                (blocks[i + 1].command, offsets[i + 1] as u16)
            } else {
                (ANDX_NO_FURTHER_COMMAND, 0u16)
            };
            Some((next_command, next_offset))
        } else {
            None
        };
        body.extend_from_slice(&encode_block(andx_header, &b.params, &b.byte_area));
    }

    let total_len = 32 + body.len();
    let mut packet = pool.allocate(total_len + 4).await.unwrap();
    packet.buf.resize((total_len + 4).max(packet.buf.len()), 0);
    packet.received_len = total_len + 4;

    {
        let mut header = smb::packets::smb1::HeaderView::new(&mut packet.buf, 4);
        header.write_signature();
        header.set_command(blocks[0].command);
        header.set_flags2(smb::packets::smb1::header::flags2::LONG_ERROR_CODE);
        header.set_tid(tid);
        header.set_uid(uid);
        header.set_mid(mid);
        header.set_pid_low((pid & 0xFFFF) as u16);
        header.set_pid_high((pid >> 16) as u16);
    }
    packet.buf[4 + 32..4 + 32 + body.len()].copy_from_slice(&body);

    pool.allocate_with_header(total_len + 4, &mut packet, 32).await.unwrap();
    packet
}

/// Reads the response's overall NT status (the header is always built
/// with `FLG2_LONGERRORCODE` set in these tests) plus its parameter
/// words and byte area. Only valid for a single, non-chained reply
/// block -- chained responses need their own per-block offset walk.
pub fn read_response(packet: &Packet) -> (u32, Vec<u16>, Vec<u8>) {
    let response = packet.associated.as_ref().expect("response packet must be linked");
    let buf = &response.buf;
    let nt_status = u32::from_le_bytes(buf[4 + 5..4 + 9].try_into().unwrap());

    let word_count = buf[4 + 32] as usize;
    let params_start = 4 + 33;
    let params: Vec<u16> = buf[params_start..params_start + 2 * word_count]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let byte_count_at = params_start + 2 * word_count;
    let byte_count = u16::from_le_bytes([buf[byte_count_at], buf[byte_count_at + 1]]) as usize;
    let byte_area = buf[byte_count_at + 2..byte_count_at + 2 + byte_count].to_vec();

    (nt_status, params, byte_area)
}
