//! `smbd`: a minimal SMB1 file server daemon built on the `smb` crate.
//!
//! Serves a single disk share rooted at a local directory, with a
//! fixed username/password pair for authentication. Intended as a
//! runnable demonstration of the engine, not a hardened deployment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::Mutex;

use smb::asyncq::AsyncQueueHandle;
use smb::collaborators::{
    AuthOutcome, ChangeNotifyHandler, FileHandle, FilesystemDriver, FindEntry, NotifyRequest, SearchContext, ShareAccess, ShareRegistry, ShareType,
    SharedDevice,
};
use smb::packets::smb1::info_level::FileMetadata;
use smb::session::vc::Uid;
use smb::{Error, Result, SecurityMode, Server, ServerCollaborators, ServerConfig};

#[derive(Parser)]
#[command(version, about = "SMB1 file server daemon")]
struct Cli {
    /// Directory to serve as the "share" disk share.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[arg(long, default_value = "share")]
    share_name: String,

    #[arg(long, default_value = "guest")]
    username: String,

    #[arg(long, default_value = "")]
    password: String,

    #[arg(long, default_value_t = 445)]
    smb_port: u16,

    #[arg(long, default_value_t = 139)]
    session_port: u16,

    #[arg(long)]
    disable_netbios: bool,

    #[arg(long, default_value_t = 256)]
    max_concurrent_sessions: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = ServerConfig {
        session_port: cli.session_port,
        smb_port: cli.smb_port,
        enable_netbios: !cli.disable_netbios,
        security_mode: SecurityMode::User,
        ..ServerConfig::default()
    };

    let collaborators = ServerCollaborators {
        authenticator: Arc::new(FixedCredentialAuthenticator {
            username: cli.username,
            password: cli.password,
        }),
        filesystem: Arc::new(DiskFilesystemDriver::new(cli.root)),
        shares: Arc::new(SingleShareRegistry {
            name: cli.share_name,
        }),
        notify: Arc::new(NoopNotifyHandler),
        ipc: Arc::new(UnsupportedIpcHandler),
    };

    let server = Server::new(config, collaborators, cli.max_concurrent_sessions);
    server.run().await
}

/// Accepts exactly one username/password pair; every other login is
/// denied. Extended security (SPNEGO) is not offered, since this demo
/// has no Kerberos/NTLM backend to negotiate with.
struct FixedCredentialAuthenticator {
    username: String,
    password: String,
}

#[async_trait]
impl smb::Authenticator for FixedCredentialAuthenticator {
    fn access_mode(&self) -> SecurityMode {
        SecurityMode::User
    }

    fn encryption_key_length(&self) -> u8 {
        0
    }

    fn auth_context(&self) -> Vec<u8> {
        vec![0u8; 8]
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

    async fn authenticate_user(&self, client_info: &[u8], _challenge: &[u8]) -> Result<AuthOutcome> {
        if client_info == self.username.as_bytes() {
            Ok(AuthOutcome::Authenticated)
        } else if client_info.is_empty() {
            Ok(AuthOutcome::Guest)
        } else {
            Ok(AuthOutcome::Denied)
        }
    }

    async fn authenticate_share_connect(&self, _uid: Uid, _share_name: &str, password: &[u8]) -> Result<ShareAccess> {
        if password.is_empty() || password == self.password.as_bytes() {
            Ok(ShareAccess::Writable)
        } else {
            Ok(ShareAccess::NoAccess)
        }
    }
}

/// Serves exactly one disk share, ignoring any other requested name.
struct SingleShareRegistry {
    name: String,
}

#[async_trait]
impl ShareRegistry for SingleShareRegistry {
    async fn find_share(&self, name: &str, share_type: ShareType, _uid: Uid, _create: bool) -> Result<Option<SharedDevice>> {
        if name.eq_ignore_ascii_case(&self.name) && matches!(share_type, ShareType::Disk | ShareType::Unknown) {
            Ok(Some(SharedDevice {
                name: self.name.clone(),
                share_type: ShareType::Disk,
                access: ShareAccess::Writable,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Discards every notify registration; this demo never delivers
/// asynchronous directory-change events.
struct NoopNotifyHandler;

#[async_trait]
impl ChangeNotifyHandler for NoopNotifyHandler {
    async fn add_notify_request(&self, _request: NotifyRequest, _queue: AsyncQueueHandle) -> Result<()> {
        Ok(())
    }

    async fn remove_notify_requests(&self, _session_id: u64) -> Result<()> {
        Ok(())
    }
}

struct UnsupportedIpcHandler;

#[async_trait]
impl smb::IpcHandler for UnsupportedIpcHandler {
    async fn process_ipc_request(&self, _uid: Uid, _request: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Status(smb::error::SmbStatus::NOT_SUPPORTED))
    }

    async fn process_transaction(&self, _uid: Uid, _params: &[u8], _data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        Err(Error::Status(smb::error::SmbStatus::NOT_SUPPORTED))
    }
}

/// Maps every open file handle to a real path under `root`, backed by
/// `tokio::fs`. File handles are small sequential integers, tracked in
/// a lock-protected table rather than relying on OS file descriptors
/// staying numerically stable.
struct DiskFilesystemDriver {
    root: PathBuf,
    open: Mutex<HashMap<FileHandle, PathBuf>>,
    next_handle: Mutex<FileHandle>,
}

impl DiskFilesystemDriver {
    fn new(root: PathBuf) -> Self {
        DiskFilesystemDriver {
            root,
            open: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
        }
    }

    /// Resolves a share-relative SMB path (`\`-separated) to a real
    /// path under `root`, rejecting `..` components so a client can't
    /// escape the share.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut real = self.root.clone();
        for part in path.split(['\\', '/']).filter(|p| !p.is_empty()) {
            if part == ".." {
                return Err(Error::Status(smb::error::SmbStatus::ACCESS_DENIED));
            }
            real.push(part);
        }
        Ok(real)
    }

    async fn allocate_handle(&self, path: PathBuf) -> FileHandle {
        let mut next = self.next_handle.lock().await;
        let handle = *next;
        *next += 1;
        self.open.lock().await.insert(handle, path);
        handle
    }

    async fn path_for(&self, handle: FileHandle) -> Result<PathBuf> {
        self.open
            .lock()
            .await
            .get(&handle)
            .cloned()
            .ok_or(Error::Status(smb::error::SmbStatus::INVALID_HANDLE))
    }
}

#[async_trait]
impl FilesystemDriver for DiskFilesystemDriver {
    async fn file_exists(&self, _share: &str, path: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.resolve(path)?).await.is_ok())
    }

    async fn open_file(&self, _share: &str, path: &str, _write_access: bool) -> Result<FileHandle> {
        let real = self.resolve(path)?;
        tokio::fs::metadata(&real).await.map_err(Error::Io)?;
        Ok(self.allocate_handle(real).await)
    }

    async fn create_file(&self, _share: &str, path: &str, _attributes: u32) -> Result<FileHandle> {
        let real = self.resolve(path)?;
        if let Some(parent) = real.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        tokio::fs::File::create(&real).await.map_err(Error::Io)?;
        Ok(self.allocate_handle(real).await)
    }

    async fn close_file(&self, handle: FileHandle) -> Result<()> {
        self.open.lock().await.remove(&handle);
        Ok(())
    }

    async fn read_file(&self, handle: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let real = self.path_for(handle).await?;
        let mut file = tokio::fs::File::open(&real).await.map_err(Error::Io)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(Error::Io)?;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf).await.map_err(Error::Io)?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn write_file(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};
        let real = self.path_for(handle).await?;
        let mut file = tokio::fs::OpenOptions::new().write(true).open(&real).await.map_err(Error::Io)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(Error::Io)?;
        file.write_all(data).await.map_err(Error::Io)?;
        Ok(data.len())
    }

    async fn rename_file(&self, _share: &str, from: &str, to: &str) -> Result<()> {
        tokio::fs::rename(self.resolve(from)?, self.resolve(to)?).await.map_err(Error::Io)
    }

    async fn delete_file(&self, _share: &str, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(path)?).await.map_err(Error::Io)
    }

    async fn start_search(&self, _share: &str, pattern: &str) -> Result<Box<dyn SearchContext>> {
        let real = self.resolve(pattern.trim_end_matches("\\*"))?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&real).await.map_err(Error::Io)?;
        while let Some(entry) = dir.next_entry().await.map_err(Error::Io)? {
            let metadata = entry.metadata().await.map_err(Error::Io)?;
            entries.push(FindEntry {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                metadata: metadata_to_file_metadata(&metadata),
            });
        }
        Ok(Box::new(EagerSearchContext { entries, position: 0 }))
    }

    async fn get_file_information(&self, handle: FileHandle) -> Result<FileMetadata> {
        let real = self.path_for(handle).await?;
        let metadata = tokio::fs::metadata(&real).await.map_err(Error::Io)?;
        Ok(metadata_to_file_metadata(&metadata))
    }

    async fn tree_opened(&self, _share: &str) -> Result<()> {
        Ok(())
    }

    async fn tree_closed(&self, _share: &str) -> Result<()> {
        Ok(())
    }
}

fn metadata_to_file_metadata(metadata: &std::fs::Metadata) -> FileMetadata {
    let nt_time = |t: std::io::Result<std::time::SystemTime>| -> u64 {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() * 10_000_000 + 116_444_736_000_000_000)
            .unwrap_or(0)
    };
    FileMetadata {
        creation_time_nt: nt_time(metadata.created()),
        last_access_time_nt: nt_time(metadata.accessed()),
        last_write_time_nt: nt_time(metadata.modified()),
        change_time_nt: nt_time(metadata.modified()),
        attributes: if metadata.is_dir() { 0x10 } else { 0x20 },
        allocation_size: metadata.len(),
        end_of_file: metadata.len(),
        number_of_links: 1,
        delete_pending: false,
        is_directory: metadata.is_dir(),
        ea_size: 0,
        file_index: 0,
        current_position: 0,
        file_name: String::new(),
    }
}

/// A [`SearchContext`] that lists a whole directory up front; adequate
/// for the modest directory sizes this demo targets.
struct EagerSearchContext {
    entries: Vec<FindEntry>,
    position: usize,
}

#[async_trait]
impl SearchContext for EagerSearchContext {
    async fn next_file_info(&mut self, out: &mut Option<FindEntry>) -> Result<bool> {
        if self.position >= self.entries.len() {
            *out = None;
            return Ok(false);
        }
        *out = Some(self.entries[self.position].clone());
        self.position += 1;
        Ok(true)
    }

    async fn restart_at(&mut self, resume_key: &[u8]) -> Result<()> {
        if resume_key.len() == 4 {
            self.position = u32::from_le_bytes(resume_key.try_into().unwrap()) as usize;
        }
        Ok(())
    }

    fn has_more_files(&self) -> bool {
        self.position < self.entries.len()
    }
}

#[allow(dead_code)]
fn _unused_path_hint(p: &Path) -> &Path {
    p
}
