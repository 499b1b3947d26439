//! Per-command handlers invoked by [`super::Dispatcher`]. Each handler
//! receives the command's already-separated parameter words and byte
//! area and returns a [`super::HandlerOutcome`] (spec §4.6's
//! opcode-to-handler mapping).

use crate::collaborators::{FileHandle, FindEntry, NotifyRequest, ShareAccess, ShareType};
use crate::config::Dialect;
use crate::error::{Error, Result, SmbStatus};
use crate::packets::smb1::bytearea::{ByteAreaReader, ByteAreaWriter};
use crate::packets::smb1::info_level::{self, InfoLevel};
use crate::packets::smb1::negotiate::{self, CoreResponse, LanManResponse, NtResponse, SecurityBlob};
use crate::packets::smb1::transact::{TransactKind, TransactionReassembly};
use crate::packets::smb1::Command;
use crate::session::tree::{Fid, NetworkFile, Tid, TreeConnection};
use crate::session::vc::{SearchId, Uid, VirtualCircuit};
use crate::session::Session;

use super::{Dispatcher, HandlerOutcome, ParsedBlock};

pub async fn dispatch_command(
    d: &Dispatcher,
    session: &mut Session,
    command: Command,
    tid: u16,
    uid: u16,
    mid: u16,
    pid: u32,
    is_unicode: bool,
    block: &ParsedBlock,
) -> Result<HandlerOutcome> {
    match command {
        Command::Negotiate => negotiate_handler(d, session, &block.byte_area),
        Command::SessionSetupAndX => session_setup(d, session, pid, &block.params, &block.byte_area, is_unicode).await,
        Command::TreeConnectAndX => tree_connect(d, session, uid, &block.params, &block.byte_area, is_unicode).await,
        Command::TreeDisconnect => tree_disconnect(session, uid, tid),
        Command::LogoffAndX => logoff(d, session, uid, pid).await,
        Command::Echo => echo(&block.params, &block.byte_area),
        Command::NtCreateAndX => nt_create(d, session, uid, tid, &block.params, &block.byte_area).await,
        Command::Close => close_file(session, uid, tid, &block.params),
        Command::ReadAndX => read_andx(d, session, uid, tid, &block.params).await,
        Command::WriteAndX => write_andx(d, session, uid, tid, &block.params, &block.byte_area).await,
        Command::Transaction2 => transaction2(d, session, uid, tid, &block.params, &block.byte_area, is_unicode).await,
        Command::Transaction2Secondary => {
            transaction2_secondary(d, session, uid, tid, &block.params, &block.byte_area, is_unicode).await
        }
        Command::NtTransact => nt_transact(d, session, uid, tid, mid, pid, &block.params, &block.byte_area).await,
        Command::NtCancel => nt_cancel(d, session, mid).await,
        Command::FindClose2 => find_close2(session, uid, &block.params),
        _ => Err(Error::Status(SmbStatus::NOT_SUPPORTED)),
    }
}

fn resolve_vc(session: &Session, uid: Uid) -> Result<&crate::session::vc::VirtualCircuit> {
    session.virtual_circuits.get(uid).ok_or(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR))
}

fn resolve_vc_mut(session: &mut Session, uid: Uid) -> Result<&mut crate::session::vc::VirtualCircuit> {
    session.virtual_circuits.get_mut(uid).ok_or(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR))
}

fn resolve_tree<'a>(vc: &'a crate::session::vc::VirtualCircuit, tid: Tid) -> Result<&'a TreeConnection> {
    vc.tree(tid).ok_or(Error::Status(SmbStatus::INVALID_TID))
}

fn resolve_tree_mut<'a>(vc: &'a mut crate::session::vc::VirtualCircuit, tid: Tid) -> Result<&'a mut TreeConnection> {
    vc.tree_mut(tid).ok_or(Error::Status(SmbStatus::INVALID_TID))
}

// ---------------------------------------------------------------- negotiate

fn negotiate_handler(d: &Dispatcher, session: &mut Session, byte_area: &[u8]) -> Result<HandlerOutcome> {
    let offered = negotiate::decode_dialects(byte_area)?;
    let Some((index, dialect)) = negotiate::select_dialect(&offered, &d.config.enabled_dialects) else {
        // No mutually supported dialect: index 0xFFFF, success status
        // (MS-CIFS: this is reported as a successful negotiate with a
        // sentinel index, not an error).
        return Ok(HandlerOutcome::Reply {
            status: SmbStatus::SUCCESS,
            params: vec![0xFFFF],
            byte_area: Vec::new(),
        });
    };

    session.complete_negotiate(dialect)?;

    match dialect {
        Dialect::Core => {
            let mut params = [0u16; 1];
            CoreResponse { dialect_index: index }.encode(&mut params);
            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: params.to_vec(),
                byte_area: Vec::new(),
            })
        }
        Dialect::LanMan => {
            let mut params = [0u16; 13];
            LanManResponse {
                dialect_index: index,
                security_mode: match d.authenticator.access_mode() {
                    crate::config::SecurityMode::User => 1,
                    crate::config::SecurityMode::Share => 0,
                },
                max_buffer_size: d.config.packet_pool_max_size.min(u16::MAX as usize) as u16,
                max_mpx_count: 1,
                max_vcs: d.config.effective_max_circuits().min(u16::MAX as u32) as u16,
                raw_mode: 0,
                session_key: 0,
                server_time: 0,
                server_date: 0,
                server_timezone: 0,
                challenge_len: d.authenticator.auth_context().len() as u16,
            }
            .encode(&mut params);

            let challenge = d.authenticator.auth_context();
            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: params.to_vec(),
                byte_area: challenge,
            })
        }
        Dialect::NtLm => {
            let mut params = [0u16; 17];
            let extended = d.authenticator.has_extended_security();
            let blob = if extended {
                SecurityBlob::Extended {
                    server_guid: crate::packets::guid::Guid::gen(),
                    neg_token_init: d.authenticator.neg_token_init(),
                }
            } else {
                SecurityBlob::Legacy {
                    challenge: d
                        .authenticator
                        .auth_context()
                        .get(..8)
                        .map(|c| c.try_into().unwrap())
                        .unwrap_or([0u8; 8]),
                    domain: d.config.domain.clone(),
                    server: d.config.server_name.clone(),
                }
            };
            let resp = NtResponse {
                dialect_index: index,
                security_mode: match d.authenticator.access_mode() {
                    crate::config::SecurityMode::User => 0x03,
                    crate::config::SecurityMode::Share => 0x00,
                },
                max_mpx_count: 50,
                max_vcs: d.config.effective_max_circuits().min(u16::MAX as u32) as u16,
                max_buffer_size: d.config.packet_pool_max_size as u32,
                max_raw_size: d.config.over_size_ceiling as u32,
                session_key: 0,
                capabilities: negotiate::capabilities::NT_SMBS
                    | negotiate::capabilities::STATUS32
                    | negotiate::capabilities::UNICODE
                    | negotiate::capabilities::LARGE_FILES
                    | if extended { negotiate::capabilities::EXTENDED_SECURITY } else { 0 },
                server_time_nt: unix_epoch_nt_time(),
                server_timezone: 0,
                key_len: d.authenticator.encryption_key_length(),
                security_blob: blob,
            };
            resp.encode(&mut params);

            let mut byte_area = vec![0u8; 512];
            let written = resp.encode_byte_area(&mut byte_area, 0, 0);
            byte_area.truncate(written);

            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: params.to_vec(),
                byte_area,
            })
        }
    }
}

/// The server clock as NT 100ns-since-1601; callers that need a real
/// wall clock substitute their own source. Left at the epoch offset
/// here since negotiate's server-time field is advisory to clients.
fn unix_epoch_nt_time() -> u64 {
    116_444_736_000_000_000
}

// ----------------------------------------------------------- session setup

async fn session_setup(d: &Dispatcher, session: &mut Session, pid: u32, params: &[u16], byte_area: &[u8], unicode: bool) -> Result<HandlerOutcome> {
    if params.len() < 10 {
        return Err(Error::Malformed("SessionSetupAndX word count too small".into()));
    }
    // Common NT-dialect layout: [0]=MaxBufferSize [1]=MaxMpxCount
    // [2]=VcNumber [3..5]=SessionKey [5]=CaseInsensitivePasswordLen
    // [6]=CaseSensitivePasswordLen [7..9]=Reserved [9..11]=Capabilities.
    let case_insensitive_len = params[5] as usize;
    let case_sensitive_len = params[6] as usize;

    let mut r = ByteAreaReader::new(byte_area, 0, 0);
    let case_insensitive_password = read_raw(&mut r, case_insensitive_len)?;
    let case_sensitive_password = read_raw(&mut r, case_sensitive_len)?;
    let account = r.string(unicode).unwrap_or_default();
    let _domain = r.string(unicode).unwrap_or_default();
    let _native_os = r.string(unicode).unwrap_or_default();
    let _native_lan_man = r.string(unicode).unwrap_or_default();

    let credentials = if !case_sensitive_password.is_empty() {
        case_sensitive_password
    } else {
        case_insensitive_password
    };

    let outcome = d.authenticator.authenticate_user(account.as_bytes(), &credentials).await?;
    use crate::collaborators::AuthOutcome;
    if outcome == AuthOutcome::Denied {
        return Err(Error::Status(SmbStatus::LOGON_FAILURE));
    }

    let uid = session
        .virtual_circuits
        .allocate(account, outcome == AuthOutcome::Guest, 64, 64)?;
    session.complete_session_setup(pid)?;

    let action = if outcome == AuthOutcome::Guest { 1u16 } else { 0u16 };
    let mut params_out = vec![action];
    let mut w = Vec::new();
    {
        let mut byte_area_buf = vec![0u8; 128];
        let mut bw = ByteAreaWriter::new(&mut byte_area_buf, 0, 0);
        bw.string("RUSTSMB", unicode);
        bw.string(&d.config.domain, unicode);
        let n = bw.position();
        w = byte_area_buf[..n].to_vec();
    }
    params_out[0] = action;
    // UID is carried in the header by the caller, not in these params.
    let _ = uid;
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: params_out,
        byte_area: w,
    })
}

fn read_raw(r: &mut ByteAreaReader, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(r.byte()?);
    }
    Ok(out)
}

// ------------------------------------------------------------- tree connect

async fn tree_connect(d: &Dispatcher, session: &mut Session, uid: u16, _params: &[u16], byte_area: &[u8], unicode: bool) -> Result<HandlerOutcome> {
    let mut r = ByteAreaReader::new(byte_area, 0, 0);
    let path = r.string(false)?; // path is always non-Unicode in TreeConnectAndX
    let _password = path.clone(); // placeholder; password precedes path per wire order in share-mode auth
    let service = r.string(unicode).unwrap_or_else(|_| "?????".to_string());

    let share_name = path.rsplit('\\').next().unwrap_or(&path).to_string();
    let requested_type = match service.as_str() {
        "IPC" => ShareType::AdminPipe,
        "A:" | "DISK" => ShareType::Disk,
        "LPT1:" | "PRINTER" => ShareType::Printer,
        _ => ShareType::Unknown,
    };

    let share = d
        .shares
        .find_share(&share_name, requested_type, uid, false)
        .await?
        .ok_or(Error::Status(SmbStatus::OBJECT_PATH_NOT_FOUND))?;

    if share.access == ShareAccess::NoAccess {
        return Err(Error::Status(SmbStatus::ACCESS_DENIED));
    }

    if share.share_type == ShareType::Disk {
        d.filesystem.tree_opened(&share.name).await?;
    }

    let tree = TreeConnection::new(0, share.name.clone(), share.share_type, share.access, 256);
    let vc = resolve_vc_mut(session, uid)?;
    let tid = vc.connect_tree(tree)?;
    if let Some(t) = vc.tree_mut(tid) {
        t.tid = tid;
    }

    let service_reply = match share.share_type {
        ShareType::Disk => "A:",
        ShareType::AdminPipe => "IPC",
        ShareType::Printer => "LPT1:",
        ShareType::Unknown => "?????",
    };
    let mut byte_area_buf = vec![0u8; 64];
    let mut w = ByteAreaWriter::new(&mut byte_area_buf, 0, 0);
    w.string(service_reply, false);
    w.string("", unicode); // native file system: empty (no FAT/NTFS claim)
    let n = w.position();
    byte_area_buf.truncate(n);

    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: vec![0, 0, 0], // OptionalSupport, (reserved in some dialects)
        byte_area: byte_area_buf,
    })
}

fn tree_disconnect(session: &mut Session, uid: u16, tid: u16) -> Result<HandlerOutcome> {
    let vc = resolve_vc_mut(session, uid)?;
    let tree = vc.disconnect_tree(tid).ok_or(Error::Status(SmbStatus::INVALID_TID))?;
    session.notify_list.remove_for_tree(tid);
    let _ = tree;
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: Vec::new(),
        byte_area: Vec::new(),
    })
}

async fn logoff(d: &Dispatcher, session: &mut Session, uid: u16, pid: u32) -> Result<HandlerOutcome> {
    let vc = session.virtual_circuits.remove(uid).ok_or(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR))?;
    for tid in vc.all_tree_ids() {
        session.notify_list.remove_for_tree(tid);
    }
    d.notify.remove_notify_requests(session.id).await?;
    session.clear_scratch_for_pid(pid);
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: Vec::new(),
        byte_area: Vec::new(),
    })
}

fn echo(params: &[u16], byte_area: &[u8]) -> Result<HandlerOutcome> {
    let echo_count = params.first().copied().unwrap_or(1).max(1);
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: vec![echo_count],
        byte_area: byte_area.to_vec(),
    })
}

// ----------------------------------------------------------------- files

async fn nt_create(d: &Dispatcher, session: &mut Session, uid: u16, tid: u16, params: &[u16], byte_area: &[u8]) -> Result<HandlerOutcome> {
    if params.len() < 12 {
        return Err(Error::Malformed("NtCreateAndX word count too small".into()));
    }
    let name_len = params[1] as usize;
    let disposition = params[10] as u32;

    let mut r = ByteAreaReader::new(byte_area, 0, 0);
    r.word_align();
    let mut name_bytes = Vec::with_capacity(name_len);
    for _ in 0..name_len / 2 {
        name_bytes.push(r.word()?);
    }
    let path = String::from_utf16_lossy(&name_bytes);

    let vc = resolve_vc_mut(session, uid)?;
    let tree = resolve_tree_mut(vc, tid)?;
    let write_access = disposition != 1; // FILE_OPEN == 1 is read-oriented in practice; create/overwrite need write
    tree.check_access(write_access)?;

    let exists = d.filesystem.file_exists(&tree.share_name, &path).await?;
    let handle: FileHandle = if exists {
        d.filesystem.open_file(&tree.share_name, &path, write_access).await?
    } else {
        d.filesystem.create_file(&tree.share_name, &path, 0).await?
    };
    let meta = d.filesystem.get_file_information(handle).await?;

    let fid = tree.open_file(NetworkFile {
        handle,
        path,
        write_access,
        delete_on_close: false,
    })?;

    let mut params_out = vec![0u16; 34];
    params_out[2] = fid; // FID lands at offset 2 of NT_CREATE_ANDX's own params (post AndX header, stripped already)
    params_out[3] = if meta.is_directory { 1 } else { 0 }; // create action: opened
    params_out[26] = meta.is_directory as u16;
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: params_out,
        byte_area: Vec::new(),
    })
}

fn close_file(session: &mut Session, uid: u16, tid: u16, params: &[u16]) -> Result<HandlerOutcome> {
    let fid: Fid = *params.first().ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
    let vc = resolve_vc_mut(session, uid)?;
    let tree = resolve_tree_mut(vc, tid)?;
    tree.close_file(fid).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: Vec::new(),
        byte_area: Vec::new(),
    })
}

async fn read_andx(d: &Dispatcher, session: &mut Session, uid: u16, tid: u16, params: &[u16]) -> Result<HandlerOutcome> {
    if params.len() < 7 {
        return Err(Error::Malformed("ReadAndX word count too small".into()));
    }
    let fid = params[0];
    let offset = (params[1] as u64) | ((params[2] as u64) << 16);
    let max_count = params[3] as usize;

    let vc = resolve_vc(session, uid)?;
    let tree = resolve_tree(vc, tid)?;
    tree.check_access(false)?;
    let handle = tree.file(fid).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?.handle;

    let data = d.filesystem.read_file(handle, offset, max_count).await?;

    let mut params_out = vec![0u16; 9];
    params_out[4] = data.len() as u16;
    params_out[5] = 59; // data offset from header start: fixed for ReadAndX's own 12-word reply + AndX header
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: params_out,
        byte_area: data,
    })
}

async fn write_andx(d: &Dispatcher, session: &mut Session, uid: u16, tid: u16, params: &[u16], byte_area: &[u8]) -> Result<HandlerOutcome> {
    if params.len() < 9 {
        return Err(Error::Malformed("WriteAndX word count too small".into()));
    }
    let fid = params[0];
    let offset = (params[1] as u64) | ((params[2] as u64) << 16);
    let data_len = params[8] as usize;

    let vc = resolve_vc(session, uid)?;
    let tree = resolve_tree(vc, tid)?;

    let data = &byte_area[..data_len.min(byte_area.len())];

    if tree.is_admin_pipe() {
        let reply = d.ipc.process_ipc_request(uid, data).await?;
        let mut params_out = vec![0u16; 6];
        params_out[2] = reply.len() as u16;
        return Ok(HandlerOutcome::Reply {
            status: SmbStatus::SUCCESS,
            params: params_out,
            byte_area: Vec::new(),
        });
    }

    tree.check_access(true)?;
    let handle = tree.file(fid).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?.handle;
    let written = d.filesystem.write_file(handle, offset, data).await?;

    let mut params_out = vec![0u16; 6];
    params_out[2] = written as u16;
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: params_out,
        byte_area: Vec::new(),
    })
}

// --------------------------------------------------------------- Trans2

const TRANS2_QUERY_PATH_INFORMATION: u16 = 0x0005;
const TRANS2_QUERY_FILE_INFORMATION: u16 = 0x0007;

async fn transaction2(
    d: &Dispatcher,
    session: &mut Session,
    uid: u16,
    tid: u16,
    params: &[u16],
    byte_area: &[u8],
    unicode: bool,
) -> Result<HandlerOutcome> {
    if params.len() < 14 {
        return Err(Error::Malformed("Transaction2 word count too small".into()));
    }
    let total_param_count = params[0] as usize;
    let total_data_count = params[1] as usize;
    let param_count = params[9] as usize;
    let param_offset = params[10] as usize;
    let data_count = params[11] as usize;
    let data_offset = params[12] as usize;
    let setup_count = params[13] as usize;
    let setup: Vec<u16> = params.get(14..14 + setup_count).map(|s| s.to_vec()).unwrap_or_default();

    // Offsets in the request are absolute from the start of the SMB
    // header; byte_area here starts right after this block's own byte
    // count field, so translate by subtracting that start (already
    // handled upstream -- byte_area is relative to its own start at 0).
    let param_bytes = slice_at(byte_area, param_offset, param_count)?;
    let data_bytes = slice_at(byte_area, data_offset, data_count)?;

    let vc = resolve_vc_mut(session, uid)?;
    let is_admin_pipe = resolve_tree_mut(vc, tid)?.is_admin_pipe(); // also validates TID

    if param_count == total_param_count && data_count == total_data_count {
        if is_admin_pipe {
            let (out_params, out_data) = d.ipc.process_transaction(uid, param_bytes, data_bytes).await?;
            let mut reply = out_params;
            reply.extend_from_slice(&out_data);
            return Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: vec![0; 10],
                byte_area: reply,
            });
        }
        dispatch_trans2_function(d, vc, tid, &setup, param_bytes, data_bytes, unicode).await
    } else {
        let mut reassembly = TransactionReassembly::new(TransactKind::Transaction2, total_param_count, total_data_count, setup);
        reassembly.add_params(0, param_bytes)?;
        reassembly.add_data(0, data_bytes)?;
        vc.begin_transaction(reassembly)?;
        Ok(HandlerOutcome::Reply {
            status: SmbStatus::SUCCESS,
            params: vec![0; 10],
            byte_area: Vec::new(),
        })
    }
}

async fn transaction2_secondary(
    d: &Dispatcher,
    session: &mut Session,
    uid: u16,
    tid: u16,
    params: &[u16],
    byte_area: &[u8],
    unicode: bool,
) -> Result<HandlerOutcome> {
    if params.len() < 9 {
        return Err(Error::Malformed("Transaction2Secondary word count too small".into()));
    }
    let param_count = params[2] as usize;
    let param_offset = params[3] as usize;
    let param_displacement = params[4] as usize;
    let data_count = params[5] as usize;
    let data_offset = params[6] as usize;
    let data_displacement = params[7] as usize;

    let param_bytes = slice_at(byte_area, param_offset, param_count)?;
    let data_bytes = slice_at(byte_area, data_offset, data_count)?;

    let is_complete = {
        let vc = resolve_vc_mut(session, uid)?;
        let reassembly = vc.transaction_mut().ok_or(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR))?;
        reassembly.add_params(param_displacement, param_bytes)?;
        reassembly.add_data(data_displacement, data_bytes)?;
        reassembly.is_complete()
    };

    if !is_complete {
        return Ok(HandlerOutcome::Reply {
            status: SmbStatus::SUCCESS,
            params: Vec::new(),
            byte_area: Vec::new(),
        });
    }

    // Completion: take the slot so a racing secondary can't double-commit
    // (spec §5's single-slot invariant), then run the real dispatch.
    let vc = resolve_vc_mut(session, uid)?;
    let reassembly = vc.take_transaction().ok_or(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR))?;
    let setup = reassembly.setup().to_vec();
    let (params_buf, data_buf) = reassembly.into_parts();

    dispatch_trans2_function(d, vc, tid, &setup, &params_buf, &data_buf, unicode).await
}

const TRANS2_FIND_FIRST2: u16 = 0x0001;
const TRANS2_FIND_NEXT2: u16 = 0x0002;

/// `Flags` bit shared by `Trans2FindFirst2`'s and `Trans2FindNext2`'s
/// request parameters: release the search slot as soon as this reply
/// is sent, regardless of whether more matches remain.
const FIND_CLOSE_AFTER_REQUEST: u16 = 0x0001;

async fn dispatch_trans2_function(
    d: &Dispatcher,
    vc: &mut VirtualCircuit,
    tid: Tid,
    setup: &[u16],
    param_bytes: &[u8],
    _data_bytes: &[u8],
    unicode: bool,
) -> Result<HandlerOutcome> {
    let function = setup.first().copied().unwrap_or(0);

    match function {
        TRANS2_QUERY_PATH_INFORMATION | TRANS2_QUERY_FILE_INFORMATION => {
            let tree = resolve_tree(vc, tid)?;
            // QUERY_FILE_INFORMATION's parameter block is Fid(u16) then
            // InformationLevel(u16); QUERY_PATH_INFORMATION has no Fid,
            // just InformationLevel at offset 0 followed by the path.
            let handle = if function == TRANS2_QUERY_FILE_INFORMATION {
                let fid = param_bytes.get(0..2).map(|b| u16::from_le_bytes([b[0], b[1]])).unwrap_or(0);
                tree.file(fid).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?.handle
            } else {
                return Err(Error::Status(SmbStatus::NOT_SUPPORTED)); // path-based lookup needs driver-side resolution
            };
            let info_level_offset = if function == TRANS2_QUERY_FILE_INFORMATION { 2 } else { 0 };
            let info_level_raw = param_bytes
                .get(info_level_offset..info_level_offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .unwrap_or(0);
            let Some(level) = InfoLevel::from_wire(info_level_raw) else {
                return Err(Error::Status(SmbStatus::NOT_SUPPORTED));
            };
            let meta = d.filesystem.get_file_information(handle).await?;
            let mut data = vec![0u8; 256];
            let n = info_level::pack(level, &meta, unicode, &mut data, 0)?;
            data.truncate(n);
            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: vec![0; 10],
                byte_area: data,
            })
        }
        TRANS2_FIND_FIRST2 => {
            if param_bytes.len() < 12 {
                return Err(Error::Malformed("Trans2FindFirst2 parameter block too short".into()));
            }
            let search_count_max = u16::from_le_bytes([param_bytes[2], param_bytes[3]]) as usize;
            let flags = u16::from_le_bytes([param_bytes[4], param_bytes[5]]);
            let info_level_raw = u16::from_le_bytes([param_bytes[6], param_bytes[7]]);
            let Some(level) = InfoLevel::from_wire(info_level_raw) else {
                return Err(Error::Status(SmbStatus::NOT_SUPPORTED));
            };
            let mut r = ByteAreaReader::new(param_bytes, 12, 0);
            let pattern = r.string(unicode)?;

            let share_name = resolve_tree(vc, tid)?.share_name.clone();
            let mut context = d.filesystem.start_search(&share_name, &pattern).await?;

            // `.` and `..` precede the driver's own matches, per the
            // literal FindFirst2 scenario (spec §8).
            let mut entries = vec![
                FindEntry { file_name: ".".to_string(), metadata: Default::default() },
                FindEntry { file_name: "..".to_string(), metadata: Default::default() },
            ];
            while entries.len() < search_count_max.max(1) {
                let mut out = None;
                if !context.next_file_info(&mut out).await? {
                    break;
                }
                if let Some(entry) = out {
                    entries.push(entry);
                }
            }
            let end_of_search = !context.has_more_files();
            let close_after_request = flags & FIND_CLOSE_AFTER_REQUEST != 0;

            let search_id: SearchId = if close_after_request || end_of_search {
                0
            } else {
                let id = vc.allocate_search_slot()?;
                vc.store_search_context(id, context);
                id
            };

            let data = info_level::pack_find_entries(level, &entries, unicode)?;
            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: vec![search_id, entries.len() as u16, end_of_search as u16, 0, 0],
                byte_area: data,
            })
        }
        TRANS2_FIND_NEXT2 => {
            if param_bytes.len() < 12 {
                return Err(Error::Malformed("Trans2FindNext2 parameter block too short".into()));
            }
            let search_id: SearchId = u16::from_le_bytes([param_bytes[0], param_bytes[1]]);
            let search_count_max = u16::from_le_bytes([param_bytes[2], param_bytes[3]]) as usize;
            let info_level_raw = u16::from_le_bytes([param_bytes[4], param_bytes[5]]);
            let flags = u16::from_le_bytes([param_bytes[10], param_bytes[11]]);
            let Some(level) = InfoLevel::from_wire(info_level_raw) else {
                return Err(Error::Status(SmbStatus::NOT_SUPPORTED));
            };

            let mut context = vc.take_search_context(search_id).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;

            let mut entries = Vec::new();
            while entries.len() < search_count_max.max(1) {
                let mut out = None;
                if !context.next_file_info(&mut out).await? {
                    break;
                }
                if let Some(entry) = out {
                    entries.push(entry);
                }
            }
            let end_of_search = !context.has_more_files();
            let close_after_request = flags & FIND_CLOSE_AFTER_REQUEST != 0;

            if close_after_request || end_of_search {
                vc.release_search_slot(search_id);
            } else {
                vc.store_search_context(search_id, context);
            }

            let data = info_level::pack_find_entries(level, &entries, unicode)?;
            Ok(HandlerOutcome::Reply {
                status: SmbStatus::SUCCESS,
                params: vec![entries.len() as u16, end_of_search as u16, 0, 0],
                byte_area: data,
            })
        }
        _ => Err(Error::Status(SmbStatus::NOT_SUPPORTED)),
    }
}

fn find_close2(session: &mut Session, uid: u16, params: &[u16]) -> Result<HandlerOutcome> {
    let search_id: SearchId = *params.first().ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?;
    let vc = resolve_vc_mut(session, uid)?;
    vc.release_search_slot(search_id);
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: Vec::new(),
        byte_area: Vec::new(),
    })
}

fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    buf.get(offset..offset + len).ok_or_else(|| Error::Malformed("Transaction2 parameter/data offset out of range".into()))
}

// ------------------------------------------------------------ NT Transact

const NT_TRANSACT_NOTIFY_CHANGE: u16 = 4;

/// Only `NT_TRANSACT_NOTIFY_CHANGE` is implemented; everything else this
/// sub-protocol carries (`NT_TRANSACT_CREATE`, `_IOCTL`, `_RENAME`, ...)
/// is out of this server's scope (spec's collaborator surface doesn't
/// cover them). Single-packet only, like `transaction2`'s common path --
/// no secondary-fragment reassembly for NT Transact requests.
async fn nt_transact(
    d: &Dispatcher,
    session: &mut Session,
    uid: u16,
    tid: u16,
    mid: u16,
    pid: u32,
    params: &[u16],
    byte_area: &[u8],
) -> Result<HandlerOutcome> {
    if params.len() < 11 {
        return Err(Error::Malformed("NtTransact word count too small".into()));
    }
    let setup_count = params[10] as usize;
    let setup: Vec<u16> = params.get(11..11 + setup_count).map(|s| s.to_vec()).unwrap_or_default();
    let function = setup.first().copied().unwrap_or(0);

    let vc = resolve_vc(session, uid)?;
    if resolve_tree(vc, tid)?.is_admin_pipe() {
        let param_count = params[5] as usize;
        let param_offset = params[6] as usize;
        let data_count = params[7] as usize;
        let data_offset = params[8] as usize;
        let param_bytes = slice_at(byte_area, param_offset, param_count)?;
        let data_bytes = slice_at(byte_area, data_offset, data_count)?;
        let (out_params, out_data) = d.ipc.process_transaction(uid, param_bytes, data_bytes).await?;
        let mut reply = out_params;
        reply.extend_from_slice(&out_data);
        return Ok(HandlerOutcome::Reply {
            status: SmbStatus::SUCCESS,
            params: vec![0; 18],
            byte_area: reply,
        });
    }

    match function {
        NT_TRANSACT_NOTIFY_CHANGE => {
            let (Some(&filter_lo), Some(&filter_hi)) = (setup.get(1), setup.get(2)) else {
                return Err(Error::Malformed("NT_TRANSACT_NOTIFY_CHANGE setup too short".into()));
            };
            let filter_mask = (filter_lo as u32) | ((filter_hi as u32) << 16);
            let fid = setup.get(3).copied().ok_or_else(|| Error::Malformed("NT_TRANSACT_NOTIFY_CHANGE setup too short".into()))?;
            let watch_subtree = setup.get(4).copied().unwrap_or(0) & 0x00FF != 0;

            let vc = resolve_vc_mut(session, uid)?;
            let tree = resolve_tree_mut(vc, tid)?;
            let directory_handle = tree.file(fid).ok_or(Error::Status(SmbStatus::INVALID_HANDLE))?.handle;

            let request = NotifyRequest { directory_handle, filter_mask, watch_subtree, mid, pid, tid, uid };
            d.notify.add_notify_request(request.clone(), session.async_queue_handle()).await?;
            session.notify_list.add(request);

            Ok(HandlerOutcome::Deferred)
        }
        _ => Err(Error::Status(SmbStatus::NOT_SUPPORTED)),
    }
}

// ------------------------------------------------------------- NT Cancel

/// Unwinds a deferred operation registered under `mid`: the pending
/// response packet (spec §4.6, §4.7) is released unsent, and any
/// matching change-notify registration is dropped so a later event
/// doesn't try to answer a request the client already gave up on.
async fn nt_cancel(d: &Dispatcher, session: &mut Session, mid: u16) -> Result<HandlerOutcome> {
    if let Some(pending) = session.take_pending(mid) {
        d.pool.release(pending).await;
    }
    session.notify_list.remove_by_mid(mid);
    Ok(HandlerOutcome::Reply {
        status: SmbStatus::SUCCESS,
        params: Vec::new(),
        byte_area: Vec::new(),
    })
}
