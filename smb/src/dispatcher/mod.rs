//! Opcode dispatch, chained `AndX` execution, and transaction routing
//! (spec §4.6).

mod handlers;

use std::cell::Cell;
use std::sync::Arc;

use crate::collaborators::{Authenticator, ChangeNotifyHandler, FilesystemDriver, IpcHandler, ShareRegistry};
use crate::config::ServerConfig;
use crate::error::{Error, Result, SmbStatus};
use crate::packets::smb1::andx::{self, ANDX_NO_FURTHER_COMMAND};
use crate::packets::smb1::header::HeaderView;
use crate::packets::smb1::Command;
use crate::pool::{Packet, PacketPool};
use crate::session::Session;

/// One parsed request block: the fixed-header command for the first
/// block, or the preceding block's `AndXCommand` for later ones, plus
/// its own parameter words and byte area, copied out of the request
/// buffer so handlers don't fight the borrow checker against the
/// buffer they're also writing a reply into.
pub struct ParsedBlock {
    pub command: u8,
    pub params: Vec<u16>,
    pub byte_area: Vec<u8>,
    pub is_andx: bool,
}

/// What a per-command handler hands back to the dispatcher: the reply
/// parameter words and byte area to pack into this block's slot in the
/// response, or a deferred signal (spec §4.6's deferred completion),
/// or a fatal transport-level outcome.
pub enum HandlerOutcome {
    Reply { status: SmbStatus, params: Vec<u16>, byte_area: Vec<u8> },
    Deferred,
}

/// What [`Dispatcher::dispatch`] actually did with the request's
/// pre-allocated response packet: wrote a reply of `len` bytes into it,
/// or handed it off to `session.pending_operations` because every
/// block in the chain deferred (spec §4.6, §4.7).
pub enum DispatchOutcome {
    Replied { len: usize },
    Deferred,
}

pub struct Dispatcher {
    pub config: Arc<ServerConfig>,
    pub pool: Arc<PacketPool>,
    pub authenticator: Arc<dyn Authenticator>,
    pub filesystem: Arc<dyn FilesystemDriver>,
    pub shares: Arc<dyn ShareRegistry>,
    pub notify: Arc<dyn ChangeNotifyHandler>,
    pub ipc: Arc<dyn IpcHandler>,
}

impl Dispatcher {
    /// Parses the request's fixed header plus every chained `AndX`
    /// block into owned [`ParsedBlock`]s (spec §4.3, §4.6).
    fn parse_chain(&self, request: &mut Packet) -> Result<(u8, u16, u16, u16, u32, u16, bool, bool, Vec<ParsedBlock>)> {
        let message_len = request.received_len;
        let header = HeaderView::new(&mut request.buf, 4);
        if !header.check_signature() {
            return Err(Error::Status(SmbStatus::UNRECOGNIZED_COMMAND));
        }
        let first_command = header.command();
        let tid = header.tid();
        let uid = header.uid();
        let mid = header.mid();
        let pid = header.pid();
        let is_long_error_code = header.is_long_error_code();
        let is_unicode = header.is_unicode();

        let andx_capable = Command::from_wire(first_command).map(Command::supports_andx).unwrap_or(false);

        let mut blocks = Vec::new();
        if !andx_capable {
            let (params, byte_area) = read_block_at(&request.buf, 4, 32)?;
            blocks.push(ParsedBlock {
                command: first_command,
                params,
                byte_area,
                is_andx: false,
            });
        } else {
            let pending_command = Cell::new(first_command);
            let links = andx::walk_chain(
                32,
                message_len,
                |offset| {
                    if offset == 32 {
                        Ok(first_command)
                    } else {
                        Ok(pending_command.get())
                    }
                },
                |offset| {
                    let (params, _) = read_block_at(&request.buf, 4, offset)?;
                    if params.len() < 3 {
                        return Err(Error::Malformed("AndX block too short for AndX header words".into()));
                    }
                    pending_command.set(params[0] as u8);
                    Ok(params[2])
                },
            )?;

            for link in &links {
                let (params, byte_area) = read_block_at(&request.buf, 4, link.block_offset)?;
                // `is_andx` reflects the command's own reply shape
                // (whether it carries the 3-word AndX header), which
                // holds regardless of whether anything further chains
                // off it (spec §4.3): every block reached via an
                // AndXOffset is itself an AndX-capable command.
                let is_andx = Command::from_wire(link.command).map(Command::supports_andx).unwrap_or(false);
                // The first 3 words of an AndX block are bookkeeping
                // (AndXCommand, reserved, AndXOffset), not the
                // command's own parameters.
                let params = params.get(3..).map(|s| s.to_vec()).unwrap_or_default();
                blocks.push(ParsedBlock {
                    command: link.command,
                    params,
                    byte_area,
                    is_andx,
                });
            }
        }

        Ok((first_command, tid, uid, mid, pid, header.flags2(), is_long_error_code, is_unicode, blocks))
    }

    /// Dispatches one fully-received SMB1 request, writing the
    /// response into `request`'s pre-allocated associated packet -- or,
    /// if every block in the chain deferred, moving that packet into
    /// `session.pending_operations` instead of writing anything (spec
    /// §4.6, §4.7's deferred-completion contract).
    pub async fn dispatch(&self, session: &mut Session, request: &mut Packet) -> Result<DispatchOutcome> {
        let (_first_command, tid, uid, mid, pid, _flags2, is_long_error_code, is_unicode, blocks) =
            self.parse_chain(request)?;

        let mut outcomes = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let outcome = self
                .dispatch_block(session, tid, uid, mid, pid, is_unicode, block)
                .await
                .unwrap_or_else(|e| HandlerOutcome::Reply {
                    status: e.to_status(),
                    params: Vec::new(),
                    byte_area: Vec::new(),
                });
            let is_error = matches!(&outcome, HandlerOutcome::Reply { status, .. } if !status.is_success());
            outcomes.push(outcome);
            if is_error {
                break; // chained execution stops at the first error (spec §4.6)
            }
        }

        let fully_deferred = !outcomes.is_empty() && outcomes.iter().all(|o| matches!(o, HandlerOutcome::Deferred));
        if fully_deferred {
            if let Some(response) = request.associated.take() {
                session.register_pending(mid, *response);
            }
            return Ok(DispatchOutcome::Deferred);
        }

        let response = request
            .associated
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("dispatch called without a pre-allocated response packet".into()))?;

        let commands: Vec<u8> = blocks.iter().map(|b| b.command).collect();
        let andx_flags: Vec<bool> = blocks.iter().map(|b| b.is_andx).collect();
        let len = encode_chain(response, mid, is_long_error_code, &commands, &andx_flags, &outcomes)?;
        Ok(DispatchOutcome::Replied { len })
    }

    async fn dispatch_block(
        &self,
        session: &mut Session,
        tid: u16,
        uid: u16,
        mid: u16,
        pid: u32,
        is_unicode: bool,
        block: &ParsedBlock,
    ) -> Result<HandlerOutcome> {
        let Some(command) = Command::from_wire(block.command) else {
            return Err(Error::Status(SmbStatus::UNRECOGNIZED_COMMAND));
        };

        handlers::dispatch_command(self, session, command, tid, uid, mid, pid, is_unicode, block).await
    }
}

/// Reads one `{word count, params, byte count, byte area}` block at
/// `base + block_offset` in `buf`.
fn read_block_at(buf: &[u8], base: usize, block_offset: usize) -> Result<(Vec<u16>, Vec<u8>)> {
    let at = base + block_offset;
    if at >= buf.len() {
        return Err(Error::Malformed("AndX block offset past end of message".into()));
    }
    let word_count = buf[at] as usize;
    let params_start = at + 1;
    let params_end = params_start + 2 * word_count;
    if params_end + 2 > buf.len() {
        return Err(Error::Malformed("AndX block parameters run past end of message".into()));
    }
    let params = buf[params_start..params_end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    let byte_count = u16::from_le_bytes([buf[params_end], buf[params_end + 1]]) as usize;
    let byte_area_start = params_end + 2;
    let byte_area_end = byte_area_start + byte_count;
    if byte_area_end > buf.len() {
        return Err(Error::Malformed("AndX block byte area runs past end of message".into()));
    }
    Ok((params, buf[byte_area_start..byte_area_end].to_vec()))
}

/// Serializes every block's outcome back-to-back into the response
/// packet, chaining `AndXCommand`/`AndXOffset` for AndX blocks and
/// terminating with `0xFF` (spec §4.3, §8's strictly-increasing-offset
/// invariant).
fn encode_chain(
    response: &mut Packet,
    mid: u16,
    is_long_error_code: bool,
    commands: &[u8],
    andx_flags: &[bool],
    outcomes: &[HandlerOutcome],
) -> Result<usize> {
    let mut header = HeaderView::new(&mut response.buf, 4);
    header.set_mid(mid);

    let overall_status = outcomes
        .iter()
        .find_map(|o| match o {
            HandlerOutcome::Reply { status, .. } if !status.is_success() => Some(*status),
            _ => None,
        })
        .unwrap_or(SmbStatus::SUCCESS);

    if overall_status.is_success() {
        header.start_success_response();
    } else {
        header.start_error_response(overall_status);
    }
    drop(header);

    // Only blocks with an actual reply get a slot; a deferred block
    // contributes nothing to this response (spec §4.6). Each retained
    // entry carries whether its own reply shape is an AndX reply, its
    // own command (needed as the *previous* reply's AndXCommand), and
    // its params.
    let replies: Vec<(bool, u8, &Vec<u16>, &Vec<u8>)> = outcomes
        .iter()
        .zip(commands.iter())
        .zip(andx_flags.iter())
        .filter_map(|((o, &cmd), &is_andx)| match o {
            HandlerOutcome::Reply { params, byte_area, .. } => Some((is_andx, cmd, params, byte_area)),
            HandlerOutcome::Deferred => None,
        })
        .collect();

    if replies.is_empty() {
        return Ok(0); // every block deferred: nothing to send yet
    }

    // First pass: compute each reply block's start offset (relative to
    // base=4) so AndX offsets can be written in the second pass.
    let mut starts = Vec::with_capacity(replies.len());
    let mut offset = 32usize;
    for (is_chained, _, params, byte_area) in &replies {
        starts.push(offset);
        let extra_words = if *is_chained { 3 } else { 0 };
        let word_count = extra_words + params.len();
        let block_len = 1 + 2 * word_count + 2 + byte_area.len();
        offset += block_len;
    }

    // Second pass: write each block. A chained block's AndXCommand is
    // the *next* reply's own command (mirroring the request's chain),
    // terminating with 0xFF once there is no further reply.
    for idx in 0..replies.len() {
        let (is_chained, _, params, byte_area) = &replies[idx];
        let at = 4 + starts[idx];
        let extra_words = if *is_chained { 3 } else { 0 };
        let word_count = extra_words + params.len();
        response.buf[at] = word_count as u8;

        let mut cursor = at + 1;
        if *is_chained {
            let (andx_command, andx_offset) = match replies.get(idx + 1) {
                Some((_, next_cmd, _, _)) => (*next_cmd, (4 + starts[idx + 1]) as u16),
                None => (ANDX_NO_FURTHER_COMMAND, 0u16),
            };
            response.buf[cursor] = andx_command;
            response.buf[cursor + 1] = 0; // reserved
            cursor += 2;
            response.buf[cursor..cursor + 2].copy_from_slice(&andx_offset.to_le_bytes());
            cursor += 2;
        }

        for &p in params.iter() {
            response.buf[cursor..cursor + 2].copy_from_slice(&p.to_le_bytes());
            cursor += 2;
        }

        let byte_count = byte_area.len() as u16;
        response.buf[cursor..cursor + 2].copy_from_slice(&byte_count.to_le_bytes());
        cursor += 2;
        response.buf[cursor..cursor + byte_area.len()].copy_from_slice(byte_area);
    }

    let _ = is_long_error_code;
    response.written_len = offset;
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_block_at_parses_word_count_params_and_byte_area() {
        let mut buf = vec![0u8; 64];
        buf[4 + 32] = 2; // word count
        buf[4 + 33..4 + 37].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        buf[4 + 37..4 + 39].copy_from_slice(&3u16.to_le_bytes());
        buf[4 + 39..4 + 42].copy_from_slice(&[9, 8, 7]);

        let (params, byte_area) = read_block_at(&buf, 4, 32).unwrap();
        assert_eq!(params, vec![0x2211, 0x4433]);
        assert_eq!(byte_area, vec![9, 8, 7]);
    }
}
