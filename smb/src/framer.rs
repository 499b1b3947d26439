//! NetBIOS / direct-TCP message framing (spec §4.2).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::pool::{Packet, PacketPool};

/// Which 4-byte framing convention a session's transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Port 139: NetBIOS session service framing, `{type:1, len-hi:1, len-lo:2}`.
    NetBios,
    /// Port 445: direct SMB-over-TCP, a bare 32-bit big-endian length.
    DirectTcp,
}

/// Largest length a 17-bit NetBIOS-session-service length field can carry.
const MAX_NBSS_LEN: usize = (0x01 << 16) | 0xFFFF;

const NBSS_TYPE_SESSION_MESSAGE: u8 = 0x00;
const NBSS_SESSION_REQUEST: u8 = 0x81;
const NBSS_POSITIVE_SESSION_RESPONSE: u8 = 0x82;
const NBSS_NEGATIVE_SESSION_RESPONSE: u8 = 0x83;

/// RFC 1002 §4.3.4's "not listening on called name" negative-response
/// error code -- the one case this server's handshake can produce.
pub const NBSS_ERROR_NOT_LISTENING_ON_CALLED_NAME: u8 = 0x81;

/// Decodes one RFC 1001 §14.1 half-ascii encoded NetBIOS name field: a
/// length byte (always 32), 32 bytes of paired nibbles, and a
/// terminating scope-length byte (0, since this server doesn't use
/// NetBIOS scopes).
fn decode_netbios_name(field: &[u8]) -> Result<String> {
    if field.len() < 34 || field[0] != 32 {
        return Err(Error::Malformed("malformed NetBIOS encoded name field".into()));
    }
    let mut decoded = [0u8; 16];
    for i in 0..16 {
        let hi = field[1 + 2 * i];
        let lo = field[1 + 2 * i + 1];
        if !(b'A'..=b'P').contains(&hi) || !(b'A'..=b'P').contains(&lo) {
            return Err(Error::Malformed("NetBIOS encoded name nibble out of range".into()));
        }
        decoded[i] = ((hi - b'A') << 4) | (lo - b'A');
    }
    Ok(String::from_utf8_lossy(&decoded).trim_end().to_string())
}

/// Reads and decodes a NetBIOS `SESSION REQUEST` message: the called
/// name followed by the calling name, each a 34-byte encoded field
/// (spec §4.2, §4.4).
pub async fn read_session_request<R: AsyncRead + Unpin>(stream: &mut R, pool: &Arc<PacketPool>) -> Result<(String, String)> {
    let packet = read_packet(stream, pool, Transport::NetBios, 0).await?;
    let msg_type = packet.buf[0];
    let payload_len = packet.received_len.saturating_sub(4);
    if msg_type != NBSS_SESSION_REQUEST || payload_len < 68 {
        pool.release(packet).await;
        return Err(Error::Malformed("expected a NetBIOS SESSION REQUEST with both name fields".into()));
    }
    let called = decode_netbios_name(&packet.buf[4..38]);
    let calling = decode_netbios_name(&packet.buf[38..72]);
    pool.release(packet).await;
    Ok((called?, calling?))
}

/// Writes a NetBIOS `POSITIVE SESSION RESPONSE` (zero-length payload).
pub async fn write_positive_session_response<W: AsyncWrite + Unpin>(stream: &mut W) -> Result<()> {
    stream.write_all(&[NBSS_POSITIVE_SESSION_RESPONSE, 0, 0, 0]).await?;
    stream.flush().await?;
    Ok(())
}

/// Writes a NetBIOS `NEGATIVE SESSION RESPONSE` carrying `error_code`.
pub async fn write_negative_session_response<W: AsyncWrite + Unpin>(stream: &mut W, error_code: u8) -> Result<()> {
    stream.write_all(&[NBSS_NEGATIVE_SESSION_RESPONSE, 0, 0, 1, error_code]).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one framed SMB message from `stream` into a pool-allocated
/// packet. Tolerates the 4-byte header arriving across multiple reads.
pub async fn read_packet<R: AsyncRead + Unpin>(
    stream: &mut R,
    pool: &Arc<PacketPool>,
    transport: Transport,
    encryption_overhead: usize,
) -> Result<Packet> {
    let mut header = [0u8; 4];
    read_exact_tolerant(stream, &mut header).await?;

    let data_len = match transport {
        Transport::NetBios => {
            let len = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
            if len > MAX_NBSS_LEN {
                return Err(Error::TooLarge(len));
            }
            len
        }
        Transport::DirectTcp => u32::from_be_bytes(header) as usize,
    };

    let mut packet = pool.allocate(data_len + encryption_overhead + 4).await?;
    packet.buf[0..4].copy_from_slice(&header);

    let mut filled = 0;
    while filled < data_len {
        let n = stream.read(&mut packet.buf[4 + filled..4 + data_len]).await?;
        if n == 0 {
            pool.release(packet).await;
            return Err(Error::ConnectionClosed);
        }
        filled += n;
    }

    packet.received_len = data_len + 4;
    Ok(packet)
}

/// Loops on `read` until exactly `buf.len()` bytes have been collected,
/// tolerating short reads of the framing header itself.
async fn read_exact_tolerant<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        filled += n;
    }
    Ok(())
}

/// Writes the 4-byte framing header for `transport` at offset 0 of
/// `packet`, then writes `len + 4` bytes to `stream`. Does not flush --
/// callers flush once after the whole response (and any queued async
/// pushes) has been written.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    stream: &mut W,
    packet: &Packet,
    len: usize,
    transport: Transport,
) -> Result<()> {
    let mut header = [0u8; 4];
    match transport {
        Transport::NetBios => {
            if len > MAX_NBSS_LEN {
                return Err(Error::TooLarge(len));
            }
            header[0] = NBSS_TYPE_SESSION_MESSAGE;
            header[1] = ((len >> 16) & 0x01) as u8;
            header[2] = ((len >> 8) & 0xFF) as u8;
            header[3] = (len & 0xFF) as u8;
        }
        Transport::DirectTcp => header.copy_from_slice(&(len as u32).to_be_bytes()),
    }

    stream.write_all(&header).await?;
    stream.write_all(&packet.buf[4..4 + len]).await?;
    Ok(())
}

pub async fn flush<W: AsyncWrite + Unpin>(stream: &mut W) -> Result<()> {
    stream.flush().await?;
    Ok(())
}
