//! `SMB_COM_NEGOTIATE` dialect string decoding and per-dialect response
//! encoding (spec §4.3).

use binrw::{BinRead, BinWrite};

use crate::config::Dialect;
use crate::error::{Error, Result};
use crate::packets::guid::Guid;

/// The `Dialect` byte-area data type that prefixes every offered
/// dialect string.
const DIALECT_BUFFER_FORMAT: u8 = 0x02;

/// One dialect string offered by the client, as decoded from the
/// request byte area.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct DialectEntry {
    #[brw(magic = 2u8)]
    name: binrw::NullString,
}

impl DialectEntry {
    pub fn name(&self) -> String {
        self.name.to_string()
    }
}

/// Decodes the request byte area into the client's offered dialect
/// strings, in the order offered.
pub fn decode_dialects(byte_area: &[u8]) -> Result<Vec<String>> {
    let mut cursor = std::io::Cursor::new(byte_area);
    let mut names = Vec::new();
    while (cursor.position() as usize) < byte_area.len() {
        let entry = DialectEntry::read(&mut cursor).map_err(Error::BinRW)?;
        names.push(entry.name());
    }
    Ok(names)
}

/// Picks the highest-capability dialect that both the client offered
/// (in order) and the server has enabled, returning its index in the
/// client's offered list (the value the response's `DialectIndex`
/// parameter word must carry) alongside the resolved [`Dialect`].
pub fn select_dialect(offered: &[String], enabled: &[Dialect]) -> Option<(u16, Dialect)> {
    offered
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            Dialect::NEGOTIATE_TABLE
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, d)| (idx as u16, *d))
        })
        .filter(|(_, d)| enabled.contains(d))
        .max_by_key(|(_, d)| *d)
}

/// Fixed fields for the Core-dialect negotiate response: one parameter
/// word (the selected dialect index), empty byte area.
pub struct CoreResponse {
    pub dialect_index: u16,
}

/// Fixed fields for the LanMan-dialect negotiate response (13 parameter
/// words).
pub struct LanManResponse {
    pub dialect_index: u16,
    pub security_mode: u8,
    pub max_buffer_size: u16,
    pub max_mpx_count: u16,
    pub max_vcs: u16,
    pub raw_mode: u16,
    pub session_key: u32,
    pub server_time: u16,
    pub server_date: u16,
    pub server_timezone: i16,
    pub challenge_len: u16,
}

/// Fixed fields for the NT-dialect negotiate response (17 parameter
/// words) plus the byte-area payload, which is either legacy
/// (challenge + domain + server names) or extended-security (server
/// GUID + SPNEGO blob).
pub struct NtResponse {
    pub dialect_index: u16,
    pub security_mode: u8,
    pub max_mpx_count: u16,
    pub max_vcs: u16,
    pub max_buffer_size: u32,
    pub max_raw_size: u32,
    pub session_key: u32,
    pub capabilities: u32,
    pub server_time_nt: u64,
    pub server_timezone: i16,
    pub key_len: u8,
    pub security_blob: SecurityBlob,
}

pub enum SecurityBlob {
    /// Legacy (non-extended-security) negotiation: an 8-byte challenge
    /// plus domain and server NetBIOS names.
    Legacy {
        challenge: [u8; 8],
        domain: String,
        server: String,
    },
    /// Extended security (SPNEGO): a server GUID followed by the raw
    /// `NegTokenInit` bytes, opaque to this parser.
    Extended { server_guid: Guid, neg_token_init: Vec<u8> },
}

pub mod capabilities {
    pub const RAW_MODE: u32 = 0x0000_0001;
    pub const MPX_MODE: u32 = 0x0000_0002;
    pub const UNICODE: u32 = 0x0000_0004;
    pub const LARGE_FILES: u32 = 0x0000_0008;
    pub const NT_SMBS: u32 = 0x0000_0010;
    pub const RPC_REMOTE_APIS: u32 = 0x0000_0020;
    pub const STATUS32: u32 = 0x0000_0040;
    pub const LEVEL_II_OPLOCKS: u32 = 0x0000_0080;
    pub const LOCK_AND_READ: u32 = 0x0000_0100;
    pub const NT_FIND: u32 = 0x0000_0200;
    pub const DFS: u32 = 0x0000_1000;
    pub const LARGE_READX: u32 = 0x0004_0000;
    pub const LARGE_WRITEX: u32 = 0x0008_0000;
    pub const EXTENDED_SECURITY: u32 = 0x8000_0000;
}

use super::bytearea::ByteAreaWriter;

impl CoreResponse {
    /// Encodes this response's single parameter word into `params[0]`.
    /// The caller sets word count to 1 and byte count to 0.
    pub fn encode(&self, params: &mut [u16]) {
        params[0] = self.dialect_index;
    }
}

impl LanManResponse {
    pub fn encode(&self, params: &mut [u16]) {
        params[0] = self.dialect_index;
        params[1] = self.security_mode as u16;
        params[2] = self.max_buffer_size;
        params[3] = self.max_mpx_count;
        params[4] = self.max_vcs;
        params[5] = self.raw_mode;
        params[6] = (self.session_key & 0xFFFF) as u16;
        params[7] = (self.session_key >> 16) as u16;
        params[8] = self.server_time;
        params[9] = self.server_date;
        params[10] = self.server_timezone as u16;
        params[11] = self.challenge_len;
        params[12] = 0; // reserved
    }
}

impl NtResponse {
    /// Encodes the 17 parameter words. `params[11..13]` and
    /// `params[15..17]` carry the split 64-bit server time; callers
    /// must size `params` to at least 17 words.
    pub fn encode(&self, params: &mut [u16]) {
        params[0] = self.dialect_index;
        params[1] = self.security_mode as u16;
        params[2] = self.max_mpx_count;
        params[3] = self.max_vcs;
        params[4] = (self.max_buffer_size & 0xFFFF) as u16;
        params[5] = (self.max_buffer_size >> 16) as u16;
        params[6] = (self.max_raw_size & 0xFFFF) as u16;
        params[7] = (self.max_raw_size >> 16) as u16;
        params[8] = (self.session_key & 0xFFFF) as u16;
        params[9] = (self.session_key >> 16) as u16;
        params[10] = (self.capabilities & 0xFFFF) as u16;
        params[11] = (self.capabilities >> 16) as u16;
        params[12] = (self.server_time_nt & 0xFFFF) as u16;
        params[13] = ((self.server_time_nt >> 16) & 0xFFFF) as u16;
        params[14] = ((self.server_time_nt >> 32) & 0xFFFF) as u16;
        params[15] = ((self.server_time_nt >> 48) & 0xFFFF) as u16;
        params[16] = self.server_timezone as u16;
    }

    /// Writes the byte-area payload (security blob) starting at
    /// `start` and returns the number of bytes written.
    pub fn encode_byte_area(&self, buf: &mut [u8], start: usize, msg_start_offset: usize) -> usize {
        let mut w = ByteAreaWriter::new(buf, start, msg_start_offset);
        match &self.security_blob {
            SecurityBlob::Legacy {
                challenge,
                domain,
                server,
            } => {
                for &b in challenge {
                    w.byte(b);
                }
                w.string(domain, true);
                w.string(server, true);
            }
            SecurityBlob::Extended {
                server_guid,
                neg_token_init,
            } => {
                w.uuid(*server_guid);
                for &b in neg_token_init {
                    w.byte(b);
                }
            }
        }
        w.position() - start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect_bytes(names: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for name in names {
            out.push(DIALECT_BUFFER_FORMAT);
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        out
    }

    #[test]
    fn decode_dialects_reads_every_entry_in_order() {
        let bytes = dialect_bytes(&["PC NETWORK PROGRAM 1.0", "NT LM 0.12"]);
        let names = decode_dialects(&bytes).unwrap();
        assert_eq!(names, vec!["PC NETWORK PROGRAM 1.0", "NT LM 0.12"]);
    }

    #[test]
    fn select_dialect_picks_highest_mutually_supported() {
        let offered = vec![
            "PC NETWORK PROGRAM 1.0".to_string(),
            "LANMAN1.0".to_string(),
            "NT LM 0.12".to_string(),
        ];
        let (idx, dialect) = select_dialect(&offered, &[Dialect::Core, Dialect::LanMan, Dialect::NtLm]).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(dialect, Dialect::NtLm);
    }

    #[test]
    fn select_dialect_respects_server_enabled_subset() {
        let offered = vec!["LANMAN1.0".to_string(), "NT LM 0.12".to_string()];
        let (idx, dialect) = select_dialect(&offered, &[Dialect::Core, Dialect::LanMan]).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(dialect, Dialect::LanMan);
    }

    #[test]
    fn select_dialect_returns_none_when_nothing_matches() {
        let offered = vec!["SOME UNKNOWN DIALECT".to_string()];
        assert!(select_dialect(&offered, &[Dialect::NtLm]).is_none());
    }

    #[test]
    fn core_response_encodes_single_word() {
        let mut params = [0u16; 1];
        CoreResponse { dialect_index: 3 }.encode(&mut params);
        assert_eq!(params, [3]);
    }

    #[test]
    fn nt_response_splits_64_bit_time_across_four_words() {
        let mut params = [0u16; 17];
        let resp = NtResponse {
            dialect_index: 7,
            security_mode: 3,
            max_mpx_count: 50,
            max_vcs: 1,
            max_buffer_size: 0x1_0000,
            max_raw_size: 0x1_0000,
            session_key: 0,
            capabilities: capabilities::NT_SMBS | capabilities::STATUS32,
            server_time_nt: 0x0011_2233_4455_6677,
            server_timezone: 0,
            key_len: 0,
            security_blob: SecurityBlob::Extended {
                server_guid: Guid::MAX,
                neg_token_init: Vec::new(),
            },
        };
        resp.encode(&mut params);
        assert_eq!(params[4], 0); // max_buffer_size low word
        assert_eq!(params[5], 1); // max_buffer_size high word
        let reassembled = (params[12] as u64)
            | ((params[13] as u64) << 16)
            | ((params[14] as u64) << 32)
            | ((params[15] as u64) << 48);
        assert_eq!(reassembled, 0x0011_2233_4455_6677);
    }
}
