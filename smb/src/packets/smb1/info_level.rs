//! `Trans2` information-level packers (spec §4.3, §4.6): each level
//! controls the shape of a query/find reply's data block. Unsupported
//! levels are rejected with `NOT_SUPPORTED` by the dispatcher before
//! reaching these packers.

use crate::collaborators::FindEntry;
use crate::error::{Error, Result};
use crate::packets::smb1::bytearea::ByteAreaWriter;

/// A `Trans2` information level, as carried in the request's
/// `InformationLevel` parameter word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoLevel {
    Standard,
    Basic,
    Ea,
    Name,
    All,
    Stream,
    Compression,
    Internal,
    Position,
    AttributeTag,
    NetworkOpen,
}

impl InfoLevel {
    /// Maps the raw wire value (SMB_QUERY_FILE_* / SMB_INFO_* constants)
    /// to a level, or `None` for anything this server doesn't support.
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(InfoLevel::Standard),
            0x0101 => Some(InfoLevel::Basic),
            0x0102 => Some(InfoLevel::Ea),
            0x0103 => Some(InfoLevel::Name),
            0x0107 => Some(InfoLevel::All),
            0x0109 => Some(InfoLevel::Stream),
            0x010B => Some(InfoLevel::Compression),
            0x010D => Some(InfoLevel::Internal),
            0x010E => Some(InfoLevel::Position),
            0x010F => Some(InfoLevel::AttributeTag),
            0x0112 => Some(InfoLevel::NetworkOpen),
            _ => None,
        }
    }
}

/// The subset of filesystem metadata every level packs from; the
/// filesystem driver collaborator (out of scope here) supplies this.
#[derive(Debug, Clone, Default)]
pub struct FileMetadata {
    pub creation_time_nt: u64,
    pub last_access_time_nt: u64,
    pub last_write_time_nt: u64,
    pub change_time_nt: u64,
    pub attributes: u32,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub number_of_links: u32,
    pub delete_pending: bool,
    pub is_directory: bool,
    pub ea_size: u32,
    pub file_index: u64,
    pub current_position: u64,
    pub file_name: String,
}

/// Packs `meta` for `level` into `buf` starting at `start`, returning
/// the number of bytes written. Levels without a defined packing here
/// are programmer errors (the dispatcher must reject them earlier);
/// this still returns `NOT_SUPPORTED` defensively.
pub fn pack(level: InfoLevel, meta: &FileMetadata, unicode: bool, buf: &mut [u8], start: usize) -> Result<usize> {
    let mut w = ByteAreaWriter::new(buf, start, 0);
    match level {
        InfoLevel::Standard => {
            w.word(dos_date(meta.creation_time_nt));
            w.word(dos_time(meta.creation_time_nt));
            w.word(dos_date(meta.last_access_time_nt));
            w.word(dos_time(meta.last_access_time_nt));
            w.word(dos_date(meta.last_write_time_nt));
            w.word(dos_time(meta.last_write_time_nt));
            w.int(meta.end_of_file as u32);
            w.int(meta.allocation_size as u32);
            w.word(meta.attributes as u16);
        }
        InfoLevel::Basic => {
            w.long(meta.creation_time_nt);
            w.long(meta.last_access_time_nt);
            w.long(meta.last_write_time_nt);
            w.long(meta.change_time_nt);
            w.int(meta.attributes);
            w.zero_fill(4); // reserved
        }
        InfoLevel::Ea => {
            w.int(0); // no extended attributes supported
        }
        InfoLevel::Name => {
            let name_len = encoded_len(&meta.file_name, unicode);
            w.int(name_len as u32);
            w.string(&meta.file_name, unicode);
        }
        InfoLevel::All => {
            w.long(meta.creation_time_nt);
            w.long(meta.last_access_time_nt);
            w.long(meta.last_write_time_nt);
            w.long(meta.change_time_nt);
            w.int(meta.attributes);
            w.zero_fill(4);
            w.long(meta.allocation_size);
            w.long(meta.end_of_file);
            w.int(meta.number_of_links);
            w.byte(meta.delete_pending as u8);
            w.byte(meta.is_directory as u8);
            w.zero_fill(2);
            w.int(0); // EA size
            let name_len = encoded_len(&meta.file_name, unicode);
            w.int(name_len as u32);
            w.string(&meta.file_name, unicode);
        }
        InfoLevel::Stream => {
            // No alternate data streams: a single empty stream list entry.
            w.int(0); // next entry offset
            w.int(0); // stream name length
            w.long(meta.end_of_file);
            w.long(meta.allocation_size);
        }
        InfoLevel::Compression => {
            w.long(meta.end_of_file); // compressed file size
            w.word(0); // compression format: none
            w.byte(0); // unit shift
            w.byte(0); // chunk shift
            w.byte(0); // cluster shift
            w.zero_fill(3); // reserved
        }
        InfoLevel::Internal => {
            w.long(meta.file_index);
        }
        InfoLevel::Position => {
            w.long(meta.current_position);
        }
        InfoLevel::AttributeTag => {
            w.int(meta.attributes);
            w.int(0); // reparse tag: none
        }
        InfoLevel::NetworkOpen => {
            w.long(meta.creation_time_nt);
            w.long(meta.last_access_time_nt);
            w.long(meta.last_write_time_nt);
            w.long(meta.change_time_nt);
            w.long(meta.allocation_size);
            w.long(meta.end_of_file);
            w.int(meta.attributes);
            w.zero_fill(4); // reserved
        }
    }
    Ok(w.position() - start)
}

/// Packs a `Trans2FindFirst2`/`FindNext2` listing (spec §4.3): each
/// entry gets the same per-file fields [`pack`] already knows how to
/// write, prefixed with a resume `FileIndex` and its own
/// `NextEntryOffset`, DWORD-aligned the way chained `AndX` blocks are.
/// The last entry's `NextEntryOffset` is `0`.
pub fn pack_find_entries(level: InfoLevel, entries: &[FindEntry], unicode: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let count = entries.len();
    for (idx, entry) in entries.iter().enumerate() {
        let mut meta = entry.metadata.clone();
        meta.file_name = entry.file_name.clone();

        let mut buf = vec![0u8; 1024];
        buf[4..8].copy_from_slice(&(meta.file_index as u32).to_le_bytes());
        let fixed_len = pack(level, &meta, unicode, &mut buf, 8)?;
        let mut end = 8 + fixed_len;

        if !matches!(level, InfoLevel::Name | InfoLevel::All) {
            let mut w = ByteAreaWriter::new(&mut buf, end, 0);
            let name_len = encoded_len(&meta.file_name, unicode);
            w.int(name_len as u32);
            w.string(&meta.file_name, unicode);
            end = w.position();
        }

        let is_last = idx + 1 == count;
        let aligned = (end + 3) & !3;
        buf.resize(aligned, 0);
        let next_entry_offset = if is_last { 0u32 } else { aligned as u32 };
        buf[0..4].copy_from_slice(&next_entry_offset.to_le_bytes());
        out.extend_from_slice(&buf);
    }
    Ok(out)
}

fn encoded_len(s: &str, unicode: bool) -> usize {
    if unicode {
        s.encode_utf16().count() * 2
    } else {
        s.len()
    }
}

/// Converts an NT 100ns-since-1601 timestamp to the MS-DOS 16-bit date
/// format, truncating to whole days. A minimal conversion sufficient
/// for the Standard information level, which predates NT time.
fn dos_date(nt_time: u64) -> u16 {
    let unix_days = nt_to_unix_seconds(nt_time) / 86_400;
    let (y, m, d) = civil_from_days(unix_days as i64 + 719_163 - 719_468 + 1);
    let dos_year = (y - 1980).clamp(0, 127) as u16;
    ((dos_year << 9) | ((m as u16) << 5) | d as u16).into()
}

fn dos_time(nt_time: u64) -> u16 {
    let secs_of_day = nt_to_unix_seconds(nt_time) % 86_400;
    let h = secs_of_day / 3600;
    let m = (secs_of_day % 3600) / 60;
    let s = secs_of_day % 60;
    (((h as u16) << 11) | ((m as u16) << 5) | (s / 2) as u16).into()
}

fn nt_to_unix_seconds(nt_time: u64) -> u64 {
    const NT_EPOCH_OFFSET_100NS: u64 = 116_444_736_000_000_000;
    nt_time.saturating_sub(NT_EPOCH_OFFSET_100NS) / 10_000_000
}

/// Howard Hinnant's civil-from-days algorithm, used only to turn a
/// day count into a DOS year/month/day triple for [`dos_date`].
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

pub fn reject_unsupported(value: u16) -> Error {
    let _ = value;
    Error::Malformed("unsupported information level".into())
}
