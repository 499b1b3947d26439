//! Positional pack/unpack helpers for the byte area that follows every
//! SMB1 header's parameter words (spec §4.3).

use binrw::BinWrite;

use crate::error::{Error, Result};
use crate::packets::guid::Guid;

/// A cursor over a byte-area slice, tracking position relative to the
/// *message start* (`base` in [`crate::packets::smb1::header::HeaderView`])
/// so alignment padding can be computed correctly.
pub struct ByteAreaReader<'a> {
    buf: &'a [u8],
    pos: usize,
    msg_start_offset: usize,
}

impl<'a> ByteAreaReader<'a> {
    pub fn new(buf: &'a [u8], start: usize, msg_start_offset: usize) -> Self {
        ByteAreaReader {
            buf,
            pos: start,
            msg_start_offset,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::Malformed("byte area read past end of message".into()))
        } else {
            Ok(())
        }
    }

    pub fn byte(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn word(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn int(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn long(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub fn uuid(&mut self) -> Result<Guid> {
        self.require(16)?;
        let bytes: [u8; 16] = self.buf[self.pos..self.pos + 16].try_into().unwrap();
        self.pos += 16;
        Ok(Guid::from(bytes))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }

    /// Advances to the next even offset relative to the message start,
    /// as required before a Unicode string field.
    pub fn word_align(&mut self) {
        let abs = self.msg_start_offset + self.pos;
        if abs % 2 != 0 {
            self.pos += 1;
        }
    }

    pub fn longword_align(&mut self) {
        let abs = self.msg_start_offset + self.pos;
        let rem = abs % 4;
        if rem != 0 {
            self.pos += 4 - rem;
        }
    }

    /// Reads a string: UTF-16LE and word-aligned when `unicode` is set
    /// (as dictated by `FLG2_UNICODE`), else a null-terminated OEM/ASCII
    /// string.
    pub fn string(&mut self, unicode: bool) -> Result<String> {
        if unicode {
            self.word_align();
            let mut units = Vec::new();
            loop {
                let u = self.word()?;
                if u == 0 {
                    break;
                }
                units.push(u);
            }
            Ok(String::from_utf16_lossy(&units))
        } else {
            let start = self.pos;
            while self.pos < self.buf.len() && self.buf[self.pos] != 0 {
                self.pos += 1;
            }
            let s = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
            if self.pos < self.buf.len() {
                self.pos += 1; // consume the null terminator
            }
            Ok(s)
        }
    }
}

/// A cursor over a mutable byte-area slice, for encoding replies.
pub struct ByteAreaWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    msg_start_offset: usize,
}

impl<'a> ByteAreaWriter<'a> {
    pub fn new(buf: &'a mut [u8], start: usize, msg_start_offset: usize) -> Self {
        ByteAreaWriter {
            buf,
            pos: start,
            msg_start_offset,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn byte(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn word(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    pub fn int(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn long(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    pub fn uuid(&mut self, v: Guid) {
        let mut cursor = std::io::Cursor::new(Vec::with_capacity(16));
        v.write(&mut cursor).expect("Guid is always 16 bytes");
        self.buf[self.pos..self.pos + 16].copy_from_slice(&cursor.into_inner());
        self.pos += 16;
    }

    pub fn zero_fill(&mut self, n: usize) {
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
    }

    pub fn word_align(&mut self) {
        let abs = self.msg_start_offset + self.pos;
        if abs % 2 != 0 {
            self.byte(0);
        }
    }

    pub fn longword_align(&mut self) {
        let abs = self.msg_start_offset + self.pos;
        let rem = abs % 4;
        if rem != 0 {
            self.zero_fill(4 - rem);
        }
    }

    /// Writes `s`, Unicode (word-aligned, UTF-16LE, null-terminated) or
    /// OEM/ASCII null-terminated, per `unicode`.
    pub fn string(&mut self, s: &str, unicode: bool) {
        if unicode {
            self.word_align();
            for unit in s.encode_utf16() {
                self.word(unit);
            }
            self.word(0);
        } else {
            for byte in s.bytes() {
                self.byte(byte);
            }
            self.byte(0);
        }
    }
}
