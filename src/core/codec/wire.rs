// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Length-prefixed binary wire framing.
//!
//! Integers are zig-zag variable-length (1-5 bytes for 32-bit, 1-10 bytes
//! for 64-bit). Strings are an `int` length followed by UTF-8 bytes; the
//! empty string is a single zero byte. Optional values are prefixed with
//! `0` for absent, zig-zag `1` for present.
//!
//! Two encodings share the schema catalogue: the **verbose** encoding
//! writes a UUID as two zig-zag varlongs (up to 20 bytes), the **compact**
//! encoding as 16 raw bytes (little-endian halves). Packets on the
//! connection use the compact encoding; signature payloads use the verbose
//! one.

use thiserror::Error;
use uuid::Uuid;

/// Wire decoding error. Malformed packets are dropped by the dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("bad format")]
    BadFormat,
    #[error("unknown schema")]
    UnknownSchema,
}

/// UUID representation selector shared by writer and reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// UUIDs as two zig-zag varlongs.
    Verbose,
    /// UUIDs as 16 raw bytes, little-endian halves.
    Compact,
}

fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Growable wire output buffer.
pub struct WireWriter {
    encoding: Encoding,
    buf: Vec<u8>,
}

impl WireWriter {
    /// New writer using `encoding` for UUID fields.
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            buf: Vec::with_capacity(128),
        }
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn write_unsigned(&mut self, mut v: u64) {
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(b);
                return;
            }
            self.buf.push(b | 0x80);
        }
    }

    /// Single raw byte (cipher version tags and similar).
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Raw byte run without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Zig-zag 32-bit integer.
    pub fn write_int(&mut self, v: i32) {
        self.write_unsigned(zigzag64(v as i64));
    }

    /// Zig-zag 64-bit integer.
    pub fn write_long(&mut self, v: i64) {
        self.write_unsigned(zigzag64(v));
    }

    /// Boolean as zig-zag `0`/`1`.
    pub fn write_bool(&mut self, v: bool) {
        self.write_int(if v { 1 } else { 0 });
    }

    /// Length-prefixed UTF-8 string. The empty string is one zero byte.
    pub fn write_string(&mut self, v: &str) {
        self.write_int(v.len() as i32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// Length-prefixed byte string.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_int(v.len() as i32);
        self.buf.extend_from_slice(v);
    }

    /// UUID in the writer's encoding.
    pub fn write_uuid(&mut self, v: &Uuid) {
        let raw = v.as_u128();
        let msb = (raw >> 64) as u64;
        let lsb = raw as u64;
        match self.encoding {
            Encoding::Verbose => {
                self.write_long(msb as i64);
                self.write_long(lsb as i64);
            }
            Encoding::Compact => {
                self.buf.extend_from_slice(&msb.to_le_bytes());
                self.buf.extend_from_slice(&lsb.to_le_bytes());
            }
        }
    }

    /// Optional-presence marker followed by the value when present.
    pub fn write_optional<T, F: FnOnce(&mut Self, &T)>(&mut self, v: Option<&T>, f: F) {
        match v {
            None => self.write_int(0),
            Some(inner) => {
                self.write_int(1);
                f(self, inner);
            }
        }
    }
}

/// Bounds-checked wire input cursor.
pub struct WireReader<'a> {
    encoding: Encoding,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// New reader over `buf` using `encoding` for UUID fields.
    pub fn new(encoding: Encoding, buf: &'a [u8]) -> Self {
        Self {
            encoding,
            buf,
            pos: 0,
        }
    }

    /// Bytes left to consume.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_unsigned(&mut self) -> Result<u64, WireError> {
        let mut out: u64 = 0;
        let mut shift = 0u32;
        loop {
            if shift >= 70 {
                return Err(WireError::BadFormat);
            }
            let b = *self.buf.get(self.pos).ok_or(WireError::BadFormat)?;
            self.pos += 1;
            out |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(out);
            }
            shift += 7;
        }
    }

    /// Single raw byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::BadFormat)?;
        self.pos += 1;
        Ok(b)
    }

    /// Raw byte run of exactly `n` bytes.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::BadFormat);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Zig-zag 32-bit integer.
    pub fn read_int(&mut self) -> Result<i32, WireError> {
        let v = unzigzag64(self.read_unsigned()?);
        i32::try_from(v).map_err(|_| WireError::BadFormat)
    }

    /// Zig-zag 64-bit integer.
    pub fn read_long(&mut self) -> Result<i64, WireError> {
        Ok(unzigzag64(self.read_unsigned()?))
    }

    /// Boolean; any value other than `0`/`1` is malformed.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_int()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::BadFormat),
        }
    }

    /// Length-prefixed UTF-8 string. The length must fit the buffer.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_int()?;
        if len < 0 {
            return Err(WireError::BadFormat);
        }
        let bytes = self.read_raw(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadFormat)
    }

    /// Length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_int()?;
        if len < 0 {
            return Err(WireError::BadFormat);
        }
        Ok(self.read_raw(len as usize)?.to_vec())
    }

    /// UUID in the reader's encoding.
    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        let (msb, lsb) = match self.encoding {
            Encoding::Verbose => (self.read_long()? as u64, self.read_long()? as u64),
            Encoding::Compact => {
                let raw = self.read_raw(16)?;
                let mut msb = [0u8; 8];
                let mut lsb = [0u8; 8];
                msb.copy_from_slice(&raw[..8]);
                lsb.copy_from_slice(&raw[8..]);
                (u64::from_le_bytes(msb), u64::from_le_bytes(lsb))
            }
        };
        Ok(Uuid::from_u128(((msb as u128) << 64) | lsb as u128))
    }

    /// Optional-presence marker; runs `f` only when the value is present.
    pub fn read_optional<T, F: FnOnce(&mut Self) -> Result<T, WireError>>(
        &mut self,
        f: F,
    ) -> Result<Option<T>, WireError> {
        match self.read_int()? {
            0 => Ok(None),
            1 => Ok(Some(f(self)?)),
            _ => Err(WireError::BadFormat),
        }
    }

    /// Fail unless the buffer was fully consumed.
    pub fn expect_end(&self) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::BadFormat);
        }
        Ok(())
    }
}

/// Leading fields of every packet on the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Schema UUID selecting the body layout.
    pub schema_id: Uuid,
    /// Schema version.
    pub version: i32,
    /// Correlation id echoed by the response.
    pub request_id: i64,
}

impl PacketHeader {
    /// Write `schemaId || schemaVersion || requestId`.
    pub fn write(&self, w: &mut WireWriter) {
        w.write_uuid(&self.schema_id);
        w.write_int(self.version);
        w.write_long(self.request_id);
    }

    /// Read the packet header.
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            schema_id: r.read_uuid()?,
            version: r.read_int()?,
            request_id: r.read_long()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(encoding: Encoding) {
        let id = Uuid::new_v4();
        let mut w = WireWriter::new(encoding);
        w.write_int(0);
        w.write_int(-1);
        w.write_int(i32::MAX);
        w.write_long(i64::MIN);
        w.write_string("");
        w.write_string("réseau");
        w.write_bytes(&[0, 1, 2, 255]);
        w.write_uuid(&id);
        w.write_optional::<Uuid, _>(None, |w, v| w.write_uuid(v));
        w.write_optional(Some(&id), |w, v| w.write_uuid(v));

        let bytes = w.into_bytes();
        let mut r = WireReader::new(encoding, &bytes);
        assert_eq!(r.read_int().unwrap(), 0);
        assert_eq!(r.read_int().unwrap(), -1);
        assert_eq!(r.read_int().unwrap(), i32::MAX);
        assert_eq!(r.read_long().unwrap(), i64::MIN);
        assert_eq!(r.read_string().unwrap(), "");
        assert_eq!(r.read_string().unwrap(), "réseau");
        assert_eq!(r.read_bytes().unwrap(), vec![0, 1, 2, 255]);
        assert_eq!(r.read_uuid().unwrap(), id);
        assert_eq!(r.read_optional(|r| r.read_uuid()).unwrap(), None);
        assert_eq!(r.read_optional(|r| r.read_uuid()).unwrap(), Some(id));
        r.expect_end().unwrap();
    }

    #[test]
    fn roundtrip_verbose_and_compact() {
        roundtrip(Encoding::Verbose);
        roundtrip(Encoding::Compact);
    }

    #[test]
    fn empty_string_is_one_zero_byte() {
        let mut w = WireWriter::new(Encoding::Compact);
        w.write_string("");
        assert_eq!(w.into_bytes(), vec![0u8]);
    }

    #[test]
    fn absent_option_is_zero_present_is_zigzag_one() {
        let mut w = WireWriter::new(Encoding::Compact);
        w.write_optional::<i32, _>(None, |w, v| w.write_int(*v));
        w.write_optional(Some(&7), |w, v| w.write_int(*v));
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x02); // zigzag(1)
    }

    #[test]
    fn compact_uuid_is_sixteen_bytes(){
        let id = Uuid::new_v4();
        let mut w = WireWriter::new(Encoding::Compact);
        w.write_uuid(&id);
        assert_eq!(w.len(), 16);
    }

    #[test]
    fn truncated_buffer_is_bad_format() {
        let mut w = WireWriter::new(Encoding::Compact);
        w.write_string("hello");
        let bytes = w.into_bytes();
        let mut r = WireReader::new(Encoding::Compact, &bytes[..3]);
        assert_eq!(r.read_string(), Err(WireError::BadFormat));
    }

    #[test]
    fn overlong_varint_is_bad_format() {
        let bytes = [0xffu8; 11];
        let mut r = WireReader::new(Encoding::Compact, &bytes);
        assert_eq!(r.read_long(), Err(WireError::BadFormat));
    }
}
