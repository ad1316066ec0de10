//! TFTP framing: the session's two cursored buffers and the per-opcode
//! fill/parse routines (RFC 1350 packets, RFC 2347 option lists).
//!
//! All 16-bit words are big-endian; string fields are NUL-terminated ASCII.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, TftpError};
use crate::{ErrorCode, Opcode, HEADER_SIZE, INITIAL_BUFFER_SIZE};

fn malformed(what: &str) -> TftpError {
    TftpError::Protocol(format!("malformed buffer: {}", what))
}

/// Outbound packet buffer with a write cursor and a hard capacity.
///
/// The capacity is deliberately enforced rather than letting `BytesMut`
/// reallocate: a fill routine running past `block_size + 4` is an internal
/// error, not a packet to send.
#[derive(Debug)]
pub struct SendBuf {
    buf: BytesMut,
    capacity: usize,
}

impl SendBuf {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Regrow after blksize negotiation. Never shrinks.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.buf.reserve(capacity - self.buf.len());
            self.capacity = capacity;
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        if self.buf.len() >= self.capacity {
            return Err(malformed("send buffer overflow"));
        }
        self.buf.put_u8(b);
        Ok(())
    }

    pub fn write_word(&mut self, w: u16) -> Result<()> {
        if self.buf.len() + 2 > self.capacity {
            return Err(malformed("send buffer overflow"));
        }
        self.buf.put_u16(w);
        Ok(())
    }

    /// Writes the bytes of `s` followed by the NUL terminator.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(malformed("string field contains NUL"));
        }
        if self.buf.len() + s.len() + 1 > self.capacity {
            return Err(malformed("send buffer overflow"));
        }
        self.buf.put(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(malformed("send buffer overflow"));
        }
        self.buf.put(data);
        Ok(())
    }
}

impl Default for SendBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound datagram buffer with a read cursor bounded by the datagram length.
#[derive(Debug)]
pub struct RecvBuf {
    buf: Vec<u8>,
    len: usize,
    pos: usize,
}

impl RecvBuf {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            len: 0,
            pos: 0,
        }
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.buf.len() {
            self.buf.resize(capacity, 0);
        }
    }

    /// The whole backing storage, for `recv_from` to fill.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Marks `len` bytes as the received datagram and rewinds the cursor.
    pub fn set_datagram_len(&mut self, len: usize) {
        debug_assert!(len <= self.buf.len());
        self.len = len;
        self.pos = 0;
    }

    pub fn datagram_len(&self) -> usize {
        self.len
    }

    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.len {
            return Err(malformed("read past end of datagram"));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_word(&mut self) -> Result<u16> {
        if self.pos + 2 > self.len {
            return Err(malformed("read past end of datagram"));
        }
        let w = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(w)
    }

    /// Reads a NUL-terminated string field. The terminator is consumed.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.len {
            if self.buf[self.pos] == 0 {
                let s = String::from_utf8(self.buf[start..self.pos].to_vec())
                    .map_err(|_| malformed("string field is not ASCII"))?;
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(malformed("unterminated string field"))
    }

    /// The unread tail of the datagram (the DATA payload after the header).
    pub fn rest(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }
}

impl Default for RecvBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered option list (RFC 2347). Order is the proposal order; lookups are
/// case-insensitive as the RFC requires for option names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionList {
    entries: Vec<(String, String)>,
}

impl OptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: String) {
        self.entries.push((name.to_string(), value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for OptionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fill routines. Each resets the buffer and writes one complete packet.
// ---------------------------------------------------------------------------

/// RRQ/WRQ: opcode, filename, mode, then the option pairs (RFC 2347).
pub fn fill_request(
    buf: &mut SendBuf,
    opcode: Opcode,
    filename: &str,
    mode: &str,
    options: &OptionList,
) -> Result<()> {
    debug_assert!(matches!(opcode, Opcode::Rrq | Opcode::Wrq));
    buf.clear();
    buf.write_word(opcode as u16)?;
    buf.write_string(filename)?;
    buf.write_string(mode)?;
    for (name, value) in options.iter() {
        buf.write_string(name)?;
        buf.write_string(value)?;
    }
    Ok(())
}

pub fn fill_data(buf: &mut SendBuf, block: u16, payload: &[u8]) -> Result<()> {
    buf.clear();
    buf.write_word(Opcode::Data as u16)?;
    buf.write_word(block)?;
    buf.write_bytes(payload)
}

pub fn fill_ack(buf: &mut SendBuf, block: u16) -> Result<()> {
    buf.clear();
    buf.write_word(Opcode::Ack as u16)?;
    buf.write_word(block)
}

pub fn fill_error(buf: &mut SendBuf, code: ErrorCode, message: &str) -> Result<()> {
    buf.clear();
    buf.write_word(Opcode::Error as u16)?;
    buf.write_word(code as u16)?;
    buf.write_string(message)
}

// ---------------------------------------------------------------------------
// Parse routines. The opcode word has already been consumed by the caller.
// ---------------------------------------------------------------------------

/// Reads the opcode word from the start of the datagram.
pub fn read_opcode(buf: &mut RecvBuf) -> Result<u16> {
    if buf.datagram_len() < HEADER_SIZE {
        return Err(TftpError::Protocol("packet too small".to_string()));
    }
    buf.read_word()
}

/// DATA: block number + payload. Whether block 0 is acceptable depends on
/// where the session is (it is legal only as a wrapped continuation), so the
/// session checks it.
pub fn parse_data(buf: &mut RecvBuf) -> Result<u16> {
    buf.read_word()
}

/// ACK: block number, nothing after it.
pub fn parse_ack(buf: &mut RecvBuf) -> Result<u16> {
    let block = buf.read_word()?;
    if buf.remaining() != 0 {
        return Err(TftpError::Protocol(
            "trailing bytes after ACK packet".to_string(),
        ));
    }
    Ok(block)
}

/// ERROR: code + NUL-terminated message, nothing after it.
pub fn parse_error(buf: &mut RecvBuf) -> Result<(u16, String)> {
    let code = buf.read_word()?;
    let message = buf.read_string()?;
    if buf.remaining() != 0 {
        return Err(TftpError::Protocol(
            "trailing bytes after ERROR packet".to_string(),
        ));
    }
    Ok((code, message))
}

/// OACK: one or more option name/value pairs (RFC 2347).
pub fn parse_oack(buf: &mut RecvBuf) -> Result<OptionList> {
    let mut options = OptionList::new();
    while buf.remaining() > 0 {
        let name = buf.read_string()?;
        let value = buf.read_string()?;
        options.push(&name, value);
    }
    if options.is_empty() {
        return Err(TftpError::Protocol("empty OACK packet".to_string()));
    }
    Ok(options)
}

/// RFC 2347: the server may only acknowledge options the client proposed,
/// and a `timeout` acknowledgment must echo the proposed value exactly.
pub fn check_oack_against_proposed(oack: &OptionList, proposed: &OptionList) -> Result<()> {
    for (name, value) in oack.iter() {
        let Some(sent) = proposed.get(name) else {
            return Err(TftpError::Protocol(format!(
                "OACK acknowledges option '{}' that was never proposed",
                name
            )));
        };
        if name.eq_ignore_ascii_case("timeout") && value != sent {
            return Err(TftpError::Protocol(format!(
                "OACK timeout value '{}' does not echo proposed '{}'",
                value, sent
            )));
        }
    }
    Ok(())
}
