//! Netascii line-ending translation (RFC 1350).
//!
//! On the wire, LF becomes CR LF and a lone CR becomes CR NUL. Both halves of
//! a pair may land in different DATA blocks, so the encoder and decoder carry
//! their state across block boundaries.

use crate::error::{Result, TftpError};

/// Local-to-wire translator. In binary mode it is a straight copy.
#[derive(Debug)]
pub struct Encoder {
    binary: bool,
    /// The last local byte consumed was a CR whose pair is still open.
    prev_cr: bool,
    /// Second byte of an expansion that did not fit the previous block.
    pending: Option<u8>,
}

impl Encoder {
    pub fn new(binary: bool) -> Self {
        Self {
            binary,
            prev_cr: false,
            pending: None,
        }
    }

    /// Produces up to `block_size` wire bytes from `src` starting at `*pos`,
    /// advancing `*pos` past the local bytes consumed. A short (or empty)
    /// return marks the final block of the transfer.
    pub fn encode_block(&mut self, src: &[u8], pos: &mut usize, block_size: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(block_size);

        if self.binary {
            let n = (src.len() - *pos).min(block_size);
            out.extend_from_slice(&src[*pos..*pos + n]);
            *pos += n;
            return out;
        }

        if let Some(b) = self.pending.take() {
            out.push(b);
        }

        while out.len() < block_size {
            let Some(&b) = src.get(*pos) else {
                break;
            };
            if self.prev_cr && b != b'\n' {
                // the CR turned out to be lone: close it as CR NUL before
                // looking at the current byte again
                out.push(0);
                self.prev_cr = false;
                continue;
            }
            match b {
                b'\r' => {
                    out.push(b'\r');
                    self.prev_cr = true;
                }
                b'\n' => {
                    if self.prev_cr {
                        // local CR LF is already in wire form
                        out.push(b'\n');
                    } else {
                        out.push(b'\r');
                        if out.len() < block_size {
                            out.push(b'\n');
                        } else {
                            self.pending = Some(b'\n');
                        }
                    }
                    self.prev_cr = false;
                }
                _ => out.push(b),
            }
            *pos += 1;
        }

        // A file ending in a lone CR still needs the closing NUL.
        if *pos >= src.len() && self.prev_cr && out.len() < block_size {
            out.push(0);
            self.prev_cr = false;
        }

        out
    }
}

/// Wire-to-local translator. In binary mode it is a straight copy.
#[derive(Debug)]
pub struct Decoder {
    binary: bool,
    /// A CR arrived as the last wire byte seen; the next byte resolves it.
    cr_active: bool,
}

impl Decoder {
    pub fn new(binary: bool) -> Self {
        Self {
            binary,
            cr_active: false,
        }
    }

    /// Decodes one DATA payload, appending local bytes to `out`.
    pub fn decode_block(&mut self, wire: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if self.binary {
            out.extend_from_slice(wire);
            return Ok(());
        }
        for &b in wire {
            if self.cr_active {
                match b {
                    b'\n' => out.push(b'\n'),
                    0 => out.push(b'\r'),
                    _ => {
                        return Err(TftpError::Protocol(format!(
                            "invalid netascii sequence CR 0x{:02x}",
                            b
                        )));
                    }
                }
                self.cr_active = false;
            } else if b == b'\r' {
                self.cr_active = true;
            } else {
                out.push(b);
            }
        }
        Ok(())
    }

    /// Called once after the final block; a dangling CR means the stream was
    /// truncated mid-pair.
    pub fn finish(&self) -> Result<()> {
        if self.cr_active {
            return Err(TftpError::Protocol(
                "netascii stream ends with unresolved CR".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(encoder: &mut Encoder, src: &[u8], block_size: usize) -> Vec<Vec<u8>> {
        let mut pos = 0;
        let mut blocks = Vec::new();
        loop {
            let block = encoder.encode_block(src, &mut pos, block_size);
            let last = block.len() < block_size;
            blocks.push(block);
            if last {
                break;
            }
        }
        blocks
    }

    fn decode_all(decoder: &mut Decoder, blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for block in blocks {
            decoder.decode_block(block, &mut out).unwrap();
        }
        decoder.finish().unwrap();
        out
    }

    #[test]
    fn binary_mode_is_identity() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1200).collect();
        let mut enc = Encoder::new(true);
        let blocks = encode_all(&mut enc, &data, 512);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].len(), 1200 - 1024);

        let mut dec = Decoder::new(true);
        assert_eq!(decode_all(&mut dec, &blocks), data);
    }

    #[test]
    fn lf_expands_to_cr_lf() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\nb\n", 512);
        assert_eq!(blocks[0], b"a\r\nb\r\n");
    }

    #[test]
    fn lone_cr_expands_to_cr_nul() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\rb", 512);
        assert_eq!(blocks[0], b"a\r\x00b");
    }

    #[test]
    fn consecutive_lone_crs_each_close_with_nul() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\r\rb", 512);
        assert_eq!(blocks[0], b"a\r\x00\r\x00b");

        let mut dec = Decoder::new(false);
        assert_eq!(decode_all(&mut dec, &blocks), b"a\r\rb");
    }

    #[test]
    fn local_cr_lf_passes_through() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\r\nb", 512);
        assert_eq!(blocks[0], b"a\r\nb");
    }

    #[test]
    fn trailing_lone_cr_closes_with_nul() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"ab\r", 512);
        assert_eq!(blocks[0], b"ab\r\x00");
    }

    #[test]
    fn lf_expansion_straddles_block_boundary() {
        // "a\n" with block size 2: CR lands as the last byte of block 1,
        // LF opens block 2.
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\n", 2);
        assert_eq!(blocks[0], b"a\r");
        assert_eq!(blocks[1], b"\n");
    }

    #[test]
    fn cr_nul_straddles_block_boundary() {
        // "a\rb": CR fills block 1; block 2 must open with the NUL.
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\rb", 2);
        assert_eq!(blocks[0], b"a\r");
        assert_eq!(blocks[1], b"\x00b");
    }

    #[test]
    fn trailing_cr_on_full_block_emits_nul_alone() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"a\r", 2);
        assert_eq!(blocks[0], b"a\r");
        assert_eq!(blocks[1], b"\x00");
    }

    #[test]
    fn exact_multiple_terminates_with_empty_block() {
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, b"abcd", 4);
        assert_eq!(blocks[0], b"abcd");
        assert_eq!(blocks[1], b"");
    }

    #[test]
    fn encode_decode_round_trip_on_lf_text() {
        let src = b"line one\nline two\n\nlast".to_vec();
        let mut enc = Encoder::new(false);
        let blocks = encode_all(&mut enc, &src, 8);
        let mut dec = Decoder::new(false);
        assert_eq!(decode_all(&mut dec, &blocks), src);
    }

    #[test]
    fn decoder_resolves_pair_across_blocks() {
        let mut dec = Decoder::new(false);
        let mut out = Vec::new();
        dec.decode_block(b"a\r", &mut out).unwrap();
        dec.decode_block(b"\nb", &mut out).unwrap();
        dec.decode_block(b"c\r", &mut out).unwrap();
        dec.decode_block(b"\x00", &mut out).unwrap();
        dec.finish().unwrap();
        assert_eq!(out, b"a\nbc\r");
    }

    #[test]
    fn decoder_rejects_bad_cr_pair() {
        let mut dec = Decoder::new(false);
        let mut out = Vec::new();
        assert!(dec.decode_block(b"a\rx", &mut out).is_err());
    }

    #[test]
    fn decoder_rejects_unresolved_trailing_cr() {
        let mut dec = Decoder::new(false);
        let mut out = Vec::new();
        dec.decode_block(b"ab\r", &mut out).unwrap();
        assert!(dec.finish().is_err());
    }
}
