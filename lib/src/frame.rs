//! Framed-packet codec shared by the bootrom, loader and ChipSelect
//! protocols. All three dialects ride on one frame shape:
//!
//! ```text
//! [0x89][cmd][len lo][len hi][payload...][checksum]
//! ```
//!
//! where `checksum = (xor over all framed bytes + 7) & 0xFF`. Replies may
//! carry a leading ACK (`0x06`) or one or two stray prefix bytes
//! (`0x00`/`0x23`/`0x3E`, emitted by some ChipSelect loaders) which are
//! not covered by the checksum.

use crate::error::{Error, Result};

pub const HDR: u8 = 0x89;

/// Control replies never exceed this; a fixed payload area keeps decoding
/// allocation-free.
pub const MAX_PAYLOAD: usize = 512;

pub fn checksum(parts: &[&[u8]]) -> u8 {
    let mut sum = 0u8;
    for part in parts {
        for &b in *part {
            sum ^= b;
        }
    }
    sum.wrapping_add(7)
}

/// Encode a binary-dialect frame.
pub fn encode_binary(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(HDR);
    out.push(cmd);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let sum = checksum(&[&out]);
    out.push(sum);
    out
}

/// Encode a ChipSelect-dialect frame: the subcommand rides as the first
/// payload byte and is counted in the length.
pub fn encode_cs(cmd: u8, subcmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(HDR);
    out.push(cmd);
    out.extend_from_slice(&((payload.len() + 1) as u16).to_le_bytes());
    out.push(subcmd);
    out.extend_from_slice(payload);
    let sum = checksum(&[&out]);
    out.push(sum);
    out
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub cmd: u8,
    len: u16,
    data: [u8; MAX_PAYLOAD],
    pub checksum: u8,
    /// The reply carried a leading ACK byte.
    pub acked: bool,
}

impl Packet {
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode a captured reply buffer. Classifies the dialect from the
    /// leading bytes, strips the ACK or stray prefix, then verifies the
    /// checksum over the framed bytes.
    pub fn decode(buf: &[u8]) -> Result<Packet> {
        let mut start = 0;
        let mut acked = false;
        if buf.len() >= 2 && buf[0] == crate::serial::ACK && buf[1] == HDR {
            acked = true;
            start = 1;
        } else {
            while start < 2
                && buf.len() > start
                && matches!(buf[start], 0x00 | 0x23 | 0x3E)
            {
                start += 1;
            }
        }

        let body = &buf[start..];
        if body.len() < 5 {
            return Err(Error::FrameShort(buf.len()));
        }
        if body[0] != HDR {
            return Err(Error::UnexpectedFrame {
                got: body[0],
                expected: HDR,
            });
        }
        let cmd = body[1];
        let len = u16::from_le_bytes([body[2], body[3]]) as usize;
        if len > MAX_PAYLOAD || body.len() < 4 + len + 1 {
            return Err(Error::FrameShort(buf.len()));
        }
        let expected = checksum(&[&body[..4 + len]]);
        let got = body[4 + len];
        if got != expected {
            return Err(Error::FrameChecksum { got, expected });
        }
        let mut data = [0u8; MAX_PAYLOAD];
        data[..len].copy_from_slice(&body[4..4 + len]);
        Ok(Packet {
            cmd,
            len: len as u16,
            data,
            checksum: got,
            acked,
        })
    }
}
