//! BABE signed-image container: the format used for loader payloads and
//! flashable firmware blobs. A fixed 0x380-byte header is followed by a
//! version-dependent hash area and a sequence of payload blocks, each a
//! `(dest_addr: u32 LE, size: u32 LE)` pair plus `size` bytes.

use deku::prelude::*;

use crate::error::{Error, Result};
use crate::util::read_u32_le;

/// Image signature, `BA BE` on disk.
pub const SIGNATURE: u16 = 0xBEBA;

pub const HEADER_SIZE: usize = 0x380;

/// Payload blocks never exceed one 64 KiB flash page.
pub const BLOCK_SIZE: usize = 0x10000;

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct BabeHeader {
    pub sig: u16,
    pub unk: u8,
    pub ver: u8,
    pub color: u32,
    pub platform: u32,
    pub z1: u32,
    pub cid: u32,
    pub clr: u32,
    pub f0: [u32; 9],
    pub certplace: [u8; 488],
    pub prologue_start: u32,
    pub prologue_size1: u32,
    pub prologue_size2: u32,
    pub unk1: [u32; 4],
    pub hash1: [u8; 128],
    pub flags: u32,
    pub unk2: [u32; 4],
    pub clr2: u32,
    pub f1: [u32; 3],
    pub payload_start: u32,
    pub payload_size1: u32,
    pub payload_size2: u32,
    pub flags2: u32,
    pub unk4: [u32; 3],
    pub hash2: [u8; 128],
}

impl BabeHeader {
    pub fn parse(bytes: &[u8]) -> Result<BabeHeader> {
        let ((_rest, _), header) = BabeHeader::from_bytes((bytes, 0))
            .map_err(|_| Error::BadBabe("truncated header"))?;
        Ok(header)
    }

    fn empty() -> BabeHeader {
        BabeHeader {
            sig: SIGNATURE,
            unk: 0,
            ver: 3,
            color: 0,
            platform: 0,
            z1: 0,
            cid: 0,
            clr: 0,
            f0: [0; 9],
            certplace: [0; 488],
            prologue_start: 0,
            prologue_size1: 0,
            prologue_size2: 0,
            unk1: [0; 4],
            hash1: [0; 128],
            flags: 0,
            unk2: [0; 4],
            clr2: 0,
            f1: [0; 3],
            payload_start: 0,
            payload_size1: 0,
            payload_size2: 0,
            flags2: 0,
            unk4: [0; 3],
            hash2: [0; 128],
        }
    }

    /// Bytes of hash material per payload block: v4 images carry a full
    /// SHA digest, older versions one byte.
    pub fn hash_bytes_per_block(&self) -> usize {
        if self.ver >= 4 { 20 } else { 1 }
    }

    /// Offset of the first payload block header (header + hash area).
    pub fn data_start(&self) -> usize {
        if self.ver <= 2 {
            0x480
        } else {
            self.payload_size1 as usize * self.hash_bytes_per_block() + HEADER_SIZE
        }
    }
}

/// Cheap structural validity test: magic, known version, and a hash
/// region that leaves room for at least one block header.
pub fn is_valid(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_SIZE || bytes[0] != 0xBA || bytes[1] != 0xBE {
        return false;
    }
    let Ok(header) = BabeHeader::parse(bytes) else {
        return false;
    };
    if !(2..=4).contains(&header.ver) {
        return false;
    }
    header.data_start() + 8 <= bytes.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Full,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    NotBabe,
    BadFile,
    CantCheck,
    NotFull,
    Ok,
}

/// Classify an image. Only `Ok` permits flashing it as a full firmware.
pub fn check(bytes: &[u8], mode: CheckMode) -> CheckResult {
    if bytes.len() < 2 || bytes[0] != 0xBA || bytes[1] != 0xBE {
        return CheckResult::NotBabe;
    }
    let Ok(header) = BabeHeader::parse(bytes) else {
        return CheckResult::BadFile;
    };
    if !(2..=4).contains(&header.ver) {
        return CheckResult::BadFile;
    }
    let data_start = header.data_start();
    if data_start + 8 > bytes.len() {
        return CheckResult::BadFile;
    }
    let blocks = header.payload_size1 as usize;
    if blocks == 0 {
        return CheckResult::CantCheck;
    }
    if mode == CheckMode::Fast {
        return CheckResult::Ok;
    }

    let mut pos = data_start;
    for _ in 0..blocks {
        if pos + 8 > bytes.len() {
            return CheckResult::NotFull;
        }
        let size = read_u32_le(bytes, pos + 4) as usize;
        if size > BLOCK_SIZE {
            return CheckResult::BadFile;
        }
        pos += 8;
        if pos + size > bytes.len() {
            return CheckResult::NotFull;
        }
        pos += size;
    }
    CheckResult::Ok
}

/// Build a v3 image from a list of `(dest_addr, data)` extents: minimal
/// header, one stub hash byte per block, then the block stream.
pub fn build_image(extents: &[(u32, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut header = BabeHeader::empty();
    header.payload_size1 = extents.len() as u32;
    let mut out = header
        .to_bytes()
        .map_err(|_| Error::BadBabe("header encode"))?;
    out.resize(out.len() + extents.len(), 0);
    for (addr, data) in extents {
        out.extend_from_slice(&addr.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// Wrap a raw dump into a flashable v3 image, splitting at 64 KiB.
pub fn from_raw(raw: &[u8], mut addr: u32) -> Result<Vec<u8>> {
    let mut extents = Vec::with_capacity(raw.len().div_ceil(BLOCK_SIZE));
    for chunk in raw.chunks(BLOCK_SIZE) {
        extents.push((addr, chunk.to_vec()));
        addr = addr.wrapping_add(chunk.len() as u32);
    }
    build_image(&extents)
}

/// Concatenate the block bodies of an image back into raw bytes, stopping
/// at truncation.
pub fn to_raw(bytes: &[u8]) -> Result<Vec<u8>> {
    let header = BabeHeader::parse(bytes)?;
    if header.sig != SIGNATURE || !(2..=4).contains(&header.ver) {
        return Err(Error::BadBabe("not a BABE image"));
    }
    let mut pos = header.data_start();
    let mut out = Vec::new();
    for _ in 0..header.payload_size1 {
        if pos + 8 > bytes.len() {
            break;
        }
        let size = read_u32_le(bytes, pos + 4) as usize;
        if size > BLOCK_SIZE || pos + 8 + size > bytes.len() {
            break;
        }
        out.extend_from_slice(&bytes[pos + 8..pos + 8 + size]);
        pos += 8 + size;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_image(blocks: &[(u32, usize)]) -> Vec<u8> {
        let extents: Vec<(u32, Vec<u8>)> = blocks
            .iter()
            .map(|&(addr, size)| (addr, vec![0xA5; size]))
            .collect();
        build_image(&extents).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let image = test_image(&[(0x44140000, 0x100)]);
        let header = BabeHeader::parse(&image).unwrap();
        assert_eq!(header.sig, SIGNATURE);
        assert_eq!(header.ver, 3);
        assert_eq!(header.payload_size1, 1);
        assert_eq!(header.data_start(), HEADER_SIZE + 1);
    }

    #[test]
    fn test_is_valid() {
        let image = test_image(&[(0x44140000, 0x40)]);
        assert!(is_valid(&image));
        assert!(!is_valid(&[0xBA, 0xBE, 0x00]));
        let mut bad = image.clone();
        bad[0] = 0x00;
        assert!(!is_valid(&bad));
    }

    #[test]
    fn test_check_full() {
        let image = test_image(&[(0x44140000, 0x80), (0x44150000, 0x80)]);
        assert_eq!(check(&image, CheckMode::Full), CheckResult::Ok);

        let truncated = &image[..image.len() - 0x40];
        assert_eq!(check(truncated, CheckMode::Full), CheckResult::NotFull);

        assert_eq!(check(&[0x12, 0x34], CheckMode::Full), CheckResult::NotBabe);
    }

    #[test]
    fn test_check_bad_version() {
        let mut image = test_image(&[(0x44140000, 0x10)]);
        image[3] = 9;
        assert_eq!(check(&image, CheckMode::Full), CheckResult::BadFile);
    }

    #[test]
    fn test_check_no_blocks() {
        let image = build_image(&[]).unwrap();
        // header alone leaves no room for a block header either
        assert_eq!(check(&image, CheckMode::Full), CheckResult::BadFile);
    }

    #[test]
    fn test_raw_roundtrip() {
        let pattern: Vec<u8> = (0..=255u8).collect();
        let mut raw = Vec::new();
        for _ in 0..2048 {
            raw.extend_from_slice(&pattern);
        }
        let image = from_raw(&raw, 0x20100000).unwrap();
        let header = BabeHeader::parse(&image).unwrap();
        assert_eq!(header.payload_size1 as usize, raw.len() / BLOCK_SIZE);
        let back = to_raw(&image).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_to_raw_truncation_tolerant() {
        let image = test_image(&[(0x100, 0x20), (0x200, 0x20)]);
        let cut = &image[..image.len() - 0x10];
        let back = to_raw(cut).unwrap();
        // only the first, complete block survives
        assert_eq!(back.len(), 0x20);
    }
}
