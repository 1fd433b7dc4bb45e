//! Flash engine: block-wise BABE flashing, raw region reads, firmware
//! version scan, boot-area restore and the VKP patch applier.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::babe::{self, BabeHeader, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::frame::{self, Packet};
use crate::payload::Dirs;
use crate::phone::{ChipId, PhoneInfo};
use crate::serial::{SerialLink, TIMEOUT};
use crate::util::{self, read_u32_le};
use crate::vkp::{VkpLine, VkpPatch};

/// Flash a parsed BABE image block by block. `flashfull` runs the
/// device-side finalization afterwards.
pub fn flash_babe(link: &mut SerialLink, image: &[u8], flashfull: bool) -> Result<usize> {
    let header = BabeHeader::parse(image)?;
    let data_start = header.data_start();
    if data_start > image.len() {
        return Err(Error::BadBabe("hash region crosses end of file"));
    }

    // hash region first, 0x800 bytes per CMD 0x0E frame
    for chunk in image[..data_start].chunks(0x800) {
        let cmd = frame::encode_binary(0x0E, chunk);
        link.send_ack_then(&cmd)?;

        let mut resp = [0u8; 7];
        let n = link.wait_packet(&mut resp, TIMEOUT * 5)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.cmd != 0x0F || pkt.data() != [0x00] {
            println!("send header error");
            return Err(Error::LoaderRejected {
                stage: "flash hash region",
            });
        }
    }

    // shrink the declared block count to what the file actually holds
    let declared = header.payload_size1 as usize;
    let mut blocks = 0;
    let mut pos = data_start;
    while blocks < declared {
        if pos + 8 >= image.len() {
            break;
        }
        let bsize = read_u32_le(image, pos + 4) as usize;
        if bsize > BLOCK_SIZE || pos + 8 + bsize > image.len() {
            break;
        }
        pos += 8 + bsize;
        blocks += 1;
    }
    println!("flashing {blocks} blocks");

    let mut pos = data_start;
    for bl in 0..blocks {
        let baddr = read_u32_le(image, pos);
        let bsize = read_u32_le(image, pos + 4) as usize;
        print!(
            "\rflashing block {}/{} (addr {:08X} size {:08X})",
            bl + 1,
            blocks,
            baddr,
            bsize
        );
        let _ = std::io::stdout().flush();

        let cmd = frame::encode_binary(0x10, &image[pos..pos + 8]);
        link.send_ack_then(&cmd)?;
        link.wait_ack(TIMEOUT)?;
        pos += 8;

        let mut rem = bsize;
        while rem > 0 {
            let tsize = rem.min(0x800);
            let cmd = frame::encode_binary(0x01, &image[pos..pos + tsize]);
            link.write_chunks(&cmd, 0x400)?;
            link.wait_ack(TIMEOUT)?;
            pos += tsize;
            rem -= tsize;
        }

        let mut resp = [0u8; 8];
        let n = link.wait_packet(&mut resp, TIMEOUT)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.cmd != 0x13 || pkt.data() != [0x00] {
            println!("\nsend block error");
            return Err(Error::UnexpectedFrame {
                got: pkt.cmd,
                expected: 0x13,
            });
        }
    }

    if flashfull {
        let cmd = frame::encode_binary(0x11, &[]);
        link.send_ack_then(&cmd)?;

        let mut resp = [0u8; 8];
        let n = link.wait_packet(&mut resp, TIMEOUT * 100)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.cmd != 0x12 || pkt.data() != [0x00] {
            println!("final error");
            return Err(Error::UnexpectedFrame {
                got: pkt.cmd,
                expected: 0x12,
            });
        }
    }

    println!("\n\n{blocks} blocks flashed ok");
    Ok(blocks)
}

/// Validate a firmware file strictly, then flash it.
pub fn flash_babe_file(link: &mut SerialLink, path: &Path, flashfull: bool) -> Result<()> {
    println!("\nflashing babe: {}", path.display());
    let image = std::fs::read(path)?;

    match babe::check(&image, babe::CheckMode::Full) {
        babe::CheckResult::Ok => {}
        babe::CheckResult::NotBabe => return Err(Error::BadBabe("not a BABE file")),
        babe::CheckResult::BadFile => return Err(Error::BadBabe("bad BABE file")),
        babe::CheckResult::CantCheck => return Err(Error::BadBabe("can not check BABE file")),
        babe::CheckResult::NotFull => return Err(Error::BadBabe("not a full BABE file")),
    }

    flash_babe(link, &image, flashfull)?;
    Ok(())
}

/// Read `size` bytes of flash starting at `addr` through CMD 0x32/0x33.
/// Every data frame is checksum- and address-verified; blocks are ACKed
/// except the last.
pub fn read_region(link: &mut SerialLink, addr: u32, size: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size as usize);
    read_region_into(link, addr, size, &mut out)?;
    Ok(out)
}

/// Like [`read_region`] but accumulating into a caller-owned buffer, so
/// partially received data survives an error.
pub fn read_region_into(
    link: &mut SerialLink,
    addr: u32,
    size: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut req = Vec::with_capacity(8);
    req.extend_from_slice(&addr.to_le_bytes());
    req.extend_from_slice(&addr.wrapping_add(size).to_le_bytes());
    let cmd = frame::encode_binary(0x32, &req);
    link.send_ack_then(&cmd)?;

    // the phone answers the request with one loose byte before streaming
    let mut stray = [0u8; 1];
    link.wait_exact(&mut stray, TIMEOUT * 50)?;

    let total_blocks = (size as usize).div_ceil(BLOCK_SIZE);
    let mut payload = [0u8; 0x800];

    while out.len() < size as usize {
        let mut hdrb = [0u8; 4];
        link.wait_exact(&mut hdrb, TIMEOUT * 5)?;
        if hdrb[0] != frame::HDR {
            return Err(Error::UnexpectedFrame {
                got: hdrb[0],
                expected: frame::HDR,
            });
        }
        let cmd = hdrb[1];
        let length = u16::from_le_bytes([hdrb[2], hdrb[3]]) as usize;
        if cmd == 0x09 {
            return Err(Error::LoaderRejected { stage: "flash read" });
        }
        if cmd != 0x33 {
            return Err(Error::UnexpectedFrame {
                got: cmd,
                expected: 0x33,
            });
        }
        if !(6..=0x800).contains(&length) {
            return Err(Error::FrameShort(length));
        }

        link.wait_exact(&mut payload[..length], TIMEOUT * 5)?;
        let mut cks = [0u8; 1];
        link.wait_exact(&mut cks, TIMEOUT * 5)?;
        let expected = frame::checksum(&[&hdrb, &payload[..length]]);
        if cks[0] != expected {
            link.send_nak()?;
            return Err(Error::FrameChecksum {
                got: cks[0],
                expected,
            });
        }

        let reply_addr = read_u32_le(&payload, 2);
        if reply_addr != addr.wrapping_add(out.len() as u32) {
            warn!(
                "bad reply addr: expected 0x{:08X} got 0x{:08X}",
                addr as usize + out.len(),
                reply_addr
            );
            return Err(Error::LoaderRejected {
                stage: "flash read addressing",
            });
        }

        let mut data_len = length - 6;
        if out.len() + data_len > size as usize {
            data_len = size as usize - out.len();
        }
        out.extend_from_slice(&payload[6..6 + data_len]);

        if out.len() < size as usize {
            link.send_ack()?;
        }

        let current = out.len() / BLOCK_SIZE;
        if current < total_blocks {
            print!(
                "\rreading block: {}/{} (addr 0x{:08X} size 0x10000)",
                current + 1,
                total_blocks,
                addr as usize + current * BLOCK_SIZE
            );
            let _ = std::io::stdout().flush();
        }
    }
    println!("\n");
    Ok(())
}

/// Dump a flash region to `backup/flashdump_<imei>_<addr>_<size>.bin`,
/// optionally rewrapped as a BABE `.ssw`.
pub fn flash_read(
    link: &mut SerialLink,
    phone: &PhoneInfo,
    dirs: &Dirs,
    addr: u32,
    size: u32,
) -> Result<PathBuf> {
    let outfile = dirs.backup.join(format!(
        "flashdump_{}_{:08X}_{:08X}.bin",
        phone.otp.imei, addr, size
    ));
    println!("\nreading raw: {}", outfile.display());
    println!("reading {} blocks", (size as usize).div_ceil(BLOCK_SIZE));

    // whatever arrived before an error stays on disk for inspection
    let mut data = Vec::with_capacity(size as usize);
    let result = read_region_into(link, addr, size, &mut data);
    std::fs::write(&outfile, &data)?;
    result?;

    if phone.save_as_babe {
        let image = babe::from_raw(&data, addr)?;
        let ssw = outfile.with_extension("ssw");
        std::fs::write(&ssw, image)?;
        std::fs::remove_file(&outfile)?;
        return Ok(ssw);
    }
    Ok(outfile)
}

pub fn convert_raw_to_babe(input: &Path, output: &Path, addr: u32) -> Result<()> {
    let raw = std::fs::read(input)?;
    let image = babe::from_raw(&raw, addr)?;
    std::fs::write(output, image)?;
    Ok(())
}

pub fn convert_babe_to_raw(input: &Path, output: &Path) -> Result<()> {
    let image = std::fs::read(input)?;
    let raw = babe::to_raw(&image)?;
    std::fs::write(output, raw)?;
    Ok(())
}

/// Read the chip-specific firmware region and scan it for the version
/// marker. The result lands in `phone.fw_version`.
pub fn read_fw_version(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<String> {
    let version = match phone.chip {
        ChipId::Pnx5230 => {
            let buf = read_region(link, 0x216E_0000, 0x30000)?;
            match util::scan_fw_version(&buf) {
                Some(v) => Some(v),
                None => {
                    let buf = read_region(link, 0x213F_C000, 0x10000)?;
                    util::scan_fw_version(&buf)
                }
            }
        }
        ChipId::Db2010b => {
            let buf = read_region(link, 0x4488_0000, 0x100000)?;
            util::scan_fw_version(&buf)
        }
        ChipId::Db2020 => {
            let buf = read_region(link, 0x45B1_0000, 0x80000)?;
            util::scan_fw_version(&buf)
        }
        other => return Err(Error::UnsupportedChip(other.wire_id())),
    };

    let version = version.ok_or(Error::BadBabe("no firmware version marker found"))?;
    println!("FW: {version}");
    phone.fw_version = version.clone();
    Ok(version)
}

/// After the anycid exploit the boot area must be restored before any
/// read: `rest/<fw>.rest` (BABE) takes precedence over `rest/<fw>.raw`.
pub fn restore_boot_area(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    let fw = read_fw_version(link, phone)?;

    let rest = dirs.rest.join(format!("{fw}.rest"));
    if rest.exists() {
        return flash_babe_file(link, &rest, true);
    }

    let raw_path = dirs.rest.join(format!("{fw}.raw"));
    if !raw_path.exists() {
        return Err(Error::PayloadMissing { path: raw_path });
    }
    println!("\nflashing raw: {}", raw_path.display());
    let raw = std::fs::read(&raw_path)?;
    let addr = if phone.chip == ChipId::Pnx5230 {
        0x2010_0000
    } else {
        0x4414_0000
    };
    let image = babe::from_raw(&raw, addr)?;
    flash_babe(link, &image, true)?;
    Ok(())
}

// ---- VKP applier ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VkpOutcome {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VkpChoice {
    Proceed,
    Skip,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VkpPrompt {
    AlreadyInstalled,
    Mismatch { unmatched: usize, total: usize },
}

/// In-memory rebuild of the flash pages a patch touches, kept in BABE
/// form so it can go straight back down with `flash_babe`.
pub struct PatchImage {
    pub bytes: Vec<u8>,
    index: Vec<(u32, usize, usize)>,
}

impl PatchImage {
    pub fn from_extents(extents: Vec<(u32, Vec<u8>)>) -> Result<PatchImage> {
        let bytes = babe::build_image(&extents)?;
        let mut index = Vec::with_capacity(extents.len());
        let mut offset = babe::HEADER_SIZE + extents.len();
        for (addr, data) in &extents {
            index.push((*addr, data.len(), offset + 8));
            offset += 8 + data.len();
        }
        Ok(PatchImage { bytes, index })
    }

    /// Byte offset of a flash address inside the rebuilt image.
    pub fn offset_of(&self, addr: u32) -> Option<usize> {
        for &(base, len, offset) in &self.index {
            if addr >= base && (addr as u64) < base as u64 + len as u64 {
                return Some(offset + (addr - base) as usize);
            }
        }
        None
    }

    fn scan(&self, lines: &[VkpLine], remove: bool) -> (usize, usize) {
        let mut unmatched = 0;
        let mut contrmatched = 0;
        for line in lines {
            let Some(offset) = self.offset_of(line.addr) else {
                unmatched += 1;
                continue;
            };
            let current = self.bytes[offset];
            let (expect, other) = if remove {
                (line.after, line.before)
            } else {
                (line.before, line.after)
            };
            if current != expect {
                unmatched += 1;
            }
            if current == other {
                contrmatched += 1;
            }
        }
        (unmatched, contrmatched)
    }

    fn apply(&mut self, lines: &[VkpLine], remove: bool) {
        for line in lines {
            if let Some(offset) = self.offset_of(line.addr) {
                self.bytes[offset] = if remove { line.before } else { line.after };
            }
        }
    }
}

/// Verify-and-decide state machine of the applier: returns the chosen
/// patch direction (`remove = true` means uninstall) after mutating the
/// buffer, or `None` when the user skipped this patch. Without a prompt
/// the mismatch states surface as errors instead.
pub fn apply_patch_to_image(
    image: &mut PatchImage,
    patch: &VkpPatch,
    mut prompt: Option<&mut dyn FnMut(VkpPrompt) -> VkpChoice>,
) -> Result<Option<bool>> {
    let total = patch.lines.len();
    let mut remove = false;
    let (mut unmatched, contrmatched) = image.scan(&patch.lines, remove);

    if contrmatched == total && unmatched > 0 {
        let Some(prompt) = prompt.as_mut() else {
            return Err(Error::VkpAlreadyInstalled);
        };
        match prompt(VkpPrompt::AlreadyInstalled) {
            VkpChoice::Proceed => {
                remove = true;
                unmatched = 0;
            }
            VkpChoice::Skip => return Ok(None),
            VkpChoice::Abort => return Err(Error::UserAbort),
        }
    }

    if unmatched > 0 {
        let Some(prompt) = prompt.as_mut() else {
            return Err(Error::VkpMismatch {
                count: unmatched,
                total,
            });
        };
        match prompt(VkpPrompt::Mismatch { unmatched, total }) {
            VkpChoice::Proceed => {}
            VkpChoice::Skip => return Ok(None),
            VkpChoice::Abort => return Err(Error::UserAbort),
        }
    }

    image.apply(&patch.lines, remove);
    Ok(Some(remove))
}

/// Full applier: read back every touched page, verify, prompt, patch,
/// flash the rebuilt image.
pub fn flash_vkp(
    link: &mut SerialLink,
    phone: &PhoneInfo,
    patch: &VkpPatch,
    prompt: Option<&mut dyn FnMut(VkpPrompt) -> VkpChoice>,
) -> Result<VkpOutcome> {
    let block_size = phone.flash_block_size.max(BLOCK_SIZE as u32);
    let blocks = patch.collect_blocks(block_size);
    let sub_blocks = (block_size as usize / BLOCK_SIZE).max(1);

    let mut extents = Vec::with_capacity(blocks.len() * sub_blocks);
    for &base in &blocks {
        for sub in 0..sub_blocks {
            let addr = base + (sub * BLOCK_SIZE) as u32;
            print!("\rreading flash page 0x{addr:08X}");
            let _ = std::io::stdout().flush();
            let data = read_region(link, addr, BLOCK_SIZE as u32)?;
            extents.push((addr, data));
        }
    }
    println!();

    let mut image = PatchImage::from_extents(extents)?;
    match apply_patch_to_image(&mut image, patch, prompt)? {
        Some(remove) => {
            debug!(
                "{} patch with {} byte(s)",
                if remove { "removing" } else { "applying" },
                patch.lines.len()
            );
            flash_babe(link, &image.bytes, true)?;
            Ok(VkpOutcome::Applied)
        }
        None => Ok(VkpOutcome::Skipped),
    }
}

/// Interactive prompt on standard input, the only place the core blocks
/// on the user.
pub fn stdin_prompt(kind: VkpPrompt) -> VkpChoice {
    match kind {
        VkpPrompt::AlreadyInstalled => {
            print!("Patch seems already installed. [u]ninstall/[s]kip/[a]bort: ");
        }
        VkpPrompt::Mismatch { unmatched, total } => {
            print!("{unmatched} of {total} byte(s) differ. [c]ontinue/[s]kip/[a]bort: ");
        }
    }
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return VkpChoice::Abort;
    }
    match line.trim().chars().next() {
        Some('u') | Some('U') | Some('c') | Some('C') => VkpChoice::Proceed,
        Some('s') | Some('S') => VkpChoice::Skip,
        _ => VkpChoice::Abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::MockPort;
    use crate::vkp;

    fn image_with_two_blocks() -> Vec<u8> {
        let extents = vec![
            (0x44140000u32, vec![0x11u8; BLOCK_SIZE]),
            (0x44150000u32, vec![0x22u8; BLOCK_SIZE]),
        ];
        babe::build_image(&extents).unwrap()
    }

    fn ok_frame(cmd: u8) -> Vec<u8> {
        frame::encode_binary(cmd, &[0x00])
    }

    #[test]
    fn test_flash_babe_two_full_blocks() {
        let image = image_with_two_blocks();
        let slices = BLOCK_SIZE / 0x800;

        let mut replies = Vec::new();
        replies.push(ok_frame(0x0F)); // hash region fits one chunk
        for _ in 0..2 {
            replies.push(vec![crate::serial::ACK]); // block header
            for _ in 0..slices - 1 {
                replies.push(vec![crate::serial::ACK]); // body slices
            }
            // the last slice ACK and the block confirmation stream as
            // one burst
            let mut tail = vec![crate::serial::ACK];
            tail.extend(ok_frame(0x13));
            replies.push(tail);
        }
        replies.push(ok_frame(0x12)); // finalize

        let port = MockPort::new(replies);
        let mut link = SerialLink::new(Box::new(port));
        let blocks = flash_babe(&mut link, &image, true).unwrap();
        assert_eq!(blocks, 2);
    }

    #[test]
    fn test_flash_babe_truncates_declared_count() {
        // declares two blocks but the file was cut inside the second
        let extents = vec![
            (0x100u32, vec![0xAB; 0x40]),
            (0x200u32, vec![0xCD; 0x40]),
        ];
        let full = babe::build_image(&extents).unwrap();
        let truncated = full[..full.len() - 0x20].to_vec();

        let mut tail = vec![crate::serial::ACK]; // single body slice
        tail.extend(ok_frame(0x13));
        let replies = vec![
            ok_frame(0x0F),           // hash region
            vec![crate::serial::ACK], // first block header
            tail,
        ];
        let port = MockPort::new(replies);
        let mut link = SerialLink::new(Box::new(port));
        let blocks = flash_babe(&mut link, &truncated, false).unwrap();
        assert_eq!(blocks, 1);
    }

    #[test]
    fn test_read_region_verifies_and_acks() {
        let half = 0x7FA; // largest data a 0x800-byte reply payload holds
        let size = (2 * half) as u32;
        let data_a = vec![0x5A; half];
        let data_b = vec![0xA5; half];

        let mut first_burst = vec![0x00]; // stray byte after the request
        first_burst.extend(data_frame(0x44140000, &data_a));
        let replies = vec![
            first_burst,
            // the second frame streams only after our ACK
            data_frame(0x44140000 + half as u32, &data_b),
        ];

        let port = MockPort::new(replies);
        let mut link = SerialLink::new(Box::new(port));
        let out = read_region(&mut link, 0x44140000, size).unwrap();
        assert_eq!(out.len(), size as usize);
        assert!(out[..half].iter().all(|&b| b == 0x5A));
        assert!(out[half..].iter().all(|&b| b == 0xA5));
    }

    fn data_frame(addr: u32, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8, 0u8];
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(data);
        let mut out = vec![frame::HDR, 0x33];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
        let sum = frame::checksum(&[&out]);
        out.push(sum);
        out
    }

    #[test]
    fn test_vkp_apply_then_uninstall() {
        let patch = vkp::parse("+1000\n00000100: AA BB\n").unwrap();
        assert_eq!(patch.lines[0].addr, 0x1100);

        let mut page = vec![0u8; BLOCK_SIZE];
        page[0x1100] = 0xAA;
        let mut image = PatchImage::from_extents(vec![(0, page)]).unwrap();

        // clean apply: no prompt expected
        let mut prompts = Vec::new();
        let remove = apply_patch_to_image(&mut image, &patch, Some(&mut |p| {
            prompts.push(p);
            VkpChoice::Abort
        }))
        .unwrap();
        assert_eq!(remove, Some(false));
        assert!(prompts.is_empty());
        let off = image.offset_of(0x1100).unwrap();
        assert_eq!(image.bytes[off], 0xBB);

        // second run sees the installed patch and uninstalls on request
        let remove = apply_patch_to_image(&mut image, &patch, Some(&mut |p| {
            assert_eq!(p, VkpPrompt::AlreadyInstalled);
            VkpChoice::Proceed
        }))
        .unwrap();
        assert_eq!(remove, Some(true));
        assert_eq!(image.bytes[off], 0xAA);
    }

    #[test]
    fn test_vkp_single_line_already_installed() {
        // contrmatched == line_count triggers the prompt even for 1 line
        let patch = vkp::parse("00000010: 10 20\n").unwrap();
        let mut page = vec![0u8; 0x40];
        page[0x10] = 0x20;
        let mut image = PatchImage::from_extents(vec![(0, page)]).unwrap();
        let mut seen = false;
        let out = apply_patch_to_image(&mut image, &patch, Some(&mut |p| {
            seen = p == VkpPrompt::AlreadyInstalled;
            VkpChoice::Skip
        }))
        .unwrap();
        assert!(seen);
        assert_eq!(out, None);
    }

    #[test]
    fn test_vkp_non_interactive_surfaces_errors() {
        let patch = vkp::parse("00000010: 10 20\n").unwrap();
        let mut page = vec![0u8; 0x40];
        page[0x10] = 0x20; // already installed
        let mut image = PatchImage::from_extents(vec![(0, page)]).unwrap();
        assert!(matches!(
            apply_patch_to_image(&mut image, &patch, None),
            Err(Error::VkpAlreadyInstalled)
        ));

        let mut page = vec![0u8; 0x40];
        page[0x10] = 0x77;
        let mut image = PatchImage::from_extents(vec![(0, page)]).unwrap();
        assert!(matches!(
            apply_patch_to_image(&mut image, &patch, None),
            Err(Error::VkpMismatch { count: 1, total: 1 })
        ));
    }

    #[test]
    fn test_vkp_mismatch_prompts_and_aborts() {
        let patch = vkp::parse("00000010: 10 20\n00000011: 11 21\n").unwrap();
        let mut page = vec![0u8; 0x40];
        page[0x10] = 0x10;
        page[0x11] = 0x77; // neither before nor after
        let mut image = PatchImage::from_extents(vec![(0, page)]).unwrap();
        let err = apply_patch_to_image(&mut image, &patch, Some(&mut |p| {
            assert_eq!(
                p,
                VkpPrompt::Mismatch {
                    unmatched: 1,
                    total: 2
                }
            );
            VkpChoice::Abort
        }))
        .unwrap_err();
        assert!(matches!(err, Error::UserAbort));
    }
}
