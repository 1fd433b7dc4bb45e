//! GDFS engine: the on-device key/value store addressed by
//! `(block, msb, lsb)`. Reads go through the binary dialect (CMD 0x21) or
//! the ChipSelect sub-protocol; PNX5230 phones additionally answer the
//! bootrom `ICG1` dialect before any loader is up.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Error, Result};
use crate::frame::{self, Packet};
use crate::payload::Dirs;
use crate::phone::{ChipId, PhoneInfo};
use crate::serial::{SerialLink, TIMEOUT};
use crate::util::{self, read_u32_le};

/// Writes are capped at 0x600 bytes per variable.
pub const MAX_VAR_WRITE: usize = 0x600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdfsField {
    PhoneName,
    Brand,
    CxcArticle,
    CxcVersion,
    LangPack,
    CdaArticle,
    CdaRevision,
    DefaultArticle,
    DefaultVersion,
}

/// Per-chip variable map as `(block, msb, lsb)`. DB2000 keeps these in
/// block 4 on Z1010 units; fields missing for a chip return `None`.
pub fn var_address(field: GdfsField, chip: ChipId, is_z1010: bool) -> Option<(u8, u8, u8)> {
    use GdfsField::*;

    let db2000_block = if is_z1010 { 0x04 } else { 0x02 };
    match chip {
        ChipId::Db2000 => match field {
            PhoneName => Some((db2000_block, 0x8F, 0x0C)),
            Brand => Some((db2000_block, 0xB9, 0x0C)),
            LangPack => Some((db2000_block, 0xBB, 0x0C)),
            CdaArticle => Some((db2000_block, 0xBC, 0x0C)),
            CdaRevision => Some((db2000_block, 0xBD, 0x0C)),
            DefaultArticle => Some((db2000_block, 0xBE, 0x0C)),
            DefaultVersion => Some((db2000_block, 0xBF, 0x0C)),
            CxcArticle | CxcVersion => None,
        },
        ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => match field {
            PhoneName => Some((0x02, 0x8F, 0x0C)),
            Brand => Some((0x02, 0xB9, 0x0C)),
            CxcArticle => Some((0x02, 0xE9, 0x0C)),
            CxcVersion => Some((0x02, 0xEA, 0x0C)),
            LangPack => Some((0x02, 0xBB, 0x0C)),
            CdaArticle => Some((0x02, 0xBC, 0x0C)),
            CdaRevision => Some((0x02, 0xBD, 0x0C)),
            DefaultArticle => Some((0x02, 0xBE, 0x0C)),
            DefaultVersion => Some((0x02, 0xBF, 0x0C)),
        },
        ChipId::Db2020 | ChipId::Pnx5230 => match field {
            PhoneName => Some((0x02, 0xBB, 0x0D)),
            Brand => Some((0x02, 0xE5, 0x0D)),
            CxcArticle => Some((0x02, 0x15, 0x0E)),
            CxcVersion => Some((0x02, 0x16, 0x0E)),
            LangPack => Some((0x02, 0xE7, 0x0D)),
            CdaArticle => Some((0x02, 0xE8, 0x0D)),
            CdaRevision => Some((0x02, 0xE9, 0x0D)),
            DefaultArticle => Some((0x02, 0xEA, 0x0D)),
            DefaultVersion => Some((0x02, 0xEB, 0x0D)),
        },
        ChipId::Unknown(_) => None,
    }
}

/// Binary-dialect variable read (CMD 0x21).
pub fn read_var(link: &mut SerialLink, block: u8, msb: u8, lsb: u8) -> Result<Packet> {
    let cmd = frame::encode_binary(0x21, &[block, lsb, msb]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 520];
    let n = link.wait_packet(&mut resp, TIMEOUT * 5)?;
    Packet::decode(&resp[..n])
}

/// Read a named field and decode it: the model name is stored as wide
/// chars, everything else as ASCII. The reply's one-byte tag is skipped.
pub fn read_string_var(
    link: &mut SerialLink,
    field: GdfsField,
    chip: ChipId,
    is_z1010: bool,
) -> Result<String> {
    let (block, msb, lsb) =
        var_address(field, chip, is_z1010).ok_or(Error::UnsupportedChip(chip.wire_id()))?;
    let pkt = read_var(link, block, msb, lsb)?;
    let data = pkt.data();
    if data.len() <= 1 {
        return Ok(String::new());
    }
    if field == GdfsField::PhoneName {
        Ok(util::decode_wide(&data[1..]))
    } else {
        let text = &data[1..];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        Ok(String::from_utf8_lossy(&text[..end]).into_owned())
    }
}

/// Encode a binary-dialect variable write (CMD 0x20). The address bytes
/// always ride along, so a 0-length write is a 3-byte payload.
pub fn encode_write_var(block: u8, msb: u8, lsb: u8, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > 0x1000 {
        return Err(Error::FrameShort(data.len()));
    }
    let mut payload = Vec::with_capacity(data.len() + 3);
    payload.push(block);
    payload.push(lsb);
    payload.push(msb);
    payload.extend_from_slice(data);
    Ok(frame::encode_binary(0x20, &payload))
}

/// Binary-dialect variable write; the server sends no confirmation on
/// this path.
pub fn write_var_binary(
    link: &mut SerialLink,
    block: u8,
    msb: u8,
    lsb: u8,
    data: &[u8],
) -> Result<()> {
    let cmd = encode_write_var(block, msb, lsb, data)?;
    link.send_ack_then(&cmd)
}

/// ChipSelect-dialect variable read (subcmd 0x01).
pub fn cs_read_var(link: &mut SerialLink, block: u8, msb: u8, lsb: u8) -> Result<Packet> {
    let cmd = frame::encode_cs(0x04, 0x01, &[block, lsb, msb]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 520];
    let n = link.wait_packet(&mut resp, TIMEOUT * 10)?;
    Packet::decode(&resp[..n])
}

/// ChipSelect-dialect variable write (subcmd 0x03): payload is
/// `[block, lsb, msb, len: u32 LE, data]`, confirmed by ACK then an
/// `FF 00` reply.
pub fn write_var(link: &mut SerialLink, block: u8, msb: u8, lsb: u8, data: &[u8]) -> Result<()> {
    let mut payload = Vec::with_capacity(data.len() + 7);
    payload.push(block);
    payload.push(lsb);
    payload.push(msb);
    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
    payload.extend_from_slice(data);

    let cmd = frame::encode_cs(0x04, 0x03, &payload);
    link.send_ack_then(&cmd)?;
    link.wait_ack(TIMEOUT * 50)?;

    let mut resp = [0u8; 8];
    let n = link.wait_packet(&mut resp, TIMEOUT)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.data().first() != Some(&0xFF) || pkt.data().get(1) != Some(&0x00) {
        return Err(Error::GdfsServerRejected);
    }
    Ok(())
}

/// PNX5230 bootrom dialect: `"ICG1"` + `[block, lsb, msb]`, answered by a
/// three-byte echoed header, a little-endian length, then the data.
pub fn pnx_read_var(link: &mut SerialLink, block: u8, msb: u8, lsb: u8) -> Result<Vec<u8>> {
    link.write(b"ICG1")?;
    link.write(&[block, lsb, msb])?;

    let mut echo = [0u8; 3];
    link.wait_exact(&mut echo, TIMEOUT * 10)?;
    if echo != [block, msb, lsb] {
        return Err(Error::UnexpectedFrame {
            got: echo[0],
            expected: block,
        });
    }

    let mut len_bytes = [0u8; 4];
    link.wait_exact(&mut len_bytes, TIMEOUT * 10)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > 0x800 {
        return Err(Error::FrameShort(len));
    }

    let mut data = vec![0u8; len];
    link.wait_exact(&mut data, TIMEOUT * 10)?;
    Ok(data)
}

// ---- SIM lock and user code ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLock {
    pub locked: bool,
    pub mcc: String,
    pub mnc: String,
}

/// Decode the SIM-lock unit (block 00/00/06, tag already skipped): the
/// byte at 0x34 doubles as locked flag and first BCD byte of MCC/MNC.
pub fn parse_simlock(data: &[u8]) -> Option<SimLock> {
    let flag = *data.get(0x34)?;
    if data.len() < 0x37 {
        return None;
    }
    let digits = util::decode_bcd(&data[0x34..0x37]);
    let mcc = digits.chars().take(3).collect();
    let mnc = digits.chars().skip(3).collect();
    Some(SimLock {
        locked: flag != 0,
        mcc,
        mnc,
    })
}

pub fn get_simlock(link: &mut SerialLink) -> Result<Option<SimLock>> {
    let pkt = read_var(link, 0x00, 0x00, 0x06)?;
    let data = pkt.data();
    if data.len() <= 1 {
        return Ok(None);
    }
    Ok(parse_simlock(&data[1..]))
}

/// Decode the user-code unit (block 00/00/0E): digit count at 0x62,
/// digits packed two per byte from 0x63, low nibble first.
pub fn parse_usercode(data: &[u8]) -> String {
    let count = data.get(0x62).map_or(0, |&b| b as usize);
    if count == 0 {
        return String::from("No usercode");
    }
    let mut code = String::new();
    for i in 0..count.min(8) {
        let Some(&byte) = data.get(0x63 + i / 2) else {
            break;
        };
        let digit = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
        code.push(char::from(b'0' + (digit & 0x0F)));
    }
    code
}

pub fn get_usercode(link: &mut SerialLink) -> Result<String> {
    let pkt = read_var(link, 0x00, 0x00, 0x0E)?;
    Ok(parse_usercode(pkt.data()))
}

/// Reset the user code to `0000` through the ChipSelect loader.
pub fn reset_usercode(link: &mut SerialLink) -> Result<()> {
    print!("Reset USERCODE... ");
    let cmd = frame::encode_cs(0x01, 0x0D, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 64];
    let n = link.wait_packet(&mut resp, TIMEOUT * 5)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.cmd == 0x01 && pkt.data().get(1) == Some(&0x00) {
        println!("done\n\nUSERCODE reset to '0000'\n");
        return Ok(());
    }
    println!("failed\n");
    Err(Error::GdfsServerRejected)
}

/// Acknowledged end of a ChipSelect session (subcmd 0x08).
pub fn terminate_access(link: &mut SerialLink) -> Result<()> {
    print!("Terminating GDFS server... ");
    let cmd = frame::encode_cs(0x01, 0x08, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 8];
    if link.wait_packet(&mut resp, TIMEOUT * 10).is_err() {
        println!("failed\n");
        return Err(Error::Timeout);
    }
    println!("OK\n");
    Ok(())
}

// ---- full-store backup and restore ----

/// Pull the whole variable table through ChipSelect subcmd 0x02. The
/// device streams it in chunks, each prefixed by a frame header carrying
/// the chunk size; an ACK requests the next chunk. The output file is
/// `[count: u32 LE]` followed by `[block][lsb][msb][len: u32 LE][data]`
/// per variable.
pub fn backup_gdfs(link: &mut SerialLink, phone: &PhoneInfo, dirs: &Dirs) -> Result<PathBuf> {
    println!("Back up GDFS...");

    let cmd = frame::encode_cs(0x04, 0x02, &[]);
    link.send_ack_then(&cmd)?;
    link.wait_ack(TIMEOUT * 100)?;

    let mut preamble = [0u8; 10];
    link.wait_exact(&mut preamble, TIMEOUT * 500)?;
    let chunk_size = (u16::from_le_bytes([preamble[2], preamble[3]]) as usize) + 1;
    let var_count = read_u32_le(&preamble, 6);
    println!("stated number of vars: {var_count}");

    let mut stream = ChunkStream {
        link,
        left: chunk_size.saturating_sub(preamble.len()),
    };

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(&var_count.to_le_bytes());
    let mut pull_vars = || -> Result<()> {
        for i in 0..var_count {
            let timeout = if i == 0 { TIMEOUT * 500 } else { TIMEOUT * 100 };
            let block = stream.next_var_byte(timeout)?;
            out.push(block);

            let mut rest = [0u8; 6];
            stream.next_bytes(&mut rest, TIMEOUT * 100)?;
            out.extend_from_slice(&rest);

            let len = read_u32_le(&rest, 2) as usize;
            let mut data = vec![0u8; len];
            stream.next_bytes(&mut data, TIMEOUT * 100)?;
            out.extend_from_slice(&data);

            print!("\rreading unit {}/{var_count}", i + 1);
            let _ = std::io::stdout().flush();
        }
        Ok(())
    };
    let result = pull_vars();
    println!();

    // a partial table is still worth keeping around on error
    let outfile = dirs.backup.join(format!(
        "GDFS_{}_{}.bin",
        phone.phone_name, phone.otp.imei
    ));
    std::fs::write(&outfile, &out)?;
    result?;

    // drain the byte the phone leaves queued
    let mut leftover = [0u8; 1];
    let _ = stream.link.read_some(&mut leftover, TIMEOUT * 50);

    println!("GDFS saved {}", outfile.display());
    println!("GDFS backup successfully!");
    Ok(outfile)
}

/// Chunk boundaries fall only between variables. The device closes each
/// chunk with one trailing byte; the reader takes the first byte of every
/// variable speculatively and, when it landed on an exhausted chunk,
/// discards it, ACKs for the next chunk header, and reads the real byte
/// after it.
struct ChunkStream<'a> {
    link: &'a mut SerialLink,
    left: usize,
}

impl ChunkStream<'_> {
    fn next_var_byte(&mut self, timeout: std::time::Duration) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.link.wait_exact(&mut byte, timeout)?;
        if self.left == 0 {
            // that was the chunk's trailing byte, not data
            self.link.send_ack()?;
            let mut hdr = [0u8; 6];
            self.link.wait_exact(&mut hdr, TIMEOUT * 50)?;
            let chunk_size = (u16::from_le_bytes([hdr[2], hdr[3]]) as usize) + 1;
            self.left = chunk_size.saturating_sub(hdr.len());
            self.link.wait_exact(&mut byte, TIMEOUT * 100)?;
        }
        self.left = self.left.saturating_sub(1);
        Ok(byte[0])
    }

    /// Within a variable the stream is contiguous.
    fn next_bytes(&mut self, out: &mut [u8], timeout: std::time::Duration) -> Result<()> {
        self.link.wait_exact(out, timeout)?;
        self.left = self.left.saturating_sub(out.len());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub block: u8,
    pub lsb: u8,
    pub msb: u8,
    /// Declared size; `data` holds at most [`MAX_VAR_WRITE`] of it.
    pub declared_len: u32,
    pub data: Vec<u8>,
}

/// Walk a GDFS backup file. Oversized variables are capped for the write
/// but the cursor still advances past the full declared size.
pub fn parse_backup(buf: &[u8]) -> Result<(u32, Vec<BackupEntry>)> {
    if buf.len() < 4 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "truncated GDFS backup",
        )));
    }
    let count = read_u32_le(buf, 0);
    let mut entries = Vec::new();
    let mut pos = 4usize;
    while pos + 7 <= buf.len() {
        let block = buf[pos];
        let lsb = buf[pos + 1];
        let msb = buf[pos + 2];
        let declared_len = read_u32_le(buf, pos + 3);
        pos += 7;

        let real = (declared_len as usize).min(MAX_VAR_WRITE);
        if pos + real > buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "truncated GDFS backup",
            )));
        }
        entries.push(BackupEntry {
            block,
            lsb,
            msb,
            declared_len,
            data: buf[pos..pos + real].to_vec(),
        });
        pos += declared_len as usize;
    }
    Ok((count, entries))
}

pub fn restore_gdfs(link: &mut SerialLink, path: &Path) -> Result<()> {
    println!("Restore GDFS...");
    let buf = std::fs::read(path)?;
    let (declared, entries) = parse_backup(&buf)?;
    println!("Attempting to write {declared} variables...");

    let mut written = 0u32;
    for entry in &entries {
        print!(
            "\rWriting {:04} bytes to block 0x{:02x}, unit 0x{:02X}{:02X}",
            entry.declared_len, entry.block, entry.msb, entry.lsb
        );
        let _ = std::io::stdout().flush();
        if let Err(e) = write_var(link, entry.block, entry.msb, entry.lsb, &entry.data) {
            println!("\nWrote {written} units!");
            println!("GDFS was not fully restored!");
            return Err(e);
        }
        written += 1;
    }
    println!("\n\nWrote {written} variables!");
    println!("GDFS was restored successfully!");
    Ok(())
}

// ---- script runner ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    Write {
        block: u8,
        msb: u8,
        lsb: u8,
        data: Vec<u8>,
    },
    Read {
        block: u8,
        msb: u8,
        lsb: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLine {
    Skip,
    Op(ScriptOp),
    Invalid,
}

/// One line of a GDFS script: `gdfswrite:BBBBMMLL<hex>` or
/// `gdfsread:BBBBMMLL`; `#` and `;` start comments.
pub fn parse_script_line(line: &str) -> ScriptLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return ScriptLine::Skip;
    }

    if let Some(rest) = line.strip_prefix("gdfswrite:") {
        let Some((block, msb, lsb)) = parse_script_addr(rest) else {
            return ScriptLine::Invalid;
        };
        let hex = &rest[8..];
        if hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return ScriptLine::Invalid;
        }
        let mut data = Vec::with_capacity(hex.len() / 2);
        for pair in hex.as_bytes().chunks(2) {
            let Some(text) = std::str::from_utf8(pair).ok() else {
                return ScriptLine::Invalid;
            };
            let Ok(byte) = u8::from_str_radix(text, 16) else {
                return ScriptLine::Invalid;
            };
            data.push(byte);
        }
        return ScriptLine::Op(ScriptOp::Write {
            block,
            msb,
            lsb,
            data,
        });
    }

    if let Some(rest) = line.strip_prefix("gdfsread:") {
        if rest.len() != 8 {
            return ScriptLine::Invalid;
        }
        let Some((block, msb, lsb)) = parse_script_addr(rest) else {
            return ScriptLine::Invalid;
        };
        return ScriptLine::Op(ScriptOp::Read { block, msb, lsb });
    }

    ScriptLine::Invalid
}

fn parse_script_addr(text: &str) -> Option<(u8, u8, u8)> {
    if text.len() < 8 || !text[..8].chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let block = u16::from_str_radix(&text[..4], 16).ok()? as u8;
    let msb = u8::from_str_radix(&text[4..6], 16).ok()?;
    let lsb = u8::from_str_radix(&text[6..8], 16).ok()?;
    Some((block, msb, lsb))
}

/// Run a script against the ChipSelect loader. `gdfsread` results are
/// appended to the transcript as replayable `gdfswrite` lines. Returns
/// `(writes, reads)`.
pub fn run_script(
    link: &mut SerialLink,
    input: &Path,
    transcript: &Path,
) -> Result<(usize, usize)> {
    let text = std::fs::read_to_string(input)?;
    let mut writes = 0;
    let mut reads = 0;

    for (idx, line) in text.lines().enumerate() {
        match parse_script_line(line) {
            ScriptLine::Skip => {}
            ScriptLine::Invalid => {
                warn!("{}:{}: unrecognized script line", input.display(), idx + 1);
            }
            ScriptLine::Op(ScriptOp::Write {
                block,
                msb,
                lsb,
                data,
            }) => {
                write_var(link, block, msb, lsb, &data)?;
                writes += 1;
            }
            ScriptLine::Op(ScriptOp::Read { block, msb, lsb }) => {
                let pkt = cs_read_var(link, block, msb, lsb)?;
                let data = pkt.data();
                if data.is_empty() {
                    warn!("{}:{}: empty read reply", input.display(), idx + 1);
                    continue;
                }
                append_dump_line(transcript, block, msb, lsb, &data[1..])?;
                reads += 1;
            }
        }
    }
    println!("script done: {writes} write(s), {reads} read(s)");
    Ok((writes, reads))
}

/// Append one `gdfswrite:` line for a dumped unit.
pub fn append_dump_line(
    path: &Path,
    block: u8,
    msb: u8,
    lsb: u8,
    data: &[u8],
) -> Result<()> {
    let mut line = format!("gdfswrite:{:04X}{msb:02X}{lsb:02X}", block as u16);
    for byte in data {
        let _ = write!(line, "{byte:02X}");
    }
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// The security units worth keeping a copy of before anything is
/// modified.
const SEC_UNITS: [(u8, u8, u8); 5] = [
    (0x00, 0x00, 0x06), // COPS dynamic 1
    (0x00, 0x00, 0x0E), // COPS dynamic 2
    (0x00, 0x00, 0x13), // COPS static
    (0x00, 0x00, 0x18), // protected customer settings
    (0x00, 0x00, 0xAA), // protected platform settings
];

/// PNX5230 carries one extra unit in block 1.
const SEC_UNITS_PNX: [(u8, u8, u8); 6] = [
    (0x00, 0x00, 0x06),
    (0x00, 0x00, 0x0E),
    (0x00, 0x00, 0x13),
    (0x00, 0x00, 0x18),
    (0x00, 0x00, 0xAA),
    (0x01, 0x08, 0x51),
];

/// Dump the security units as replayable `gdfswrite:` lines, binary
/// dialect.
pub fn dump_sec_units(link: &mut SerialLink, backup_path: &Path) -> Result<()> {
    for &(block, msb, lsb) in &SEC_UNITS {
        let pkt = read_var(link, block, msb, lsb)?;
        if pkt.is_empty() {
            return Err(Error::GdfsServerRejected);
        }
        append_dump_line(backup_path, block, msb, lsb, &pkt.data()[1..])?;
    }
    println!("SECURITY UNITS BACKUP CREATED. {}", backup_path.display());
    Ok(())
}

/// Same dump over the PNX5230 `ICG1` dialect.
pub fn dump_sec_units_pnx(link: &mut SerialLink, backup_path: &Path) -> Result<()> {
    for &(block, msb, lsb) in &SEC_UNITS_PNX {
        let data = pnx_read_var(link, block, msb, lsb)?;
        append_dump_line(backup_path, block, msb, lsb, &data)?;
    }
    println!("SECURITY UNITS BACKUP CREATED. {}", backup_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_map_db2020() {
        assert_eq!(
            var_address(GdfsField::PhoneName, ChipId::Db2020, false),
            Some((0x02, 0xBB, 0x0D))
        );
        assert_eq!(
            var_address(GdfsField::CxcArticle, ChipId::Db2020, false),
            Some((0x02, 0x15, 0x0E))
        );
    }

    #[test]
    fn test_var_map_z1010_moves_block() {
        assert_eq!(
            var_address(GdfsField::PhoneName, ChipId::Db2000, true),
            Some((0x04, 0x8F, 0x0C))
        );
        assert_eq!(
            var_address(GdfsField::PhoneName, ChipId::Db2000, false),
            Some((0x02, 0x8F, 0x0C))
        );
    }

    #[test]
    fn test_var_map_absent_field() {
        assert_eq!(var_address(GdfsField::CxcArticle, ChipId::Db2000, false), None);
    }

    #[test]
    fn test_parse_script_write_line() {
        let line = parse_script_line("gdfswrite:0000000601020304");
        assert_eq!(
            line,
            ScriptLine::Op(ScriptOp::Write {
                block: 0x00,
                msb: 0x00,
                lsb: 0x06,
                data: vec![0x01, 0x02, 0x03, 0x04],
            })
        );
    }

    #[test]
    fn test_parse_script_read_line() {
        let line = parse_script_line("gdfsread:00020DBB");
        assert_eq!(
            line,
            ScriptLine::Op(ScriptOp::Read {
                block: 0x02,
                msb: 0x0D,
                lsb: 0xBB,
            })
        );
    }

    #[test]
    fn test_parse_script_comments_and_garbage() {
        assert_eq!(parse_script_line("# comment"), ScriptLine::Skip);
        assert_eq!(parse_script_line("; other comment"), ScriptLine::Skip);
        assert_eq!(parse_script_line(""), ScriptLine::Skip);
        assert_eq!(parse_script_line("gdfswrite:123"), ScriptLine::Invalid);
        assert_eq!(parse_script_line("bogus"), ScriptLine::Invalid);
        // odd-length data
        assert_eq!(parse_script_line("gdfswrite:00000006012"), ScriptLine::Invalid);
    }

    #[test]
    fn test_zero_length_binary_write_is_three_byte_payload() {
        let cmd = encode_write_var(0x00, 0x00, 0x06, &[]).unwrap();
        // [89][20][len lo][len hi][block][lsb][msb][cksum]
        assert_eq!(&cmd[..7], &[0x89, 0x20, 0x03, 0x00, 0x00, 0x06, 0x00]);
        assert_eq!(cmd.len(), 8);
    }

    #[test]
    fn test_parse_usercode() {
        let mut data = vec![0u8; 0x70];
        data[0x62] = 4;
        data[0x63] = 0x21; // digits 1, 2
        data[0x64] = 0x43; // digits 3, 4
        assert_eq!(parse_usercode(&data), "1234");

        data[0x62] = 0;
        assert_eq!(parse_usercode(&data), "No usercode");
    }

    #[test]
    fn test_parse_simlock() {
        let mut data = vec![0u8; 0x40];
        data[0x34] = 0x13; // digits 3, 1
        data[0x35] = 0x00; // digits 0, 0
        data[0x36] = 0x10; // digits 0, 1
        let lock = parse_simlock(&data).unwrap();
        assert!(lock.locked);
        assert_eq!(lock.mcc, "310");
        assert_eq!(lock.mnc, "001");

        data[0x34] = 0xFF;
        let lock = parse_simlock(&data).unwrap();
        assert!(lock.locked);
        assert_eq!(lock.mcc, "");
    }

    #[test]
    fn test_parse_backup_caps_but_advances() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        // an oversized variable
        buf.push(0x00);
        buf.push(0x06);
        buf.push(0x00);
        buf.extend_from_slice(&(MAX_VAR_WRITE as u32 + 4).to_le_bytes());
        buf.extend(std::iter::repeat(0xEE).take(MAX_VAR_WRITE + 4));
        // a small one after it
        buf.push(0x02);
        buf.push(0x0C);
        buf.push(0x8F);
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0x01, 0x02, 0x03]);

        let (count, entries) = parse_backup(&buf).unwrap();
        assert_eq!(count, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data.len(), MAX_VAR_WRITE);
        assert_eq!(entries[0].declared_len as usize, MAX_VAR_WRITE + 4);
        assert_eq!(entries[1].block, 0x02);
        assert_eq!(entries[1].data, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_backup_gdfs_crosses_chunk_boundary() {
        use crate::serial::mock::MockPort;
        use crate::serial::SerialLink;

        // chunk 1: ACK, preamble (declared size 0x12+1 covers itself,
        // one 9-byte variable and nothing more), the variable, and the
        // chunk's trailing byte
        let mut burst1 = vec![0x06];
        burst1.extend_from_slice(&[0x89, 0x04, 0x12, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        burst1.extend_from_slice(&[0x00, 0x06, 0x00, 0x02, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
        burst1.push(0x5A);

        // chunk 2 streams after our ACK: 6-byte header, the second
        // variable, and the byte left on the phone queue
        let mut burst2 = vec![0x89, 0x04, 0x0F, 0x00, 0x00, 0x00];
        burst2.extend_from_slice(&[0x02, 0xBB, 0x0D, 0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03]);
        burst2.push(0x77);

        let dir = tempfile::tempdir().unwrap();
        let dirs = Dirs {
            backup: dir.path().to_path_buf(),
            ..Dirs::default()
        };
        let port = MockPort::new(vec![burst1, burst2]);
        let mut link = SerialLink::new(Box::new(port));
        let phone = PhoneInfo::default();

        let outfile = backup_gdfs(&mut link, &phone, &dirs).unwrap();
        let written = std::fs::read(&outfile).unwrap();
        // neither chunk's trailing byte reaches the file
        assert_eq!(
            written,
            [
                0x02, 0x00, 0x00, 0x00, // variable count
                0x00, 0x06, 0x00, 0x02, 0x00, 0x00, 0x00, 0xAA, 0xBB,
                0x02, 0xBB, 0x0D, 0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03,
            ]
        );

        // and the result replays through the restore-side parser
        let (count, entries) = parse_backup(&written).unwrap();
        assert_eq!(count, 2);
        assert_eq!(entries[0].data, vec![0xAA, 0xBB]);
        assert_eq!(entries[1].block, 0x02);
        assert_eq!(entries[1].data, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_backup_format_roundtrips_through_dump_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secunits.txt");
        append_dump_line(&path, 0x00, 0x00, 0x06, &[0xDE, 0xAD]).unwrap();
        append_dump_line(&path, 0x01, 0x08, 0x51, &[0x01]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "gdfswrite:00000006DEAD");
        assert_eq!(lines.next().unwrap(), "gdfswrite:0001085101");

        // every emitted line parses back into a write op
        for line in text.lines() {
            assert!(matches!(
                parse_script_line(line),
                ScriptLine::Op(ScriptOp::Write { .. })
            ));
        }
    }
}
