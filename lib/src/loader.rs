//! The payload loader pipeline: uploads each planned payload through the
//! right sub-protocol, classifies the server that greets back, and
//! activates it.

use deku::prelude::*;
use log::{debug, warn};

use crate::babe::{BabeHeader, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::frame::{self, Packet};
use crate::gdfs;
use crate::payload::{self, Dirs, Method, Plan};
use crate::phone::{ChipId, LoaderKind, Otp, PhoneInfo};
use crate::serial::{SerialLink, TIMEOUT};
use crate::util;

/// Classify a loader greeting banner by its marker substrings.
pub fn classify_banner(banner: &str) -> LoaderKind {
    if banner.contains("CS_LOADER")
        || banner.contains("CSLOADER")
        || banner.contains("FILESYSTEMLOADER")
        || banner.contains("FILE_SYSTEM_LOADER")
    {
        LoaderKind::ChipSelect
    } else if banner.contains("PRODUCTION_ID") || banner.contains("PRODUCTIONID") {
        LoaderKind::ProductId
    } else if banner.contains("CERTLOADER") {
        LoaderKind::Cert
    } else if banner.contains("FLASHLOADER")
        || banner.contains("MEM_PATCHER")
        || banner.contains("patched")
    {
        LoaderKind::Flash
    } else {
        LoaderKind::Unknown
    }
}

fn greet(pkt: &Packet, phone: &mut PhoneInfo) -> LoaderKind {
    let banner = String::from_utf8_lossy(pkt.data()).into_owned();
    println!("LDR: {}", banner.trim_end_matches('\0'));

    if banner.contains("SETOOL") {
        println!("Let's say thanks to the_laser =)");
    }
    if banner.contains("den_po") {
        println!("Let's say thanks to den_po =)");
    }

    let kind = classify_banner(&banner);
    phone.loader_kind = kind;
    kind
}

/// A signed payload splits into header / prologue / body the same way for
/// both the bootrom and the CMD 0x3C relay.
fn slice_payload(blob: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    let header = BabeHeader::parse(blob)?;
    let qa_end = HEADER_SIZE + header.prologue_size1 as usize;
    let qd_end = qa_end + header.payload_size1 as usize;
    if qd_end > blob.len() {
        return Err(Error::BadBabe("truncated loader image"));
    }
    Ok((&blob[..HEADER_SIZE], &blob[HEADER_SIZE..qa_end], &blob[qa_end..qd_end]))
}

/// QH00/QA00/QD00 upload straight to the boot ROM, watching the
/// three-byte echo after every stage.
pub fn send_bootrom(link: &mut SerialLink, phone: &mut PhoneInfo, blob: &[u8]) -> Result<()> {
    let (header, prologue, body) = slice_payload(blob)?;
    let skip = phone.skiperrors;

    link.write(b"QH00")?;
    link.wait_echo(b"EsB", TIMEOUT * 3, skip)?;
    link.write(header)?;
    link.wait_echo(b"EhM", TIMEOUT * 3, skip)?;

    link.write(b"QA00")?;
    link.write_chunks(prologue, 0x800)?;
    link.wait_echo(b"EaT", TIMEOUT * 3, skip)?;
    link.wait_echo(b"EbS", TIMEOUT * 3, skip)?;

    link.write(b"QD00")?;
    link.write_chunks(body, 0x800)?;
    link.wait_echo(b"EdQ", TIMEOUT * 3, skip)?;

    if phone.skiperrors {
        // anycid exploit: the ROM leaves a stray byte, then wants "R"
        // nudges before the patched loader starts talking
        phone.anycid = true;
        let mut stray = [0u8; 1];
        link.wait_exact(&mut stray, TIMEOUT * 3)?;

        println!("STARTING BOOTLOADER...");
        link.write(b"R")?;

        match phone.chip {
            ChipId::Db2010b => {
                let mut gap = [0u8; 2];
                link.wait_exact(&mut gap, TIMEOUT * 10)?;
                link.write(b"R")?;
            }
            ChipId::Db2020 => {
                let mut gap = [0u8; 3];
                link.wait_exact(&mut gap, TIMEOUT * 10)?;
            }
            _ => {}
        }
    }

    let mut hello = [0u8; 256];
    let n = link.wait_packet(&mut hello, TIMEOUT * 3)?;
    let pkt = Packet::decode(&hello[..n])?;
    greet(&pkt, phone);
    Ok(())
}

fn send_signed_part(link: &mut SerialLink, data: &[u8]) -> Result<()> {
    link.send_ack()?;
    let mut sent = 0;
    loop {
        let chunk = (data.len() - sent).min(0x7FF);
        let more = sent + chunk < data.len();

        let mut buf = Vec::with_capacity(chunk + 6);
        buf.push(frame::HDR);
        buf.push(0x3C);
        buf.extend_from_slice(&((chunk + 1) as u16).to_le_bytes());
        buf.push(u8::from(more));
        buf.extend_from_slice(&data[sent..sent + chunk]);
        let sum = frame::checksum(&[&buf]);
        buf.push(sum);

        link.write(&buf)?;
        if more {
            link.wait_ack(TIMEOUT)?;
        }
        sent += chunk;
        if !more {
            return Ok(());
        }
    }
}

fn expect_cmd3d(link: &mut SerialLink, timeout: std::time::Duration, stage: &'static str) -> Result<()> {
    let mut resp = [0u8; 7];
    let n = link.wait_packet(&mut resp, timeout)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.cmd != 0x3D || pkt.data().first() != Some(&0) {
        warn!("bad CMD3C answer {:02X?}", pkt.data().first());
        return Err(Error::LoaderRejected { stage });
    }
    Ok(())
}

/// Relay a signed payload through the running loader with CMD 0x3C
/// frames; each of the three parts must be confirmed by CMD 0x3D.
pub fn send_signed(link: &mut SerialLink, phone: &mut PhoneInfo, blob: &[u8]) -> Result<()> {
    let (header, prologue, body) = slice_payload(blob)?;

    send_signed_part(link, header)?;
    expect_cmd3d(link, TIMEOUT * 5, "signed header")?;

    send_signed_part(link, prologue)?;
    expect_cmd3d(link, TIMEOUT * 5, "signed prologue")?;

    send_signed_part(link, body)?;
    expect_cmd3d(link, TIMEOUT * 20, "signed body")?;

    // one ACK starts the uploaded loader
    link.send_ack()?;

    let mut hello = [0u8; 256];
    let n = link.wait_packet(&mut hello, TIMEOUT * 50)?;
    let pkt = Packet::decode(&hello[..n])?;
    greet(&pkt, phone);
    Ok(())
}

/// CMD 0x3E rabbit-hole break. The device either greets back or answers
/// the literal `FC FF` ("break accepted, no greeting").
pub fn send_break(link: &mut SerialLink, phone: &mut PhoneInfo, blob: &[u8]) -> Result<()> {
    let framed = frame::encode_binary(0x3E, blob);
    link.send_ack_then(&framed)?;
    link.wait_ack(TIMEOUT)?;

    let mut hello = [0u8; 128];
    let n = link.wait_packet(&mut hello, TIMEOUT * 5)?;
    if n >= 2 && hello[0] == 0xFC && hello[1] == 0xFF {
        println!("Break CMD3E");
        return Ok(());
    }
    let pkt = Packet::decode(&hello[..n])?;
    greet(&pkt, phone);
    Ok(())
}

/// Post-break upload: `dest_addr`, `size`, body. No framing at all.
pub fn send_unsigned(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    blob: &[u8],
    dest_addr: u32,
) -> Result<()> {
    link.write(&dest_addr.to_le_bytes())?;
    link.write(&(blob.len() as u32).to_le_bytes())?;
    link.write_chunks(blob, 0x400)?;

    let mut hello = [0u8; 128];
    let n = link.wait_packet(&mut hello, TIMEOUT * 5)?;
    let pkt = Packet::decode(&hello[..n])?;
    greet(&pkt, phone);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, DekuRead)]
#[deku(endian = "little")]
struct OtpReply {
    status: u8,
    locked: u8,
    cid: u16,
    paf: u8,
    imei: [u8; 14],
}

fn get_flash_data(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    let cmd = frame::encode_binary(0x0D, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 32];
    let n = link.wait_packet(&mut resp, TIMEOUT * 3)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.cmd != 0x0A || pkt.len() != 2 {
        return Err(Error::UnexpectedFrame {
            got: pkt.cmd,
            expected: 0x0A,
        });
    }
    phone.flash_id = u16::from_be_bytes([pkt.data()[0], pkt.data()[1]]);
    println!(
        "FLASH ID: 0x{:x} ({})",
        phone.flash_id,
        util::flash_vendor_name(phone.flash_id)
    );
    Ok(())
}

fn get_otp_data(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    let cmd = frame::encode_binary(0x24, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 64];
    let n = link.wait_packet(&mut resp, TIMEOUT * 3)?;
    let pkt = Packet::decode(&resp[..n])?;
    let ((_, _), otp) = OtpReply::from_bytes((pkt.data(), 0))
        .map_err(|_| Error::FrameShort(pkt.len()))?;

    let imei = String::from_utf8_lossy(&otp.imei).into_owned();
    if imei.starts_with("35345600") {
        phone.is_z1010 = true;
    }
    phone.set_otp(Otp {
        status: otp.status,
        locked: otp.locked != 0,
        cid: otp.cid,
        paf: otp.paf,
        imei,
    });
    println!(
        "OTP: LOCKED:{} CID:{} PAF:{} IMEI:{}",
        u8::from(phone.otp.locked),
        phone.otp.cid,
        phone.otp.paf,
        phone.otp.imei
    );
    Ok(())
}

fn get_erom_data(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    let cmd = frame::encode_binary(0x57, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 32];
    let n = link.wait_packet(&mut resp, TIMEOUT * 3)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.len() < 10 {
        return Err(Error::FrameShort(pkt.len()));
    }
    phone.erom_color = Some(
        crate::connection::domain_from_bitmap(pkt.data()[1])
            .unwrap_or(crate::phone::Color::Black),
    );
    phone.erom_cid = pkt.data()[9];
    if let Some(color) = phone.erom_color {
        println!("ACTIVE CID:{:02} COLOR:{}", phone.erom_cid, color.name());
    }
    Ok(())
}

/// Bring the freshly greeted server on line. A ChipSelect loader needs
/// its two activation frames and a probe read of the model name; anything
/// else is profiled through the binary queries.
pub fn activate_payload(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    if phone.loader_kind == LoaderKind::ChipSelect {
        print!("Activating CHIPSELECT loader... ");
        let cmd = frame::encode_cs(0x01, 0x09, &[]);
        link.send_ack_then(&cmd)?;
        let mut resp = [0u8; 8];
        let n = link.wait_packet(&mut resp, TIMEOUT * 20)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.data().get(1) != Some(&0) {
            println!("failed");
            return Err(Error::LoaderRejected {
                stage: "chipselect activate",
            });
        }
        println!("activated");

        print!("Activating GDFS server... ");
        let cmd = frame::encode_cs(0x04, 0x05, &[]);
        link.send_ack_then(&cmd)?;
        let n = link.wait_packet(&mut resp, TIMEOUT * 500)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.data().get(1) != Some(&0) {
            println!("failed");
            return Err(Error::GdfsServerRejected);
        }
        println!("activated");

        print!("Check loader... ");
        let (block, msb, lsb) =
            gdfs::var_address(gdfs::GdfsField::PhoneName, phone.chip, phone.is_z1010)
                .ok_or(Error::UnsupportedChip(phone.chip.wire_id()))?;
        let cmd = frame::encode_cs(0x04, 0x01, &[block, lsb, msb]);
        link.send_ack_then(&cmd)?;
        let mut resp = [0u8; 128];
        let n = link.wait_packet(&mut resp, TIMEOUT * 10)?;
        let pkt = Packet::decode(&resp[..n])?;
        if pkt.cmd != 0x04 {
            println!("locked");
            return Err(Error::GdfsServerRejected);
        }
        if pkt.len() > 2 {
            phone.phone_name = util::decode_wide(&pkt.data()[2..]);
        }
        println!("unlocked:{}", phone.phone_name);
        return Ok(());
    }

    get_flash_data(link, phone)?;
    get_otp_data(link, phone)?;
    if !phone.skip_cmd {
        get_erom_data(link, phone)?;
    }
    Ok(())
}

/// Execute an upload plan step by step. Any failure is fatal; there are
/// no alternate payloads.
pub fn run_plan(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    dirs: &Dirs,
    plan: Plan,
) -> Result<()> {
    if plan.skip_cmd {
        phone.skip_cmd = true;
    }
    if plan.skiperrors {
        phone.skiperrors = true;
    }

    for step in &plan.steps {
        if step.set_skip_cmd {
            phone.skip_cmd = true;
        }
        let key = step.key.resolve(phone.is_z1010);
        let blob = payload::load_blob(&dirs.loader, key)?;
        debug!("uploading {key} ({} bytes) via {:?}", blob.len(), step.method);
        match step.method {
            Method::Bootrom => {
                send_bootrom(link, phone, &blob)?;
                activate_payload(link, phone)?;
            }
            Method::Signed => {
                send_signed(link, phone, &blob)?;
                activate_payload(link, phone)?;
            }
            Method::Break => send_break(link, phone, &blob)?,
            Method::Unsigned(addr) => send_unsigned(link, phone, &blob, addr)?,
        }
    }
    Ok(())
}

pub fn enter_flash_mode(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    let plan = payload::flash_mode_plan(phone.chip, phone.erom_cid)?;
    run_plan(link, phone, dirs, plan)
}

pub fn send_csloader(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    let plan = payload::csloader_plan(phone.chip, phone.erom_cid, phone.erom_color)?;
    run_plan(link, phone, dirs, plan)
}

pub fn send_oflash_loader(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    let plan = payload::oflash_plan(phone.chip, phone.erom_cid, phone.erom_color)?;
    run_plan(link, phone, dirs, plan)
}

pub fn send_bflash_loader(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    let plan = payload::bflash_plan(phone.chip, phone.erom_cid, phone.erom_color, phone.anycid)?;
    run_plan(link, phone, dirs, plan)?;
    if phone.skiperrors {
        println!("Security disabled =)");
    }
    Ok(())
}

/// Binary-dialect GDFS activation (CMD 0x22), used with non-ChipSelect
/// loaders.
pub fn activate_gdfs(link: &mut SerialLink) -> Result<()> {
    print!("Activating GDFS.. ");
    let cmd = frame::encode_binary(0x22, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 8];
    let n = link.wait_packet(&mut resp, TIMEOUT * 5)?;
    let pkt = Packet::decode(&resp[..n])?;
    if pkt.data().first() != Some(&0) {
        println!("failed");
        return Err(Error::GdfsServerRejected);
    }
    println!("activated");
    Ok(())
}

pub fn shutdown(link: &mut SerialLink) -> Result<()> {
    println!("Shutdown phone");
    let cmd = frame::encode_binary(0x14, &[]);
    link.send_ack_then(&cmd)?;

    let mut resp = [0u8; 2];
    link.wait_packet(&mut resp, TIMEOUT * 10)?;
    println!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::MockPort;

    #[test]
    fn test_classify_banner() {
        assert_eq!(classify_banner("DB2020_CS_LOADER_R3A009"), LoaderKind::ChipSelect);
        assert_eq!(classify_banner("FILE_SYSTEM_LOADER R2B"), LoaderKind::ChipSelect);
        assert_eq!(classify_banner("PRODUCTION_ID LOADER"), LoaderKind::ProductId);
        assert_eq!(classify_banner("DB2000 CERTLOADER R3L"), LoaderKind::Cert);
        assert_eq!(classify_banner("FLASHLOADER R2A005"), LoaderKind::Flash);
        assert_eq!(classify_banner("MEM_PATCHER by SETOOL"), LoaderKind::Flash);
        assert_eq!(classify_banner("patched by den_po"), LoaderKind::Flash);
        assert_eq!(classify_banner("whatever"), LoaderKind::Unknown);
    }

    #[test]
    fn test_send_break_accepts_fcff() {
        // the break ACK and the FC FF arrive as one burst
        let port = MockPort::new(vec![vec![crate::serial::ACK, 0xFC, 0xFF]]);
        let mut link = SerialLink::new(Box::new(port));
        let mut phone = PhoneInfo::default();
        send_break(&mut link, &mut phone, &[0x01, 0x02]).unwrap();
    }

    #[test]
    fn test_send_break_classifies_greeting() {
        let mut burst = vec![crate::serial::ACK];
        burst.extend(frame::encode_binary(0x09, b"DB2010 CERTLOADER R2E"));
        let port = MockPort::new(vec![burst]);
        let mut link = SerialLink::new(Box::new(port));
        let mut phone = PhoneInfo::default();
        send_break(&mut link, &mut phone, &[0x01]).unwrap();
        assert_eq!(phone.loader_kind, LoaderKind::Cert);
    }

    #[test]
    fn test_send_signed_part_framing() {
        let (port, log) = MockPort::with_shared_log(Vec::new());
        let mut link = SerialLink::new(Box::new(port));
        send_signed_part(&mut link, &[0xAA, 0xBB]).unwrap();

        let written = log.lock().unwrap();
        // leading ACK, then one frame: length counts the continuation byte
        assert_eq!(written[0], crate::serial::ACK);
        assert_eq!(&written[1..8], &[0x89, 0x3C, 0x03, 0x00, 0x00, 0xAA, 0xBB]);
        let sum = frame::checksum(&[&written[1..8]]);
        assert_eq!(written[8], sum);
    }

    #[test]
    fn test_unsigned_upload_wire_shape() {
        let greeting = frame::encode_binary(0x09, b"patched loader");
        let port = MockPort::new(vec![greeting]);
        let mut link = SerialLink::new(Box::new(port));
        let mut phone = PhoneInfo::default();
        send_unsigned(&mut link, &mut phone, &[0xDE, 0xAD], 0x4C000000).unwrap();
        assert_eq!(phone.loader_kind, LoaderKind::Flash);
    }
}
