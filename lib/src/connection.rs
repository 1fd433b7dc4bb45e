//! Bootrom handshake: power pulse at 9600 baud, the 'Z' greeting, the `?`
//! identity query, the `IC`/`ICO` EROM probes, then the speed switch.

use std::io::Write as _;
use std::time::{Duration, Instant};

use log::error;

use crate::error::{Error, Result};
use crate::phone::{ChipId, Color, Otp, PhoneInfo};
use crate::serial::{SerialLink, TIMEOUT};

/// The phone announces itself with a single 'Z' within this window.
pub const Z_WAIT: Duration = Duration::from_secs(30);

pub fn establish(link: &mut SerialLink, phone: &mut PhoneInfo, requested_baud: u32) -> Result<()> {
    link.power_pulse()?;
    wait_for_z(link, Z_WAIT)?;
    identify(link, phone)?;
    erom_info(link, phone)?;
    set_speed(link, phone, requested_baud)?;
    Ok(())
}

pub fn wait_for_z(link: &mut SerialLink, deadline: Duration) -> Result<()> {
    println!("Powering phone");
    println!("Waiting for reply ({}s timeout):", deadline.as_secs());

    let start = Instant::now();
    let mut last_print = u64::MAX;
    loop {
        let mut c = [0u8; 1];
        if link.read_some(&mut c, TIMEOUT)? > 0 && c[0] == b'Z' {
            println!("\nConnected\n");
            println!("Detected Sony Ericsson");
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed > deadline {
            println!("\nTimeout waiting for phone reply");
            return Err(Error::Timeout);
        }
        let remaining = (deadline - elapsed).as_secs();
        if remaining != last_print {
            print!("\r{remaining:2} seconds remaining...");
            let _ = std::io::stdout().flush();
            last_print = remaining;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Identity reply: `[chipH, chipL, protoMajor, protoMinor, newSec, ...]`.
/// A 0xFF minor means 0.
pub fn parse_identity(resp: &[u8]) -> Result<(ChipId, u8, u8, bool)> {
    if resp.len() < 5 {
        return Err(Error::FrameShort(resp.len()));
    }
    let chip = ChipId::from_wire(u16::from_be_bytes([resp[0], resp[1]]));
    let major = resp[2];
    let minor = if resp[3] == 0xFF { 0 } else { resp[3] };
    Ok((chip, major, minor, resp[4] == 0x01))
}

fn identify(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    link.write(b"?")?;

    let mut resp = [0u8; 8];
    let n = link.wait_packet(&mut resp, TIMEOUT)?;
    let (chip, major, minor, new_sec) = parse_identity(&resp[..n])?;
    phone.chip = chip;
    phone.protocol_major = major;
    phone.protocol_minor = minor;
    phone.new_security = new_sec;

    println!(
        "Chip ID: {:04X}{}, Platform: {}",
        chip.wire_id(),
        if new_sec { " [RESPIN]" } else { "" },
        chip
    );
    println!("EMP Protocol: {major:02}.{minor:02}");

    if (major, minor) != (3, 1) {
        error!("EMP protocol {major:02}.{minor:02} is not supported");
        return Err(Error::UnsupportedProtocol(major, minor));
    }
    Ok(())
}

/// `IC30` reports the domain as a bitmap; the first set bit wins.
pub fn domain_from_bitmap(bits: u8) -> Option<Color> {
    if bits & 1 != 0 {
        Some(Color::Blue)
    } else if bits & 2 != 0 {
        Some(Color::Brown)
    } else if bits & 4 != 0 {
        Some(Color::Red)
    } else if bits & 8 != 0 {
        Some(Color::Black)
    } else {
        None
    }
}

fn erom_info(link: &mut SerialLink, phone: &mut PhoneInfo) -> Result<()> {
    // DB2020 and the DB1000 family answer these from the loader instead
    if matches!(
        phone.chip,
        ChipId::Db2020 | ChipId::Unknown(0x5B07) | ChipId::Unknown(0x5B08)
    ) {
        return Ok(());
    }

    let mut resp = [0u8; 128];
    if phone.chip == ChipId::Pnx5230 {
        link.write(b"ICO0")?;
        let n = link.wait_packet(&mut resp, TIMEOUT)?;
        if n < 21 {
            return Err(Error::FrameShort(n));
        }
        phone.set_otp(Otp {
            status: resp[2],
            locked: resp[3] != 0,
            cid: u16::from_le_bytes([resp[4], resp[5]]),
            paf: resp[6],
            imei: String::from_utf8_lossy(&resp[7..21]).into_owned(),
        });
    } else {
        link.write(b"IC10")?;
        let n = link.wait_packet(&mut resp, TIMEOUT)?;
        if n > 2 {
            let cert = &resp[2..n];
            let end = cert.iter().position(|&b| b == 0).unwrap_or(cert.len());
            println!("CERT: {}", String::from_utf8_lossy(&cert[..end]));
        }
    }

    link.write(b"IC30")?;
    let n = link.wait_packet(&mut resp, TIMEOUT)?;
    if n < 3 {
        return Err(Error::FrameShort(n));
    }
    match domain_from_bitmap(resp[2]) {
        Some(color) => phone.erom_color = Some(color),
        None => {
            // a PNX5230 with OTP identity already in hand may proceed
            if !(phone.chip == ChipId::Pnx5230 && !phone.otp.imei.is_empty()) {
                error!("Unknown domain =(");
                return Err(Error::UnknownDomain);
            }
        }
    }

    link.write(b"IC40")?;
    let n = link.wait_packet(&mut resp, TIMEOUT)?;
    if n < 6 {
        return Err(Error::FrameShort(n));
    }
    phone.erom_cid = crate::util::read_u32_le(&resp, 2) as u8;

    if let Some(color) = phone.erom_color {
        println!("PHONE DOMAIN: {}", color.state());
    }
    println!("PHONE CID: {:02}\n", phone.erom_cid);

    if phone.chip == ChipId::Pnx5230 {
        println!(
            "OTP: LOCKED:{} CID:{} PAF:{} IMEI:{}",
            u8::from(phone.otp.locked),
            phone.otp.cid,
            phone.otp.paf,
            phone.otp.imei
        );
    }
    Ok(())
}

/// Map a baudrate to the bootrom speed command.
pub fn speed_command(baud: u32) -> Option<&'static str> {
    match baud {
        9600 => Some("S0"),
        19200 => Some("S1"),
        38400 => Some("S2"),
        57600 => Some("S3"),
        115200 => Some("S4"),
        230400 => Some("S5"),
        460800 => Some("S6"),
        921600 => Some("S7"),
        _ => None,
    }
}

fn set_speed(link: &mut SerialLink, phone: &mut PhoneInfo, requested: u32) -> Result<()> {
    let mut baud = requested;
    if phone.chip == ChipId::Db2000 && baud > 460800 {
        println!("DB2000 detected, decrease baudrate.");
        baud = 460800;
    }
    if baud == 0 {
        println!("Invalid baudrate, falling back to default.");
        baud = 115200;
    }

    let (cmd, baud) = match speed_command(baud) {
        Some(cmd) => (cmd, baud),
        None => {
            println!("Unknown baudrate {baud}, using default.");
            ("S4", 115200)
        }
    };
    link.write(cmd.as_bytes())?;
    println!("SPEED: {baud}\n");
    link.set_baudrate(baud)?;
    phone.baudrate = baud;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::MockPort;

    #[test]
    fn test_parse_identity() {
        let (chip, major, minor, respin) =
            parse_identity(&[0x99, 0x00, 0x03, 0x01, 0x00, 0, 0, 0]).unwrap();
        assert_eq!(chip, ChipId::Db2020);
        assert_eq!((major, minor), (3, 1));
        assert!(!respin);

        let (_, _, minor, _) = parse_identity(&[0x71, 0x00, 0x03, 0xFF, 0x01]).unwrap();
        assert_eq!(minor, 0);
    }

    #[test]
    fn test_domain_bitmap() {
        assert_eq!(domain_from_bitmap(1), Some(Color::Blue));
        assert_eq!(domain_from_bitmap(2), Some(Color::Brown));
        assert_eq!(domain_from_bitmap(4), Some(Color::Red));
        assert_eq!(domain_from_bitmap(8), Some(Color::Black));
        // first set bit wins
        assert_eq!(domain_from_bitmap(6), Some(Color::Brown));
        assert_eq!(domain_from_bitmap(0), None);
    }

    #[test]
    fn test_speed_table() {
        assert_eq!(speed_command(115200), Some("S4"));
        assert_eq!(speed_command(921600), Some("S7"));
        assert_eq!(speed_command(14400), None);
    }

    #[test]
    fn test_handshake_db2010_red_cid49() {
        let port = MockPort::new(vec![
            vec![b'Z'],
            vec![0x80, 0x40, 0x03, 0x01, 0x00, 0, 0, 0],
            b"\x49\x43CERT_NAME\0".to_vec(),
            vec![0x49, 0x43, 0x04, 0, 0, 0, 0, 0],
            vec![0x49, 0x43, 49, 0, 0, 0],
        ]);
        let mut link = SerialLink::new(Box::new(port));
        let mut phone = PhoneInfo::default();
        establish(&mut link, &mut phone, 115200).unwrap();
        assert_eq!(phone.chip, ChipId::Db2010b);
        assert_eq!(phone.erom_color, Some(Color::Red));
        assert_eq!(phone.erom_cid, 49);
        assert_eq!(phone.baudrate, 115200);
    }

    #[test]
    fn test_handshake_times_out_without_z() {
        let mut link = SerialLink::new(Box::new(MockPort::silent()));
        assert!(matches!(
            wait_for_z(&mut link, Duration::from_millis(120)),
            Err(Error::Timeout)
        ));
    }
}
