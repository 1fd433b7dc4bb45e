//! Mutable phone state filled in monotonically over the course of a
//! session: chip identity from the bootrom handshake, EROM domain and CID,
//! then flash/OTP data once a loader is running.

use std::fmt;

use num_enum::{FromPrimitive, IntoPrimitive};

/// Baseband chip families spoken by this tool, tagged with the 16-bit id
/// the bootrom reports. DB2012 devices identify on the wire with the
/// DB2010-B id; its tag here is internal only, for image platform
/// classification and display.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
pub enum ChipId {
    Db2000 = 0x7100,
    Db2010a = 0x8000,
    Db2010b = 0x8040,
    Db2012 = 0x3000,
    Db2020 = 0x9900,
    Pnx5230 = 0xD000,
    #[num_enum(catch_all)]
    Unknown(u16),
}

impl ChipId {
    pub fn from_wire(id: u16) -> Self {
        ChipId::from(id)
    }

    pub fn wire_id(self) -> u16 {
        self.into()
    }

    /// Platform bit as used in the BABE header platform bitmap.
    pub fn platform_bit(self) -> u32 {
        match self {
            ChipId::Db2000 => 0x0001_0000,
            ChipId::Db2010a | ChipId::Db2010b => 0x0010_0000,
            ChipId::Db2012 => 0x0030_0000,
            ChipId::Pnx5230 => 0x0100_0000,
            ChipId::Db2020 => 0x1000_0000,
            ChipId::Unknown(_) => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChipId::Db2000 => "DB2000",
            ChipId::Db2010a | ChipId::Db2010b => "DB2010",
            ChipId::Db2012 => "DB2012",
            ChipId::Db2020 => "DB2020",
            ChipId::Pnx5230 => "PNX5230",
            ChipId::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// EROM signing lineage of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Blue,
    Brown,
    Red,
    Black,
}

impl Color {
    pub fn state(self) -> &'static str {
        match self {
            Color::Blue => "FACTORY",
            Color::Brown => "DEVELOPER",
            Color::Red => "RETAIL",
            Color::Black => "BLACK",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Color::Blue => "BLUE",
            Color::Brown => "BROWN",
            Color::Red => "RED",
            Color::Black => "BLACK",
        }
    }
}

/// The greeting banner of an uploaded payload declares what kind of server
/// is now running in the phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderKind {
    ChipSelect,
    ProductId,
    Cert,
    Flash,
    #[default]
    Unknown,
}

/// One-time-programmable identity region.
#[derive(Debug, Clone, Default)]
pub struct Otp {
    pub status: u8,
    pub locked: bool,
    pub cid: u16,
    pub paf: u8,
    pub imei: String,
}

#[derive(Debug, Clone)]
pub struct PhoneInfo {
    pub chip: ChipId,
    pub protocol_major: u8,
    pub protocol_minor: u8,
    pub new_security: bool,
    pub phone_name: String,
    pub fw_version: String,
    pub is_z1010: bool,

    pub erom_color: Option<Color>,
    pub erom_cid: u8,

    pub flash_id: u16,
    pub flash_block_size: u32,

    pub otp: Otp,

    pub baudrate: u32,
    pub loader_kind: LoaderKind,

    pub skip_cmd: bool,
    pub skiperrors: bool,
    pub anycid: bool,
    pub break_rsa: bool,
    pub save_as_babe: bool,
}

impl Default for PhoneInfo {
    fn default() -> Self {
        PhoneInfo {
            chip: ChipId::Unknown(0),
            protocol_major: 0,
            protocol_minor: 0,
            new_security: false,
            phone_name: String::new(),
            fw_version: String::new(),
            is_z1010: false,
            erom_color: None,
            erom_cid: 0,
            flash_id: 0,
            flash_block_size: 0x10000,
            otp: Otp::default(),
            baudrate: 115200,
            loader_kind: LoaderKind::Unknown,
            skip_cmd: false,
            skiperrors: false,
            anycid: false,
            break_rsa: false,
            save_as_babe: false,
        }
    }
}

impl PhoneInfo {
    /// OTP data is written once and never regresses.
    pub fn set_otp(&mut self, otp: Otp) {
        if self.otp.imei.is_empty() {
            self.otp = otp;
        }
    }

    pub fn is_db2010(&self) -> bool {
        matches!(self.chip, ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_from_wire() {
        assert_eq!(ChipId::from_wire(0x9900), ChipId::Db2020);
        assert_eq!(ChipId::from_wire(0x8040), ChipId::Db2010b);
        assert_eq!(ChipId::from_wire(0x1234), ChipId::Unknown(0x1234));
        assert_eq!(ChipId::from_wire(0xD000).name(), "PNX5230");
    }

    #[test]
    fn test_otp_never_regresses() {
        let mut phone = PhoneInfo::default();
        phone.set_otp(Otp {
            imei: "35345600123456".into(),
            ..Otp::default()
        });
        phone.set_otp(Otp {
            imei: "00000000000000".into(),
            ..Otp::default()
        });
        assert_eq!(phone.otp.imei, "35345600123456");
    }
}
