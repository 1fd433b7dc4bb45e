//! The payload blob store and the per-chip upload plans.
//!
//! Payload blobs (signed loaders, breaks, patched productions) live under
//! the loader directory and are addressed by stable string keys. Which
//! blobs go up, in what order and through which sub-protocol is a pure
//! function of `(chip, cid, color, anycid)`, kept here as declarative
//! plans so the coverage stays auditable.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::phone::{ChipId, Color};

pub type Key = &'static str;

// cert loaders
pub const DB2000_CERT_RED_CID00_R3L: Key = "db2000_cid00_cert_r3l.bin";
pub const DB2010_CERT_RED_CID01_R2E: Key = "db2010_cid00_cert_r2e.bin";

// rabbit-hole breaks
pub const DB2000_BREAK: Key = "2000_3e_setool";
pub const DB2000_BREAK_R1F: Key = "2000_3e_r1f_r3l";
pub const DB2010_BREAK: Key = "2010_3e_setool";
pub const DB2010_BREAK_R2E: Key = "2010_3e_r2f_r2e";

// file system loaders
pub const DB2000_VIOLA_FS_LOADER_R1E: Key = "db2000_SEMC_VIOLA_FILE_SYSTEM_LOADER_R1E.bin";
pub const DB2000_SEMC_FS_LOADER_R2B: Key = "db2000_SEMC_FILE_SYSTEM_LOADER_R2B.bin";
pub const DB2020_FSLOADER_P5G_SETOOL: Key = "DB2020_FSLOADER_P5G.bin";

// chip select loaders
pub const DB2000_CSLOADER_RED_CID37_P4L: Key = "db2000_cid37red_cs_p4l.bin";
pub const DB2000_CSLOADER_RED_CID49_P4L: Key = "db2000_cid49red_cs_p4l.bin";
pub const DB2000_CSLOADER_R4B_SETOOL: Key = "2000_csold_R4B_setool";
pub const DB2010_CSLOADER_R2C_DEN_PO: Key = "2010_cs_R2C";
pub const DB2010_CSLOADER_BRN_CID49_V26: Key = "db2010_cid49brown_cs_v26.bin";
pub const DB2010_CSLOADER_RED_CID49_R3A010: Key = "db2010_cid49red_cs_r3a010.bin";
pub const DB2012_CSLOADER_RED_CID50_R3B009: Key = "db2012_cid50red_cs_r3b009.bin";
pub const DB2012_CSLOADER_RED_CID51_R3B009: Key = "db2012_cid51red_cs_r3b009.bin";
pub const DB2012_CSLOADER_RED_CID52_R3B009: Key = "db2012_cid52red_cs_r3b009.bin";
pub const DB2012_CSLOADER_RED_CID53_R3B014: Key = "db2012_cid53red_cs_r3b014.bin";
pub const DB2020_CSLOADER_RED_CID49_R3A009: Key = "db2020_cid49red_cs_r3a009.bin";
pub const DB2020_CSLOADER_RED_CID51_R3A009: Key = "db2020_cid51red_cs_r3a009.bin";
pub const DB2020_CSLOADER_RED_CID52_R3A009: Key = "db2020_cid52red_cs_r3a009.bin";
pub const DB2020_CSLOADER_RED_CID53_R3A013: Key = "db2020_cid53red_cs_r3a013.bin";
pub const PNX5230_CSLOADER_RED_CID51_R3A015: Key = "PNX5230_cid51red_cs_r3a015.bin";
pub const PNX5230_CSLOADER_RED_CID52_R3A015: Key = "PNX5230_cid52red_cs_r3a015.bin";
pub const PNX5230_CSLOADER_RED_CID53_R3A016: Key = "pnx5230_cid53red_cs_r3a016.bin";

// flash loaders
pub const DB2000_FLLOADER_RED_CID37_R2B: Key = "db2000_cid37red_flash_r2b.bin";
pub const DB2000_FLLOADER_RED_CID49_R2B: Key = "db2000_cid49red_flash_r2b.bin";
pub const DB2000_FLLOADER_R2B_DEN_PO: Key = "2000_f_r2b";
pub const DB2010_FLLOADER_RED_CID49_R2A007: Key = "db2010_cid49red_flash_r2a007.bin";
pub const DB2010_FLLOADER_R2B_DEN_PO: Key = "2010_f_r2b";
pub const DB2010_FLLOADER_P5G_DEN_PO: Key = "2010_f_p5g";
pub const DB2012_FLLOADER_RED_CID50_R1A002: Key = "db2012_cid50red_flash_r1a002.bin";
pub const DB2012_FLLOADER_RED_CID51_R2B012: Key = "db2012_cid51red_flash_r2b012.bin";
pub const DB2012_FLLOADER_RED_CID52_R2B012: Key = "db2012_cid52red_flash_r2b012.bin";
pub const DB2012_FLLOADER_RED_CID53_R2B017: Key = "db2012_cid53red_flash_r2b017.bin";
pub const DB2020_FLLOADER_RED_CID49_R2A005: Key = "db2020_cid49red_flash_r2a005.bin";
pub const DB2020_FLLOADER_RED_CID51_R2A005: Key = "db2020_cid51red_flash_r2a005.bin";
pub const DB2020_FLLOADER_RED_CID52_R2A005: Key = "db2020_cid52red_flash_r2a005.bin";
pub const DB2020_FLLOADER_RED_CID53_R2A015: Key = "db2020_cid53red_flash_r2a015.bin";
pub const DB2020_FLLOADER_R2A005_DEN_PO: Key = "2020_f_R2A005";
pub const PNX5230_FLLOADER_RED_CID51_R2A016: Key = "PNX5230_cid51red_flash_r2a016.bin";
pub const PNX5230_FLLOADER_RED_CID52_R2A019: Key = "PNX5230_cid52red_flash_r2a019.bin";
pub const PNX5230_FLLOADER_RED_CID53_R2A022: Key = "pnx5230_cid53red_flash_r2a022.bin";

// production id loaders and productions
pub const DB2000_PILOADER_RED_CID00_R1F: Key = "db2000_cid00_prodid_r1f.bin";
pub const DB2000_PILOADER_RED_CID00_R2B: Key = "db2000_cid00_prodid_r2b.bin";
pub const DB2000_PILOADER_RED_CID00_R3A: Key = "db2000_cid00_prodid_r3a.bin";
pub const DB2000_PILOADER_RED_CID03_P3B: Key = "db2000_cid03_prodid_p3b.bin";
pub const DB2000_PRODUCTION_R2Z: Key = "db2000_prod_r2z.bin";
pub const DB2000_VIOLA_PRODUCTION_R2Z: Key = "db2000_viola_prod_r2z.bin";
pub const DB2010_PILOADER_RED_CID00_R2F: Key = "db2010_cid00_prodid_r2f.bin";
pub const DB2010_PILOADER_RED_CID00_R2AB: Key = "db2010_cid00_prodid_r2ab.bin";
pub const DB2010_PILOADER_RED_CID00_P3L: Key = "db2010_cid00_prodid_p3l.bin";
pub const DB2010_PILOADER_RED_CID00_P4D: Key = "db2010_cid00_prodid_p4d.bin";
pub const DB2010_PRODUCTION_R2AB: Key = "DB2010_PRODUCTION_R2AB.bin";
pub const DB2010_RESPIN_ID_LOADER_SETOOL2: Key = "DB2010_RESPIN_ID_LOADER_SETOOL2.bin";
pub const DB2010_RESPIN_PRODLOADER_SETOOL2: Key = "DB2010_RESPIN_PRODLOADER_SETOOL2.bin";
pub const DB2010_PILOADER_BROWN_CID49_R1A002: Key = "db2010_cid49brown_prodid_r1a002.bin";
pub const DB2012_PILOADER_BROWN_CID51_R1A002: Key = "db2012_cid51brown_prodid_r1a002.bin";
pub const DB2020_PILOADER_RED_CID01_P3M: Key = "db2020_cid01_prodid_p3m.bin";
pub const DB2020_PILOADER_BROWN_CID49_SETOOL: Key = "db2020_cid49brown_prodloader_setool2.bin";
pub const DB2020_PRELOADER_FOR_SETOOL2: Key = "DB2020_PRELOADER_FOR_SETOOL2.bin";
pub const DB2020_LOADER_FOR_SETOOL2: Key = "DB2020_LOADER_FOR_SETOOL2.bin";
pub const PNX5230_PROLOGUE: Key = "pnx5230_prologue";
pub const PNX5230_PRODUCTION: Key = "PNX5230_PRODUCTION";

/// Unsigned productions land at fixed RAM addresses.
pub const DB2010_PRODUCTION_LOAD_ADDR: u32 = 0x4C00_0000;

/// Filesystem layout: payload blobs, restore images, backup outputs.
#[derive(Debug, Clone)]
pub struct Dirs {
    pub loader: PathBuf,
    pub rest: PathBuf,
    pub backup: PathBuf,
}

impl Default for Dirs {
    fn default() -> Self {
        Dirs {
            loader: PathBuf::from("./loader"),
            rest: PathBuf::from("./rest"),
            backup: PathBuf::from("./backup"),
        }
    }
}

pub fn load_blob(dir: &Path, key: &str) -> Result<Vec<u8>> {
    let path = dir.join(key);
    std::fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::PayloadMissing { path }
        } else {
            Error::Io(e)
        }
    })
}

/// How one payload goes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// QH00/QA00/QD00 ASCII protocol straight to the boot ROM.
    Bootrom,
    /// CMD 0x3C relay through an already-running signed loader.
    Signed,
    /// CMD 0x3E rabbit-hole break.
    Break,
    /// Bare `(addr, size, body)` upload, only after a break.
    Unsigned(u32),
}

/// Payload selection; the Z1010 split can only be resolved once the OTP
/// IMEI has been read, which happens mid-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKey {
    Fixed(Key),
    Z1010 { viola: Key, semc: Key },
}

impl StepKey {
    pub fn resolve(self, is_z1010: bool) -> Key {
        match self {
            StepKey::Fixed(key) => key,
            StepKey::Z1010 { viola, semc } => {
                if is_z1010 {
                    viola
                } else {
                    semc
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub key: StepKey,
    pub method: Method,
    /// Stop issuing the EROM probe from this step on.
    pub set_skip_cmd: bool,
}

fn step(key: Key, method: Method) -> Step {
    Step {
        key: StepKey::Fixed(key),
        method,
        set_skip_cmd: false,
    }
}

fn z1010_step(viola: Key, semc: Key, method: Method) -> Step {
    Step {
        key: StepKey::Z1010 { viola, semc },
        method,
        set_skip_cmd: false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub skip_cmd: bool,
    pub skiperrors: bool,
    pub steps: Vec<Step>,
}

impl Plan {
    fn new(steps: Vec<Step>) -> Plan {
        Plan {
            skip_cmd: false,
            skiperrors: false,
            steps,
        }
    }

    fn quiet(steps: Vec<Step>) -> Plan {
        Plan {
            skip_cmd: true,
            skiperrors: false,
            steps,
        }
    }

    /// The anycid exploit path: bootrom echo mismatches are tolerated and
    /// EROM probes skipped.
    fn exploit(steps: Vec<Step>) -> Plan {
        Plan {
            skip_cmd: true,
            skiperrors: true,
            steps,
        }
    }
}

/// The DB2000 CID 29 break chain ends in an unsigned production upload at
/// address 0; Z1010 units take the Viola build.
fn db2000_cid29_break() -> Vec<Step> {
    vec![
        step(DB2000_CERT_RED_CID00_R3L, Method::Bootrom),
        step(DB2000_BREAK, Method::Break),
        z1010_step(
            DB2000_VIOLA_PRODUCTION_R2Z,
            DB2000_PRODUCTION_R2Z,
            Method::Unsigned(0),
        ),
    ]
}

fn db2010_cid29_break() -> Vec<Step> {
    vec![
        step(DB2010_CERT_RED_CID01_R2E, Method::Bootrom),
        step(DB2010_BREAK, Method::Break),
        step(
            DB2010_PRODUCTION_R2AB,
            Method::Unsigned(DB2010_PRODUCTION_LOAD_ADDR),
        ),
    ]
}

/// CID 36-class rabbit hole: a cert loader relayed through the running
/// prodid loader, then the CMD 0x3E break.
fn db2000_cid36_break() -> Vec<Step> {
    vec![
        step(DB2000_CERT_RED_CID00_R3L, Method::Signed),
        step(DB2000_BREAK_R1F, Method::Break),
    ]
}

fn db2010_cid36_break() -> Vec<Step> {
    vec![
        step(DB2010_CERT_RED_CID01_R2E, Method::Signed),
        step(DB2010_BREAK_R2E, Method::Break),
    ]
}

/// Plain "get any loader running" selection used before GDFS access on
/// DB2000/DB2010.
pub fn flash_mode_plan(chip: ChipId, cid: u8) -> Result<Plan> {
    let steps = match chip {
        ChipId::Db2000 => match cid {
            36 => vec![step(DB2000_PILOADER_RED_CID00_R3A, Method::Bootrom)],
            _ => vec![step(DB2000_PILOADER_RED_CID03_P3B, Method::Bootrom)],
        },
        ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => {
            if cid <= 36 {
                vec![step(DB2010_PILOADER_RED_CID00_P3L, Method::Bootrom)]
            } else {
                vec![step(DB2010_PILOADER_RED_CID00_P4D, Method::Bootrom)]
            }
        }
        ChipId::Db2020 => vec![step(DB2020_PILOADER_RED_CID01_P3M, Method::Bootrom)],
        other => return Err(Error::UnsupportedChip(other.wire_id())),
    };
    Ok(Plan::new(steps))
}

pub fn csloader_plan(chip: ChipId, cid: u8, color: Option<Color>) -> Result<Plan> {
    match chip {
        ChipId::Db2000 => csloader_db2000(cid),
        ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => csloader_db2010(cid, color),
        ChipId::Db2020 => csloader_db2020(cid, color),
        ChipId::Pnx5230 => csloader_pnx5230(cid),
        other => Err(Error::UnsupportedChip(other.wire_id())),
    }
}

fn csloader_db2000(cid: u8) -> Result<Plan> {
    match cid {
        29 => {
            let mut steps = db2000_cid29_break();
            steps.push(z1010_step(
                DB2000_VIOLA_FS_LOADER_R1E,
                DB2000_SEMC_FS_LOADER_R2B,
                Method::Signed,
            ));
            Ok(Plan::quiet(steps))
        }
        36 => {
            let mut steps = vec![step(DB2000_PILOADER_RED_CID00_R1F, Method::Bootrom)];
            steps.extend(db2000_cid36_break());
            steps.push(step(DB2000_CSLOADER_R4B_SETOOL, Method::Signed));
            Ok(Plan::quiet(steps))
        }
        37 => Ok(Plan::new(vec![
            step(DB2000_PILOADER_RED_CID00_R2B, Method::Bootrom),
            step(DB2000_CSLOADER_RED_CID37_P4L, Method::Signed),
        ])),
        49 => Ok(Plan::new(vec![
            step(DB2000_PILOADER_RED_CID00_R2B, Method::Bootrom),
            step(DB2000_CSLOADER_RED_CID49_P4L, Method::Signed),
        ])),
        other => Err(Error::UnsupportedCid(other)),
    }
}

fn csloader_db2010(cid: u8, color: Option<Color>) -> Result<Plan> {
    if cid == 29 {
        let mut steps = db2010_cid29_break();
        steps.push(step(DB2010_CSLOADER_R2C_DEN_PO, Method::Signed));
        return Ok(Plan::quiet(steps));
    }
    if cid <= 36 {
        let mut steps = vec![step(DB2010_PILOADER_RED_CID00_R2F, Method::Bootrom)];
        steps.extend(db2010_cid36_break());
        steps.push(step(DB2010_CSLOADER_R2C_DEN_PO, Method::Signed));
        return Ok(Plan::new(steps));
    }

    match color {
        Some(Color::Brown) => match cid {
            49 => Ok(Plan::new(vec![
                step(DB2010_PILOADER_RED_CID00_R2AB, Method::Bootrom),
                step(DB2010_CSLOADER_BRN_CID49_V26, Method::Signed),
            ])),
            51 => Ok(Plan::new(vec![
                step(DB2010_PILOADER_RED_CID00_P4D, Method::Bootrom),
                Step {
                    set_skip_cmd: true,
                    ..step(DB2010_RESPIN_PRODLOADER_SETOOL2, Method::Signed)
                },
                step(DB2012_CSLOADER_RED_CID51_R3B009, Method::Signed),
            ])),
            other => Err(Error::UnsupportedCid(other)),
        },
        Some(Color::Red) => {
            let cs = match cid {
                49 => {
                    return Ok(Plan::new(vec![
                        step(DB2010_PILOADER_RED_CID00_P3L, Method::Bootrom),
                        step(DB2010_CSLOADER_RED_CID49_R3A010, Method::Signed),
                    ]));
                }
                50 => DB2012_CSLOADER_RED_CID50_R3B009,
                51 => DB2012_CSLOADER_RED_CID51_R3B009,
                52 => DB2012_CSLOADER_RED_CID52_R3B009,
                53 => DB2012_CSLOADER_RED_CID53_R3B014,
                other => return Err(Error::UnsupportedCid(other)),
            };
            Ok(Plan::new(vec![
                step(DB2010_PILOADER_RED_CID00_P4D, Method::Bootrom),
                step(cs, Method::Signed),
            ]))
        }
        _ => Err(Error::UnknownDomain),
    }
}

fn csloader_db2020(cid: u8, color: Option<Color>) -> Result<Plan> {
    let mut steps = vec![step(DB2020_PILOADER_RED_CID01_P3M, Method::Bootrom)];
    if color == Some(Color::Brown) {
        steps.push(step(DB2020_LOADER_FOR_SETOOL2, Method::Signed));
        steps.push(step(DB2020_FSLOADER_P5G_SETOOL, Method::Signed));
        return Ok(Plan::new(steps));
    }
    let cs = match cid {
        49 => DB2020_CSLOADER_RED_CID49_R3A009,
        51 => DB2020_CSLOADER_RED_CID51_R3A009,
        52 => DB2020_CSLOADER_RED_CID52_R3A009,
        53 => DB2020_CSLOADER_RED_CID53_R3A013,
        other => return Err(Error::UnsupportedCid(other)),
    };
    steps.push(step(cs, Method::Signed));
    Ok(Plan::new(steps))
}

fn csloader_pnx5230(cid: u8) -> Result<Plan> {
    let mut plan = oflash_pnx5230(cid)?;
    let cs = match cid {
        51 => PNX5230_CSLOADER_RED_CID51_R3A015,
        52 => PNX5230_CSLOADER_RED_CID52_R3A015,
        53 => PNX5230_CSLOADER_RED_CID53_R3A016,
        other => return Err(Error::UnsupportedCid(other)),
    };
    plan.steps.push(step(cs, Method::Signed));
    Ok(plan)
}

pub fn oflash_plan(chip: ChipId, cid: u8, color: Option<Color>) -> Result<Plan> {
    match chip {
        ChipId::Db2000 => oflash_db2000(cid),
        ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => oflash_db2010(cid, color),
        ChipId::Db2020 => oflash_db2020(cid, color),
        ChipId::Pnx5230 => oflash_pnx5230(cid),
        other => Err(Error::UnsupportedChip(other.wire_id())),
    }
}

fn oflash_db2000(cid: u8) -> Result<Plan> {
    match cid {
        29 => Ok(Plan::quiet(db2000_cid29_break())),
        36 => {
            let mut steps = vec![step(DB2000_PILOADER_RED_CID00_R1F, Method::Bootrom)];
            steps.extend(db2000_cid36_break());
            steps.push(step(DB2000_FLLOADER_R2B_DEN_PO, Method::Signed));
            Ok(Plan::new(steps))
        }
        37 => Ok(Plan::new(vec![
            step(DB2000_PILOADER_RED_CID00_R2B, Method::Bootrom),
            step(DB2000_FLLOADER_RED_CID37_R2B, Method::Signed),
        ])),
        49 => Ok(Plan::new(vec![
            step(DB2000_PILOADER_RED_CID00_R2B, Method::Bootrom),
            step(DB2000_FLLOADER_RED_CID49_R2B, Method::Signed),
        ])),
        other => Err(Error::UnsupportedCid(other)),
    }
}

fn oflash_db2010(cid: u8, color: Option<Color>) -> Result<Plan> {
    if cid == 29 {
        return Ok(Plan::quiet(db2010_cid29_break()));
    }
    if cid <= 36 {
        let mut steps = vec![step(DB2010_PILOADER_RED_CID00_R2F, Method::Bootrom)];
        steps.extend(db2010_cid36_break());
        steps.push(step(DB2010_FLLOADER_P5G_DEN_PO, Method::Signed));
        return Ok(Plan::new(steps));
    }

    if color == Some(Color::Brown) {
        return match cid {
            49 => Ok(Plan::quiet(vec![
                step(DB2010_PILOADER_BROWN_CID49_R1A002, Method::Bootrom),
                step(DB2010_FLLOADER_R2B_DEN_PO, Method::Signed),
            ])),
            51 => Ok(Plan::quiet(vec![
                step(DB2012_PILOADER_BROWN_CID51_R1A002, Method::Bootrom),
                step(DB2010_FLLOADER_P5G_DEN_PO, Method::Signed),
            ])),
            other => Err(Error::UnsupportedCid(other)),
        };
    }

    let (pi, fl) = match cid {
        49 => (
            DB2010_PILOADER_RED_CID00_P3L,
            DB2010_FLLOADER_RED_CID49_R2A007,
        ),
        50 => (
            DB2010_PILOADER_RED_CID00_P4D,
            DB2012_FLLOADER_RED_CID50_R1A002,
        ),
        51 => (
            DB2010_PILOADER_RED_CID00_P4D,
            DB2012_FLLOADER_RED_CID51_R2B012,
        ),
        52 => (
            DB2010_PILOADER_RED_CID00_P4D,
            DB2012_FLLOADER_RED_CID52_R2B012,
        ),
        53 => (
            DB2010_PILOADER_RED_CID00_P4D,
            DB2012_FLLOADER_RED_CID53_R2B017,
        ),
        other => return Err(Error::UnsupportedCid(other)),
    };
    Ok(Plan::new(vec![
        step(pi, Method::Bootrom),
        step(fl, Method::Signed),
    ]))
}

fn oflash_db2020(cid: u8, color: Option<Color>) -> Result<Plan> {
    let mut steps = vec![step(DB2020_PILOADER_RED_CID01_P3M, Method::Bootrom)];
    if color == Some(Color::Brown) {
        steps.push(step(DB2020_PILOADER_BROWN_CID49_SETOOL, Method::Signed));
        steps.push(step(DB2020_FLLOADER_R2A005_DEN_PO, Method::Signed));
        return Ok(Plan::new(steps));
    }
    let fl = match cid {
        49 => DB2020_FLLOADER_RED_CID49_R2A005,
        51 => DB2020_FLLOADER_RED_CID51_R2A005,
        52 => DB2020_FLLOADER_RED_CID52_R2A005,
        53 => DB2020_FLLOADER_RED_CID53_R2A015,
        other => return Err(Error::UnsupportedCid(other)),
    };
    steps.push(step(fl, Method::Signed));
    Ok(Plan::new(steps))
}

fn oflash_pnx5230(cid: u8) -> Result<Plan> {
    let fl = match cid {
        51 => PNX5230_FLLOADER_RED_CID51_R2A016,
        52 => PNX5230_FLLOADER_RED_CID52_R2A019,
        53 => PNX5230_FLLOADER_RED_CID53_R2A022,
        other => return Err(Error::UnsupportedCid(other)),
    };
    Ok(Plan::quiet(vec![step(fl, Method::Bootrom)]))
}

/// Selection for the raw-read flash server. High-CID retail phones go
/// through the SETOOL2 exploit chain; CID 29/36 through the breaks.
pub fn bflash_plan(chip: ChipId, cid: u8, color: Option<Color>, anycid: bool) -> Result<Plan> {
    match chip {
        ChipId::Db2000 => match cid {
            29 => Ok(Plan::quiet(db2000_cid29_break())),
            36 => {
                let mut steps = vec![step(DB2000_PILOADER_RED_CID00_R1F, Method::Bootrom)];
                steps.extend(db2000_cid36_break());
                steps.push(step(DB2000_FLLOADER_R2B_DEN_PO, Method::Signed));
                Ok(Plan::new(steps))
            }
            49 if color == Some(Color::Brown) => {
                let mut steps = vec![step(DB2000_PILOADER_RED_CID00_R1F, Method::Bootrom)];
                steps.extend(db2000_cid36_break());
                steps.push(step(DB2000_FLLOADER_R2B_DEN_PO, Method::Signed));
                Ok(Plan::new(steps))
            }
            other => Err(Error::UnsupportedCid(other)),
        },
        ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => {
            if cid == 29 {
                return Ok(Plan::quiet(db2010_cid29_break()));
            }
            if cid == 36 {
                let mut steps = vec![step(DB2010_PILOADER_RED_CID00_R2F, Method::Bootrom)];
                steps.extend(db2010_cid36_break());
                steps.push(step(DB2010_FLLOADER_P5G_DEN_PO, Method::Signed));
                return Ok(Plan::new(steps));
            }
            if color == Some(Color::Brown) {
                return match cid {
                    49 => Ok(Plan::quiet(vec![
                        step(DB2010_PILOADER_BROWN_CID49_R1A002, Method::Bootrom),
                        step(DB2010_FLLOADER_R2B_DEN_PO, Method::Signed),
                    ])),
                    51 => Ok(Plan::quiet(vec![
                        step(DB2010_PILOADER_RED_CID00_P4D, Method::Bootrom),
                        step(DB2010_RESPIN_PRODLOADER_SETOOL2, Method::Signed),
                    ])),
                    other => Err(Error::UnsupportedCid(other)),
                };
            }
            if color == Some(Color::Red) && (cid >= 49 || anycid) {
                return Ok(Plan::exploit(vec![
                    step(DB2010_RESPIN_ID_LOADER_SETOOL2, Method::Bootrom),
                    step(DB2010_RESPIN_PRODLOADER_SETOOL2, Method::Signed),
                ]));
            }
            Err(Error::UnsupportedCid(cid))
        }
        ChipId::Db2020 => {
            if !anycid {
                if color == Some(Color::Brown) {
                    return Ok(Plan::new(vec![
                        step(DB2020_PILOADER_RED_CID01_P3M, Method::Bootrom),
                        step(DB2020_PILOADER_BROWN_CID49_SETOOL, Method::Signed),
                        step(DB2020_FLLOADER_R2A005_DEN_PO, Method::Signed),
                    ]));
                }
                return Err(Error::UnsupportedCid(cid));
            }
            Ok(Plan::exploit(vec![
                step(DB2020_PRELOADER_FOR_SETOOL2, Method::Bootrom),
                step(DB2020_LOADER_FOR_SETOOL2, Method::Signed),
            ]))
        }
        // the PNX5230 raw-read path always runs the exploit chain
        ChipId::Pnx5230 => Ok(Plan::exploit(vec![
            step(PNX5230_PROLOGUE, Method::Bootrom),
            step(PNX5230_PRODUCTION, Method::Signed),
        ])),
        other => Err(Error::UnsupportedChip(other.wire_id())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db2020_red_cid49_csloader() {
        let plan = csloader_plan(ChipId::Db2020, 49, Some(Color::Red)).unwrap();
        assert!(!plan.skip_cmd && !plan.skiperrors);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0].key,
            StepKey::Fixed(DB2020_PILOADER_RED_CID01_P3M)
        );
        assert_eq!(plan.steps[0].method, Method::Bootrom);
        assert_eq!(
            plan.steps[1].key,
            StepKey::Fixed(DB2020_CSLOADER_RED_CID49_R3A009)
        );
        assert_eq!(plan.steps[1].method, Method::Signed);
    }

    #[test]
    fn test_pnx5230_cid52_csloader_rides_flash_loader() {
        let plan = csloader_plan(ChipId::Pnx5230, 52, Some(Color::Red)).unwrap();
        assert!(plan.skip_cmd);
        assert_eq!(
            plan.steps[0].key,
            StepKey::Fixed(PNX5230_FLLOADER_RED_CID52_R2A019)
        );
        assert_eq!(
            plan.steps[1].key,
            StepKey::Fixed(PNX5230_CSLOADER_RED_CID52_R3A015)
        );
    }

    #[test]
    fn test_db2000_cid29_resolves_z1010_lazily() {
        let plan = csloader_plan(ChipId::Db2000, 29, Some(Color::Red)).unwrap();
        assert!(plan.skip_cmd);
        let unsigned = &plan.steps[2];
        assert_eq!(unsigned.method, Method::Unsigned(0));
        assert_eq!(unsigned.key.resolve(true), DB2000_VIOLA_PRODUCTION_R2Z);
        assert_eq!(unsigned.key.resolve(false), DB2000_PRODUCTION_R2Z);
    }

    #[test]
    fn test_db2010_bflash_anycid_is_exploit_path() {
        let plan = bflash_plan(ChipId::Db2010b, 51, Some(Color::Red), true).unwrap();
        assert!(plan.skiperrors && plan.skip_cmd);
        assert_eq!(
            plan.steps[0].key,
            StepKey::Fixed(DB2010_RESPIN_ID_LOADER_SETOOL2)
        );
    }

    #[test]
    fn test_db2020_bflash_requires_anycid_for_red() {
        assert!(matches!(
            bflash_plan(ChipId::Db2020, 53, Some(Color::Red), false),
            Err(Error::UnsupportedCid(53))
        ));
        // the exploit chain is exactly two uploads, like on PNX5230
        let plan = bflash_plan(ChipId::Db2020, 53, Some(Color::Red), true).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0].key,
            StepKey::Fixed(DB2020_PRELOADER_FOR_SETOOL2)
        );
        assert_eq!(plan.steps[0].method, Method::Bootrom);
        assert_eq!(plan.steps[1].key, StepKey::Fixed(DB2020_LOADER_FOR_SETOOL2));
        assert_eq!(plan.steps[1].method, Method::Signed);
    }

    #[test]
    fn test_db2012_cids_use_db2010_prodid() {
        let plan = csloader_plan(ChipId::Db2010b, 53, Some(Color::Red)).unwrap();
        assert_eq!(
            plan.steps[0].key,
            StepKey::Fixed(DB2010_PILOADER_RED_CID00_P4D)
        );
        assert_eq!(
            plan.steps[1].key,
            StepKey::Fixed(DB2012_CSLOADER_RED_CID53_R3B014)
        );
    }

    #[test]
    fn test_unknown_chip_rejected() {
        assert!(matches!(
            csloader_plan(ChipId::Unknown(0xC802), 49, Some(Color::Red)),
            Err(Error::UnsupportedChip(0xC802))
        ));
    }
}
