//! Command-line front end for the EMP service tool: argument parsing,
//! config defaults, backup-directory bootstrap, then one action against
//! the phone.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::debug;

use emptool::action::{self, ConvertMode};
use emptool::babe::BLOCK_SIZE;
use emptool::connection;
use emptool::flash;
use emptool::loader;
use emptool::payload::Dirs;
use emptool::phone::PhoneInfo;
use emptool::serial::{SerialLink, TtyPort};

mod config;

fn parse_number(text: &str) -> Result<u32, String> {
    let trimmed = text.trim();
    let result = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        trimmed.parse()
    };
    result.map_err(|e| format!("invalid number '{text}': {e}"))
}

#[derive(Parser, Debug)]
#[command(version, about = "Service tool for EMP-protocol baseband phones")]
struct Args {
    /// Serial port name (e.g. /dev/ttyUSB0, COM2)
    #[arg(short, long)]
    port: Option<String>,

    /// Baudrate after the handshake
    #[arg(short, long)]
    baudrate: Option<u32>,

    /// Config file with directory and baudrate defaults
    #[arg(long, default_value = "emptool.toml")]
    config: PathBuf,

    /// Ignore CID restrictions (DB2012/DB2020/PNX5230 exploit path)
    #[arg(long)]
    anycid: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read and print phone identity, GDFS info, SIM lock and user code
    Identify,
    /// Flash a main firmware and optionally a filesystem image
    Flash {
        main_fw: PathBuf,
        fs_fw: Option<PathBuf>,
    },
    /// Dump a raw flash region into the backup directory
    ReadFlash {
        /// Start address
        #[arg(long, value_parser = parse_number)]
        start: u32,
        /// Size in bytes
        #[arg(long, value_parser = parse_number)]
        size: Option<u32>,
        /// Size in 64 KiB blocks
        #[arg(long, value_parser = parse_number)]
        blocks: Option<u32>,
        /// Wrap the dump in a BABE container (.ssw)
        #[arg(long)]
        save_as_babe: bool,
    },
    /// Back up the whole GDFS variable store
    ReadGdfs,
    /// Restore a GDFS backup file
    WriteGdfs { file: PathBuf },
    /// Run VKP patches or GDFS scripts
    WriteScript {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Unlock operations
    Unlock { target: String },
    /// Offline conversion between raw dumps and BABE images
    Convert {
        #[command(subcommand)]
        mode: Convert,
    },
}

#[derive(Subcommand, Debug)]
enum Convert {
    /// Wrap a raw file into a BABE image at the given address
    Raw2babe {
        file: PathBuf,
        #[arg(value_parser = parse_number)]
        addr: u32,
    },
    /// Unwrap a BABE image back into raw bytes
    Babe2raw { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = config::parse_config(&args.config)?;

    let dirs = Dirs {
        loader: config.loader_dir.clone(),
        rest: config.rest_dir.clone(),
        backup: config.backup_dir.clone(),
    };

    // offline action, no port involved
    if let Command::Convert { mode } = &args.command {
        let out = match mode {
            Convert::Raw2babe { file, addr } => {
                action::convert(ConvertMode::RawToBabe { addr: *addr }, file)?
            }
            Convert::Babe2raw { file } => action::convert(ConvertMode::BabeToRaw, file)?,
        };
        println!("written {}", out.display());
        return Ok(());
    }

    let Some(port_name) = args.port.as_deref() else {
        bail!("a serial port is required (--port)");
    };

    if matches!(
        args.command,
        Command::Identify | Command::ReadGdfs | Command::WriteGdfs { .. } | Command::ReadFlash { .. }
    ) {
        std::fs::create_dir_all(&dirs.backup)
            .with_context(|| format!("cannot create {}", dirs.backup.display()))?;
    }

    let baudrate = args.baudrate.unwrap_or(config.baudrate);
    println!("Port: {port_name}");
    println!("Baudrate: {baudrate}\n");

    let port = TtyPort::open(port_name)
        .with_context(|| format!("cannot open {port_name}"))?;
    let mut link = SerialLink::new(Box::new(port));

    let mut phone = PhoneInfo {
        anycid: args.anycid,
        ..PhoneInfo::default()
    };

    connection::establish(&mut link, &mut phone, baudrate)?;
    debug!("handshake done: {:?}", phone.chip);

    match &args.command {
        Command::Identify => action::identify(&mut link, &mut phone, &dirs)?,
        Command::Flash { main_fw, fs_fw } => {
            action::flash_firmware(&mut link, &mut phone, &dirs, main_fw, fs_fw.as_deref())?;
        }
        Command::ReadFlash {
            start,
            size,
            blocks,
            save_as_babe,
        } => {
            let size = match (size, blocks) {
                (Some(size), None) => *size,
                (None, Some(blocks)) => blocks * BLOCK_SIZE as u32,
                _ => bail!("read-flash needs exactly one of --size or --blocks"),
            };
            if size == 0 {
                bail!("read-flash needs a non-zero size");
            }
            let aligned = size.div_ceil(BLOCK_SIZE as u32) * BLOCK_SIZE as u32;
            if aligned != size {
                println!("size 0x{size:X} adjusted to aligned size 0x{aligned:X}");
            }
            phone.save_as_babe = *save_as_babe;
            let out = action::read_flash(&mut link, &mut phone, &dirs, *start, aligned)?;
            println!("dump written to {}", out.display());
        }
        Command::ReadGdfs => action::backup_gdfs(&mut link, &mut phone, &dirs)?,
        Command::WriteGdfs { file } => action::restore_gdfs(&mut link, &mut phone, &dirs, file)?,
        Command::WriteScript { files } => {
            action::exec_scripts(&mut link, &mut phone, &dirs, files, &mut flash::stdin_prompt)?;
        }
        Command::Unlock { target } => match target.as_str() {
            "usercode" => action::unlock_usercode(&mut link, &mut phone, &dirs)?,
            "simlock" => println!("Not implemented (yet)"),
            other => bail!("unknown unlock target '{other}'"),
        },
        Command::Convert { .. } => unreachable!("handled above"),
    }

    loader::shutdown(&mut link)?;
    Ok(())
}
