//! End-user operations composed from the connection, loader, flash and
//! GDFS engines. Each runs start to finish on an exclusively owned port.

use std::path::{Path, PathBuf};

use log::error;

use crate::error::{Error, Result};
use crate::flash::{self, VkpChoice, VkpOutcome, VkpPrompt};
use crate::gdfs::{self, GdfsField};
use crate::loader;
use crate::payload::Dirs;
use crate::phone::{ChipId, PhoneInfo};
use crate::serial::SerialLink;
use crate::util;
use crate::vkp;

/// Print everything the phone will tell us about itself, then stash a
/// security-unit backup if none exists yet.
pub fn identify(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    if phone.chip == ChipId::Pnx5230 {
        return identify_pnx(link, phone, dirs);
    }

    loader::enter_flash_mode(link, phone, dirs)?;
    loader::activate_gdfs(link)?;

    println!("\nPhone Info (from GDFS):");

    let name = gdfs::read_string_var(link, GdfsField::PhoneName, phone.chip, phone.is_z1010)?;
    phone.phone_name = name.clone();
    println!("Model: {name}");

    let brand = gdfs::read_string_var(link, GdfsField::Brand, phone.chip, phone.is_z1010)?;
    println!("Brand: {brand}");

    if !matches!(phone.chip, ChipId::Db2000 | ChipId::Db2010a) {
        let article =
            gdfs::read_string_var(link, GdfsField::CxcArticle, phone.chip, phone.is_z1010)?;
        println!("MAPP CXC article: {article}");
        let version =
            gdfs::read_string_var(link, GdfsField::CxcVersion, phone.chip, phone.is_z1010)?;
        println!("MAPP CXC version: {version}");
    }

    let langpack = gdfs::read_string_var(link, GdfsField::LangPack, phone.chip, phone.is_z1010)?;
    println!("Language Package: {langpack}");

    let cda_article =
        gdfs::read_string_var(link, GdfsField::CdaArticle, phone.chip, phone.is_z1010)?;
    println!("CDA article: {cda_article}");
    let cda_revision =
        gdfs::read_string_var(link, GdfsField::CdaRevision, phone.chip, phone.is_z1010)?;
    println!("CDA revision: {cda_revision}");

    let def_article =
        gdfs::read_string_var(link, GdfsField::DefaultArticle, phone.chip, phone.is_z1010)?;
    println!("Default article: {def_article}");
    let def_version =
        gdfs::read_string_var(link, GdfsField::DefaultVersion, phone.chip, phone.is_z1010)?;
    println!("Default version: {def_version}");

    print_simlock(link)?;

    if phone.chip != ChipId::Db2020 {
        let code = gdfs::get_usercode(link)?;
        println!("User code: {code}\n");
    }

    let backup_path = dirs
        .backup
        .join(format!("secunits_{}.txt", phone.otp.imei));
    if !backup_path.exists() {
        gdfs::dump_sec_units(link, &backup_path)?;
    }
    Ok(())
}

/// PNX5230 identity is served by the boot ROM itself over the `ICG1`
/// dialect; no loader upload is needed.
fn identify_pnx(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    println!("Phone Info (from GDFS):");

    let fields = [
        (GdfsField::PhoneName, "Model"),
        (GdfsField::Brand, "Brand"),
        (GdfsField::CxcArticle, "MAPP CXC article"),
        (GdfsField::CxcVersion, "MAPP CXC version"),
        (GdfsField::LangPack, "Language package"),
        (GdfsField::CdaArticle, "CDA article"),
        (GdfsField::CdaRevision, "CDA revision"),
        (GdfsField::DefaultArticle, "Default article"),
        (GdfsField::DefaultVersion, "Default version"),
    ];
    for (field, label) in fields {
        let (block, msb, lsb) = gdfs::var_address(field, phone.chip, false)
            .ok_or(Error::UnsupportedChip(phone.chip.wire_id()))?;
        let raw = gdfs::pnx_read_var(link, block, msb, lsb)?;
        let value = if field == GdfsField::PhoneName {
            let name = util::decode_wide(&raw);
            phone.phone_name = name.clone();
            name
        } else {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        };
        println!("{label}: {value}");
    }

    let raw = gdfs::pnx_read_var(link, 0x00, 0x00, 0x06)?;
    match gdfs::parse_simlock(&raw) {
        Some(lock) => {
            println!(
                "{}",
                if lock.locked {
                    "LOCKED"
                } else {
                    "SIMLOCKS NOT DETECTED"
                }
            );
            println!("Provider: {}-{}\n", lock.mcc, lock.mnc);
        }
        None => println!("SIMLOCK unit unreadable\n"),
    }

    let backup_path = dirs.backup.join(format!(
        "secunits_{}_{}.txt",
        phone.phone_name, phone.otp.imei
    ));
    if !backup_path.exists() {
        gdfs::dump_sec_units_pnx(link, &backup_path)?;
    }
    Ok(())
}

fn print_simlock(link: &mut SerialLink) -> Result<()> {
    match gdfs::get_simlock(link)? {
        Some(lock) => {
            println!(
                "{}",
                if lock.locked {
                    "LOCKED"
                } else {
                    "SIMLOCKS NOT DETECTED"
                }
            );
            println!("Provider: {}-{}\n", lock.mcc, lock.mnc);
        }
        None => println!("SIMLOCK unit unreadable\n"),
    }
    Ok(())
}

/// Flash a main firmware and optionally a filesystem image, both
/// validated strictly before a byte goes down.
pub fn flash_firmware(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    dirs: &Dirs,
    main_fw: &Path,
    fs_fw: Option<&Path>,
) -> Result<()> {
    loader::send_oflash_loader(link, phone, dirs)?;
    flash::flash_babe_file(link, main_fw, true)?;
    if let Some(fs_fw) = fs_fw {
        flash::flash_babe_file(link, fs_fw, true)?;
    }
    Ok(())
}

pub fn read_flash(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    dirs: &Dirs,
    addr: u32,
    size: u32,
) -> Result<PathBuf> {
    loader::send_bflash_loader(link, phone, dirs)?;
    if phone.anycid {
        flash::restore_boot_area(link, phone, dirs)?;
    }
    flash::flash_read(link, phone, dirs, addr, size)
}

pub fn backup_gdfs(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    loader::send_csloader(link, phone, dirs)?;
    gdfs::backup_gdfs(link, phone, dirs)?;
    gdfs::terminate_access(link)?;
    Ok(())
}

pub fn restore_gdfs(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    dirs: &Dirs,
    input: &Path,
) -> Result<()> {
    loader::send_csloader(link, phone, dirs)?;
    gdfs::restore_gdfs(link, input)?;
    gdfs::terminate_access(link)?;
    Ok(())
}

/// Batch runner for `write-script`: VKP patches ride the flash server,
/// GDFS scripts ride the ChipSelect loader. The two cannot be mixed in
/// one run.
pub fn exec_scripts(
    link: &mut SerialLink,
    phone: &mut PhoneInfo,
    dirs: &Dirs,
    files: &[PathBuf],
    prompt: &mut dyn FnMut(VkpPrompt) -> VkpChoice,
) -> Result<()> {
    fn is_vkp(path: &Path) -> bool {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case("vkp"))
            .unwrap_or(false)
    }
    let has_vkp = files.iter().any(|f| is_vkp(f));
    let has_script = files.iter().any(|f| !is_vkp(f));

    if has_vkp && has_script {
        return Err(Error::MixedScriptKinds);
    }

    if has_vkp {
        loader::send_bflash_loader(link, phone, dirs)?;
        if phone.anycid {
            flash::restore_boot_area(link, phone, dirs)?;
        }

        let mut patched = 0;
        let mut skipped = 0;
        let mut result = Ok(());
        for file in files {
            let patch = match vkp::parse_file(file) {
                Ok(patch) => patch,
                Err(e) => {
                    error!("failed to parse VKP file {}: {e}", file.display());
                    result = Err(e);
                    continue;
                }
            };
            println!(
                "\n{} parsed successfully, {} byte(s)",
                file.display(),
                patch.lines.len()
            );

            match flash::flash_vkp(link, phone, &patch, Some(&mut *prompt)) {
                Ok(VkpOutcome::Applied) => patched += 1,
                Ok(VkpOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        println!("\nSummary: {patched} patched, {skipped} skipped\n");
        return result;
    }

    loader::send_csloader(link, phone, dirs)?;
    let transcript = PathBuf::from(format!(
        "script_{}_{}.txt",
        phone.phone_name, phone.otp.imei
    ));
    for file in files {
        println!("Try execute gdfs script: {}", file.display());
        gdfs::run_script(link, file, &transcript)?;
    }
    gdfs::terminate_access(link)?;
    Ok(())
}

/// User-code handling differs per family: older chips can only read the
/// current code back, DB2020/PNX5230 reset it through the ChipSelect
/// loader.
pub fn unlock_usercode(link: &mut SerialLink, phone: &mut PhoneInfo, dirs: &Dirs) -> Result<()> {
    match phone.chip {
        ChipId::Db2000 | ChipId::Db2010a | ChipId::Db2010b | ChipId::Db2012 => {
            loader::enter_flash_mode(link, phone, dirs)?;
            loader::activate_gdfs(link)?;
            let code = gdfs::get_usercode(link)?;
            println!("\nUser code: {code}\n");
            Ok(())
        }
        ChipId::Db2020 | ChipId::Pnx5230 => {
            loader::send_csloader(link, phone, dirs)?;
            gdfs::reset_usercode(link)?;
            gdfs::terminate_access(link)?;
            Ok(())
        }
        other => Err(Error::UnsupportedChip(other.wire_id())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    RawToBabe { addr: u32 },
    BabeToRaw,
}

/// Offline file conversion; the only action that needs no port.
pub fn convert(mode: ConvertMode, input: &Path) -> Result<PathBuf> {
    match mode {
        ConvertMode::RawToBabe { addr } => {
            let output = with_appended_extension(input, "ssw");
            flash::convert_raw_to_babe(input, &output, addr)?;
            Ok(output)
        }
        ConvertMode::BabeToRaw => {
            let output = with_appended_extension(input, "bin");
            flash::convert_babe_to_raw(input, &output)?;
            Ok(output)
        }
    }
}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_scripts_rejects_mixed_inputs() {
        use crate::serial::mock::MockPort;

        let mut link = SerialLink::new(Box::new(MockPort::silent()));
        let mut phone = PhoneInfo::default();
        let files = vec![PathBuf::from("patch.vkp"), PathBuf::from("units.txt")];
        let err = exec_scripts(
            &mut link,
            &mut phone,
            &crate::payload::Dirs::default(),
            &files,
            &mut |_| VkpChoice::Abort,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MixedScriptKinds));
    }

    #[test]
    fn test_convert_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let raw_path = dir.path().join("dump.bin");
        let raw: Vec<u8> = (0..0x400u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&raw_path, &raw).unwrap();

        let ssw = convert(
            ConvertMode::RawToBabe { addr: 0x20100000 },
            &raw_path,
        )
        .unwrap();
        assert!(ssw.to_string_lossy().ends_with("dump.bin.ssw"));

        let back = convert(ConvertMode::BabeToRaw, &ssw).unwrap();
        assert_eq!(std::fs::read(back).unwrap(), raw);
    }
}
