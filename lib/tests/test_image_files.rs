use emptool::babe::{self, CheckMode, CheckResult, BLOCK_SIZE};

#[test]
fn test_raw_babe_raw_roundtrip_preserves_bytes() {
    let pattern: Vec<u8> = (0..=255u8).collect();
    let mut raw = Vec::new();
    for _ in 0..2048 {
        raw.extend_from_slice(&pattern);
    }
    assert_eq!(raw.len(), 8 * BLOCK_SIZE);

    let image = babe::from_raw(&raw, 0x20100000).unwrap();
    assert_eq!(babe::check(&image, CheckMode::Full), CheckResult::Ok);

    let back = babe::to_raw(&image).unwrap();
    assert_eq!(back.len(), raw.len());
    assert_eq!(back, raw);
}

#[test]
fn test_partial_tail_block_roundtrip() {
    let raw = vec![0x42u8; BLOCK_SIZE + 0x123];
    let image = babe::from_raw(&raw, 0x44140000).unwrap();
    let header = babe::BabeHeader::parse(&image).unwrap();
    assert_eq!(header.payload_size1, 2);
    assert_eq!(babe::to_raw(&image).unwrap(), raw);
}

#[test]
fn test_check_rejects_foreign_files() {
    assert_eq!(
        babe::check(b"MZ\x90\x00 not a phone image", CheckMode::Full),
        CheckResult::NotBabe
    );
    assert_eq!(
        babe::check(&[0xBA, 0xBE], CheckMode::Fast),
        CheckResult::BadFile
    );
}
