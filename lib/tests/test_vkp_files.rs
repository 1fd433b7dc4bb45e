use std::io::Write;

use emptool::vkp;
use emptool::Error;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_parse_patch_file_with_deltas_and_comments() {
    let file = write_temp(
        "; R1A patch for camera driver\n\
         +1000\n\
         00000100: AA BB ; enable\n\
         00000101: 01 02\n\
         -1000\n\
         00004000: 10 20\n",
    );
    let patch = vkp::parse_file(file.path()).unwrap();
    assert_eq!(patch.lines.len(), 3);
    assert_eq!(patch.lines[0].addr, 0x1100);
    assert_eq!(patch.lines[1].addr, 0x1101);
    assert_eq!(patch.lines[2].addr, 0x3000);
}

#[test]
fn test_parse_error_reports_line_and_excerpt() {
    let file = write_temp("00000100: AA BB\nthis is not a patch line\n");
    let err = vkp::parse_file(file.path()).unwrap_err();
    match err {
        Error::VkpParse { line, excerpt } => {
            assert_eq!(line, 2);
            assert_eq!(excerpt, "this is not a patch line");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_duplicate_across_lines_aborts() {
    // the second line's byte lands on an address the first line's
    // multi-byte group already claimed
    let file = write_temp("00000100: AABBCC DDEEFF\n00000101: 11 22\n");
    let err = vkp::parse_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::VkpParse { line: 2, .. }));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = vkp::parse_file(std::path::Path::new("/nonexistent/p.vkp")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
