use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the core can surface. Compound operations propagate the
/// leaf kind verbatim; no layer retries on its own.
#[derive(Error, Debug)]
pub enum Error {
    #[error("serial port error: {0}")]
    Port(String),
    #[error("timed out waiting for the phone")]
    Timeout,
    #[error("reply too short ({0} bytes)")]
    FrameShort(usize),
    #[error("frame checksum mismatch (got {got:#04x}, expected {expected:#04x})")]
    FrameChecksum { got: u8, expected: u8 },
    #[error("unexpected frame: got {got:#04x}, expected {expected:#04x}")]
    UnexpectedFrame { got: u8, expected: u8 },
    #[error("EMP protocol {0:02}.{1:02} is not supported")]
    UnsupportedProtocol(u8, u8),
    #[error("phone reports no known security domain")]
    UnknownDomain,
    #[error("chip id {0:#06x} is not supported")]
    UnsupportedChip(u16),
    #[error("CID {0} is not supported for this operation")]
    UnsupportedCid(u8),
    #[error("payload blob missing: {path}")]
    PayloadMissing { path: PathBuf },
    #[error("bad BABE image: {0}")]
    BadBabe(&'static str),
    #[error("loader rejected during {stage}")]
    LoaderRejected { stage: &'static str },
    #[error("GDFS server rejected the request")]
    GdfsServerRejected,
    #[error("cannot mix VKP patches and GDFS scripts in one run")]
    MixedScriptKinds,
    #[error("VKP parse error at line {line}: {excerpt}")]
    VkpParse { line: usize, excerpt: String },
    #[error("{count} of {total} patch bytes do not match the flash")]
    VkpMismatch { count: usize, total: usize },
    #[error("patch is already installed")]
    VkpAlreadyInstalled,
    #[error("aborted by user")]
    UserAbort,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
