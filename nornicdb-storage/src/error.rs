use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage log corrupted: {0}")]
    LogCorrupted(&'static str),

    #[error("log checksum mismatch at record {0}")]
    LogChecksumMismatch(u64),

    #[error("external id {0} already exists")]
    DuplicateExternalId(u64),

    #[error("node {0} does not exist")]
    NoSuchNode(u32),

    #[error("output path already exists: {0}")]
    OutputExists(String),

    #[error("{0}")]
    Other(String),
}
