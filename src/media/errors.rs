use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Could not read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("File is corrupt")]
    FileCorrupt,
    #[error("Format not supported by reader")]
    UnsupportedFormat,
    #[error("Media is readable but has no audio track")]
    NothingToRead,
    #[error("Unknown metadata reader error: `{0}`")]
    Unknown(String),
}
