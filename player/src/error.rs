use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse MPD: {0}")]
    MpdParse(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no segment {index} in representation {repr_id}")]
    MissingSegment { index: u64, repr_id: u32 },

    #[error("transport does not support this operation: {0}")]
    TransportUnsupported(&'static str),

    #[error("no transfer known for {0}")]
    UnknownTransfer(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
