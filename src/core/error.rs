use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(&'static str),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("store already exists at {}", .0.display())]
    Collision(PathBuf),
    #[error("store not found at {}", .0.display())]
    StoreNotFound(PathBuf),
    #[error("reservation of {requested} bytes exceeds extent capacity of {capacity} bytes")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("invalid reservation: {0}")]
    InvalidReservation(&'static str),
    #[error("stream already exists: {0}")]
    StreamExists(String),
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("unknown stream id: {0}")]
    UnknownStreamId(u32),
    #[error("stream {0} is closed")]
    StreamClosed(u32),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("writer already closed")]
    WriterClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
