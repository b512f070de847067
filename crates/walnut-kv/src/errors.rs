use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt value: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for KvError {
    fn from(err: sled::Error) -> Self {
        KvError::Unavailable(err.to_string())
    }
}

impl From<bincode::Error> for KvError {
    fn from(err: bincode::Error) -> Self {
        KvError::Corrupt(err.to_string())
    }
}
