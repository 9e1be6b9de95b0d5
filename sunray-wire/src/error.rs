use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("packet too short")]
    ErrShortPacket,
    #[error("block size must not be zero")]
    ErrZeroBlockSize,
    #[error("empty payload")]
    ErrEmptyPayload,
    #[error("frame needs {0} shards, limit is {1}")]
    ErrTooManyShards(usize, usize),
    #[error("shard index {0} out of range {1}")]
    ErrShardIndexOutOfRange(usize, usize),
    #[error("shard length mismatch: got {0}, want {1}")]
    ErrShardLengthMismatch(usize, usize),
    #[error("not enough shards to reconstruct: have {0}, need {1}")]
    ErrNotEnoughShards(usize, usize),
    #[error("unknown feedback tag 0x{0:04x}")]
    ErrUnknownFeedbackTag(u16),
    #[error("reed-solomon: {0}")]
    ErrReedSolomon(String),
}

impl From<reed_solomon_erasure::Error> for Error {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        Error::ErrReedSolomon(e.to_string())
    }
}
