use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("all session slots are in use")]
    ErrNoFreeSlot,
    #[error("no launch event pending")]
    ErrNoPendingLaunch,
    #[error("requested video format is disabled by host policy")]
    ErrVideoFormatDisabled,
    #[error("input authentication failed")]
    ErrInputAuthFailed,
    #[error("invalid setting {0}: {1}")]
    ErrInvalidSetting(&'static str, String),
    #[error("capture: {0}")]
    ErrCapture(String),
    #[error("wire: {0}")]
    Wire(#[from] wire::Error),
    #[error("rtsp: {0}")]
    Rtsp(#[from] rtsp::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
