//! Capture and encode collaborator interfaces.
//!
//! The engine never touches a display or an encoder directly. Platform
//! integrations implement these traits; the pipeline threads drive them
//! and own every frame index and sequence number themselves.

use std::time::Duration;

use bytes::Bytes;

use crate::config::SessionConfig;
use crate::error::Result;

/// A raw frame handed over by a capture backend, opaque to the engine.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
}

/// One bounded capture attempt.
#[derive(Debug, Clone)]
pub enum CaptureStatus<T> {
    Captured(T),
    /// Nothing arrived within the deadline; the caller just polls again.
    Timeout,
    /// The backend lost its device and wants `restart` before the next
    /// attempt.
    Reinit,
}

/// An encoder output ready for packetizing.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub frame_index: u32,
    pub keyframe: bool,
    pub data: Bytes,
}

/// What the next encoded frame must repair, raised from client feedback
/// and consumed at most once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// Emit a self-contained frame; no prior references may be used.
    Keyframe,
    /// Stop referencing the inclusive frame-index range.
    Invalidate { first: u32, last: u32 },
}

impl RefreshRequest {
    /// Combines a pending request with a newer one. A keyframe already
    /// covers any invalidation, so it is never downgraded; between two
    /// invalidations the newer range wins.
    pub fn merge(self, incoming: RefreshRequest) -> RefreshRequest {
        match (self, incoming) {
            (RefreshRequest::Keyframe, _) => RefreshRequest::Keyframe,
            (_, RefreshRequest::Keyframe) => RefreshRequest::Keyframe,
            (_, range) => range,
        }
    }
}

pub trait VideoSource: Send {
    fn capture_frame(&mut self, timeout: Duration) -> Result<CaptureStatus<CapturedFrame>>;

    /// Re-opens the device after a `Reinit` status.
    fn restart(&mut self) -> Result<()>;
}

pub trait VideoEncoder: Send {
    /// Encodes one captured frame. `refresh` is the pending repair request,
    /// already reduced to a single value; the encoder applies it and
    /// reports via [`EncodedFrame::keyframe`] whether the output stands
    /// alone.
    fn encode(
        &mut self,
        frame: CapturedFrame,
        frame_index: u32,
        refresh: Option<RefreshRequest>,
    ) -> Result<EncodedFrame>;
}

/// Produces already-encoded audio chunks, one per packet duration.
pub trait AudioSource: Send {
    fn capture_packet(&mut self, timeout: Duration) -> Result<CaptureStatus<Bytes>>;

    fn restart(&mut self) -> Result<()>;
}

/// Opens capture and encode backends for a freshly announced session.
pub trait MediaFactory: Send + Sync {
    fn open_video(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn VideoSource>, Box<dyn VideoEncoder>)>;

    fn open_audio(&self, config: &SessionConfig) -> Result<Box<dyn AudioSource>>;
}
