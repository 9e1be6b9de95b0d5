//! Feedback-channel datagrams.
//!
//! Every message starts with a 16-bit little-endian type tag. Client to
//! server: handshake probes, periodic pings, loss/frame stats, reference
//! invalidation, keyframe requests, encrypted input. Server to client:
//! termination and rumble.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub const TAG_TERMINATION: u16 = 0x0100;
pub const TAG_RUMBLE: u16 = 0x010b;
pub const TAG_PERIODIC_PING: u16 = 0x0200;
pub const TAG_LOSS_STATS: u16 = 0x0201;
pub const TAG_FRAME_STATS: u16 = 0x0204;
pub const TAG_INPUT_DATA: u16 = 0x0206;
pub const TAG_INVALIDATE_REF_FRAMES: u16 = 0x0301;
pub const TAG_REQUEST_IDR_FRAME: u16 = 0x0302;
pub const TAG_START_A: u16 = 0x0305;
pub const TAG_START_B: u16 = 0x0307;

/// Size of the AEAD tag prefixing an input-data ciphertext.
pub const INPUT_TAG_LEN: usize = 16;

const LOSS_STATS_PAYLOAD_LEN: usize = 16;
const INVALIDATE_PAYLOAD_LEN: usize = 16;

/// Client-reported packet loss over a measurement window. Informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LossStats {
    pub lost: u32,
    pub window_millis: u32,
    pub last_good_frame: u32,
}

/// A parsed client-to-server feedback message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackMessage {
    StartA,
    StartB,
    PeriodicPing,
    LossStats(LossStats),
    FrameStats,
    /// Stop referencing frames in `first..=last`.
    InvalidateRefFrames { first: i64, last: i64 },
    RequestIdrFrame,
    /// AEAD-tagged input ciphertext: 16-byte tag, then ciphertext.
    InputData(Bytes),
}

impl FeedbackMessage {
    /// Parses one feedback datagram. An unrecognized tag is reported as
    /// [`Error::ErrUnknownFeedbackTag`]; callers log and drop those.
    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        if buf.remaining() < 2 {
            return Err(Error::ErrShortPacket);
        }
        let tag = buf.get_u16_le();
        match tag {
            TAG_START_A => Ok(FeedbackMessage::StartA),
            TAG_START_B => Ok(FeedbackMessage::StartB),
            TAG_PERIODIC_PING => Ok(FeedbackMessage::PeriodicPing),
            TAG_FRAME_STATS => Ok(FeedbackMessage::FrameStats),
            TAG_REQUEST_IDR_FRAME => Ok(FeedbackMessage::RequestIdrFrame),
            TAG_LOSS_STATS => {
                if buf.remaining() < LOSS_STATS_PAYLOAD_LEN {
                    return Err(Error::ErrShortPacket);
                }
                let lost = buf.get_u32_le();
                let window_millis = buf.get_u32_le();
                buf.advance(4);
                let last_good_frame = buf.get_u32_le();
                Ok(FeedbackMessage::LossStats(LossStats {
                    lost,
                    window_millis,
                    last_good_frame,
                }))
            }
            TAG_INVALIDATE_REF_FRAMES => {
                if buf.remaining() < INVALIDATE_PAYLOAD_LEN {
                    return Err(Error::ErrShortPacket);
                }
                let first = buf.get_i64_le();
                let last = buf.get_i64_le();
                Ok(FeedbackMessage::InvalidateRefFrames { first, last })
            }
            TAG_INPUT_DATA => {
                if buf.remaining() < 4 {
                    return Err(Error::ErrShortPacket);
                }
                let len = buf.get_u32() as usize;
                if len < INPUT_TAG_LEN || buf.remaining() < len {
                    return Err(Error::ErrShortPacket);
                }
                Ok(FeedbackMessage::InputData(buf.copy_to_bytes(len)))
            }
            other => Err(Error::ErrUnknownFeedbackTag(other)),
        }
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            FeedbackMessage::StartA => buf.put_u16_le(TAG_START_A),
            FeedbackMessage::StartB => buf.put_u16_le(TAG_START_B),
            FeedbackMessage::PeriodicPing => buf.put_u16_le(TAG_PERIODIC_PING),
            FeedbackMessage::FrameStats => buf.put_u16_le(TAG_FRAME_STATS),
            FeedbackMessage::RequestIdrFrame => buf.put_u16_le(TAG_REQUEST_IDR_FRAME),
            FeedbackMessage::LossStats(stats) => {
                buf.put_u16_le(TAG_LOSS_STATS);
                buf.put_u32_le(stats.lost);
                buf.put_u32_le(stats.window_millis);
                buf.put_u32_le(0);
                buf.put_u32_le(stats.last_good_frame);
            }
            FeedbackMessage::InvalidateRefFrames { first, last } => {
                buf.put_u16_le(TAG_INVALIDATE_REF_FRAMES);
                buf.put_i64_le(*first);
                buf.put_i64_le(*last);
            }
            FeedbackMessage::InputData(tagged) => {
                buf.put_u16_le(TAG_INPUT_DATA);
                buf.put_u32(tagged.len() as u32);
                buf.put_slice(tagged);
            }
        }
        buf.freeze()
    }
}

/// Server-to-client stream termination notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub reason: u16,
}

impl Termination {
    /// Graceful shutdown, also sent when the companion process exits.
    pub const REASON_CLOSED: u16 = 0x0100;

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16_le(TAG_TERMINATION);
        buf.put_u16_le(self.reason);
        buf.freeze()
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        if buf.remaining() < 4 {
            return Err(Error::ErrShortPacket);
        }
        let tag = buf.get_u16_le();
        if tag != TAG_TERMINATION {
            return Err(Error::ErrUnknownFeedbackTag(tag));
        }
        Ok(Termination {
            reason: buf.get_u16_le(),
        })
    }
}

/// Server-to-client controller rumble event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rumble {
    pub controller_id: u16,
    pub low_frequency: u16,
    pub high_frequency: u16,
}

impl Rumble {
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u16_le(TAG_RUMBLE);
        buf.put_u16_le(self.controller_id);
        buf.put_u16_le(self.low_frequency);
        buf.put_u16_le(self.high_frequency);
        buf.freeze()
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        if buf.remaining() < 8 {
            return Err(Error::ErrShortPacket);
        }
        let tag = buf.get_u16_le();
        if tag != TAG_RUMBLE {
            return Err(Error::ErrUnknownFeedbackTag(tag));
        }
        Ok(Rumble {
            controller_id: buf.get_u16_le(),
            low_frequency: buf.get_u16_le(),
            high_frequency: buf.get_u16_le(),
        })
    }
}
