#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Wire formats for the sunray streaming host: media shard headers, the
//! feedback-channel message codec, and the Reed-Solomon FEC packetizer.
//!
//! Every decoder here is bounds-checked; a short buffer yields
//! [`Error::ErrShortPacket`](error::Error::ErrShortPacket) rather than a
//! panic.

pub mod audio;
pub mod error;
pub mod feedback;
pub mod fec;
pub mod header;
pub mod video;

pub use audio::AudioPacket;
pub use error::{Error, Result};
pub use fec::{FecShardSet, DATA_SHARDS_MAX};
pub use feedback::FeedbackMessage;
pub use header::TransportHeader;
pub use video::{FecInfo, VideoPacket, VideoShardHeader};

/// The 4-byte datagram a client sends on a media port to open its NAT
/// mapping; the source address becomes the transmit peer.
pub const PING_PAYLOAD: &[u8] = b"PING";
