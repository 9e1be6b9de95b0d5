//! Video shard datagram: transport header + frame-stream header + block.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::{TransportHeader, TRANSPORT_HEADER_LEN};

/// Marshaled size of [`VideoShardHeader`].
pub const VIDEO_SHARD_HEADER_LEN: usize = 16;

/// Total fixed prefix of a video shard datagram.
pub const VIDEO_SHARD_OVERHEAD: usize = TRANSPORT_HEADER_LEN + VIDEO_SHARD_HEADER_LEN;

/// Shard carries picture data.
pub const FLAG_CONTAINS_PIC_DATA: u8 = 0x1;
/// Shard is the last data shard of its frame.
pub const FLAG_EOF: u8 = 0x2;
/// Shard is the first shard of its frame.
pub const FLAG_SOF: u8 = 0x4;

const FEC_INDEX_SHIFT: u32 = 12;
const FEC_COUNT_SHIFT: u32 = 22;
const FEC_PERCENT_SHIFT: u32 = 4;
const FEC_INDEX_MASK: u32 = 0x3ff;
const FEC_COUNT_MASK: u32 = 0x3ff;
const FEC_PERCENT_MASK: u32 = 0xff;

/// FEC metadata packed into one 32-bit header field.
///
/// Layout (bit offsets): shard index at 12, data-shard count at 22,
/// FEC percentage at 4. Both 10-bit fields stay in range because the
/// packetizer never emits more than [`DATA_SHARDS_MAX`](crate::fec::DATA_SHARDS_MAX)
/// shards. The packing is a wire contract; do not rearrange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FecInfo {
    pub shard_index: u16,
    pub data_shards: u16,
    pub percentage: u8,
}

impl FecInfo {
    pub fn pack(&self) -> u32 {
        (u32::from(self.shard_index) & FEC_INDEX_MASK) << FEC_INDEX_SHIFT
            | (u32::from(self.data_shards) & FEC_COUNT_MASK) << FEC_COUNT_SHIFT
            | (u32::from(self.percentage) & FEC_PERCENT_MASK) << FEC_PERCENT_SHIFT
    }

    pub fn unpack(raw: u32) -> Self {
        FecInfo {
            shard_index: ((raw >> FEC_INDEX_SHIFT) & FEC_INDEX_MASK) as u16,
            data_shards: ((raw >> FEC_COUNT_SHIFT) & FEC_COUNT_MASK) as u16,
            percentage: ((raw >> FEC_PERCENT_SHIFT) & FEC_PERCENT_MASK) as u8,
        }
    }
}

/// The 16-byte frame-stream header following the transport header.
///
/// All multi-byte fields are little-endian on the wire. The stream packet
/// index mirrors the transport sequence number shifted left by 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoShardHeader {
    pub stream_packet_index: u32,
    pub frame_index: u32,
    pub flags: u8,
    pub fec: FecInfo,
}

impl VideoShardHeader {
    pub fn marshal_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.stream_packet_index);
        buf.put_u32_le(self.frame_index);
        buf.put_u8(self.flags);
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.fec.pack());
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < VIDEO_SHARD_HEADER_LEN {
            return Err(Error::ErrShortPacket);
        }
        let stream_packet_index = buf.get_u32_le();
        let frame_index = buf.get_u32_le();
        let flags = buf.get_u8();
        buf.advance(3);
        let fec = FecInfo::unpack(buf.get_u32_le());
        Ok(VideoShardHeader {
            stream_packet_index,
            frame_index,
            flags,
            fec,
        })
    }
}

/// One complete video shard datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPacket {
    pub transport: TransportHeader,
    pub header: VideoShardHeader,
    pub payload: Bytes,
}

impl VideoPacket {
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(VIDEO_SHARD_OVERHEAD + self.payload.len());
        self.transport.marshal_to(&mut buf);
        self.header.marshal_to(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        let transport = TransportHeader::unmarshal(&mut buf)?;
        let header = VideoShardHeader::unmarshal(&mut buf)?;
        Ok(VideoPacket {
            transport,
            header,
            payload: buf,
        })
    }
}
