//! RTP-style transport header shared by video and audio datagrams.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Marshaled size of [`TransportHeader`].
pub const TRANSPORT_HEADER_LEN: usize = 12;

/// First byte of a video datagram.
pub const VIDEO_HEADER_BYTE: u8 = 0x90;
/// First byte of an audio datagram.
pub const AUDIO_HEADER_BYTE: u8 = 0x80;

/// Packet-type byte for video shards.
pub const PACKET_TYPE_VIDEO: u8 = 0x00;
/// Packet-type byte for audio packets.
pub const PACKET_TYPE_AUDIO: u8 = 97;

/// The fixed 12-byte prefix of every media datagram.
///
/// Multi-byte fields are big-endian on the wire. Timestamp and ssrc are
/// carried for layout compatibility and are always zero in this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportHeader {
    pub header: u8,
    pub packet_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl TransportHeader {
    pub fn video(sequence_number: u16) -> Self {
        TransportHeader {
            header: VIDEO_HEADER_BYTE,
            packet_type: PACKET_TYPE_VIDEO,
            sequence_number,
            timestamp: 0,
            ssrc: 0,
        }
    }

    pub fn audio(sequence_number: u16) -> Self {
        TransportHeader {
            header: AUDIO_HEADER_BYTE,
            packet_type: PACKET_TYPE_AUDIO,
            sequence_number,
            timestamp: 0,
            ssrc: 0,
        }
    }

    pub fn marshal_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.header);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < TRANSPORT_HEADER_LEN {
            return Err(Error::ErrShortPacket);
        }
        Ok(TransportHeader {
            header: buf.get_u8(),
            packet_type: buf.get_u8(),
            sequence_number: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrip() {
        let hdr = TransportHeader::video(0x1234);
        let mut buf = BytesMut::new();
        hdr.marshal_to(&mut buf);
        assert_eq!(buf.len(), TRANSPORT_HEADER_LEN);
        assert_eq!(buf[0], VIDEO_HEADER_BYTE);
        assert_eq!(&buf[2..4], &[0x12, 0x34]);

        let mut rd = buf.freeze();
        let parsed = TransportHeader::unmarshal(&mut rd).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn audio_defaults() {
        let hdr = TransportHeader::audio(7);
        assert_eq!(hdr.header, AUDIO_HEADER_BYTE);
        assert_eq!(hdr.packet_type, PACKET_TYPE_AUDIO);
        assert_eq!(hdr.timestamp, 0);
        assert_eq!(hdr.ssrc, 0);
    }

    #[test]
    fn short_buffer() {
        let mut short = &[0u8; TRANSPORT_HEADER_LEN - 1][..];
        assert_eq!(
            TransportHeader::unmarshal(&mut short),
            Err(Error::ErrShortPacket)
        );
    }
}
