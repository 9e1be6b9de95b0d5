//! Audio datagram: transport header + opaque encoded payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;
use crate::header::{TransportHeader, TRANSPORT_HEADER_LEN};

/// One audio datagram. The sequence number advances once per packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub transport: TransportHeader,
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn new(sequence_number: u16, payload: Bytes) -> Self {
        AudioPacket {
            transport: TransportHeader::audio(sequence_number),
            payload,
        }
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TRANSPORT_HEADER_LEN + self.payload.len());
        self.transport.marshal_to(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        let transport = TransportHeader::unmarshal(&mut buf)?;
        Ok(AudioPacket {
            transport,
            payload: buf,
        })
    }
}
