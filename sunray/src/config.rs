//! Host-side policy settings, distinct from the per-session parameters a
//! client negotiates at ANNOUNCE time.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rtsp::SessionDescription;
use wire::video::VIDEO_SHARD_OVERHEAD;

use crate::error::{Error, Result};

pub const DEFAULT_RTSP_PORT: u16 = 48010;
pub const DEFAULT_VIDEO_PORT: u16 = 47998;
pub const DEFAULT_CONTROL_PORT: u16 = 47999;
pub const DEFAULT_AUDIO_PORT: u16 = 48000;

/// The UI-refresh bound on every polling loop; liveness checks never wait
/// longer than this.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Largest video packet size a client may announce. Anything sane is far
/// below one MTU; the cap keeps a hostile value from sizing every shard
/// buffer in the session.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

// The default bases are adjacent, so consecutive slots step by 3.
const SLOT_PORT_STRIDE: u16 = 3;

/// The UDP port triple owned by one session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPorts {
    pub video: u16,
    pub control: u16,
    pub audio: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bind address for every listener and media socket.
    pub address: IpAddr,
    pub rtsp_port: u16,
    pub video_port: u16,
    pub control_port: u16,
    pub audio_port: u16,
    /// Maximum concurrent sessions (slot count).
    pub capacity: usize,
    /// Feedback silence tolerated before a session is torn down.
    pub ping_timeout: Duration,
    /// Parity overhead applied to every video frame, in percent.
    pub fec_percentage: u8,
    /// Whether clients may negotiate an HEVC bitstream.
    pub hevc_supported: bool,
    /// Opaque surround capability string echoed by DESCRIBE.
    pub surround_params: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            address: IpAddr::from([0, 0, 0, 0]),
            rtsp_port: DEFAULT_RTSP_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            audio_port: DEFAULT_AUDIO_PORT,
            capacity: 1,
            ping_timeout: Duration::from_secs(10),
            fec_percentage: 20,
            hevc_supported: false,
            surround_params: "NONE".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::ErrInvalidSetting("capacity", "must be at least 1".into()));
        }
        if self.fec_percentage == 0 {
            return Err(Error::ErrInvalidSetting(
                "fec_percentage",
                "must be between 1 and 255".into(),
            ));
        }
        if self.ping_timeout.is_zero() {
            return Err(Error::ErrInvalidSetting("ping_timeout", "must be non-zero".into()));
        }
        Ok(())
    }

    /// The port triple for a slot. A base of 0 stays 0 so tests can bind
    /// ephemerally.
    pub fn slot_ports(&self, slot: usize) -> SlotPorts {
        let offset = SLOT_PORT_STRIDE * slot as u16;
        let shift = |base: u16| if base == 0 { 0 } else { base + offset };
        SlotPorts {
            video: shift(self.video_port),
            control: shift(self.control_port),
            audio: shift(self.audio_port),
        }
    }

    /// Bounded wait used by the accept and feedback loops, `min(500 ms,
    /// ping_timeout)`.
    pub fn poll_interval(&self) -> Duration {
        POLL_INTERVAL.min(self.ping_timeout)
    }
}

/// Per-session parameters fixed at ANNOUNCE time, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub channel_count: u32,
    pub channel_mask: u32,
    /// Audio frame length in milliseconds.
    pub packet_duration: u32,
    /// Outbound video datagram budget, headers included.
    pub packet_size: usize,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub slices_per_frame: u32,
    pub max_reference_frames: u32,
    pub csc_mode: u32,
    /// 0 is H.264, 1 is HEVC.
    pub bitstream_format: u32,
    pub dynamic_range: u32,
    /// Copied from host policy, not client-negotiable.
    pub fec_percentage: u8,
}

impl SessionConfig {
    /// Builds the session parameters from a parsed ANNOUNCE payload.
    ///
    /// Keys a client may omit are seeded with their defaults first; every
    /// remaining absence is the client's error. A bitstream format the
    /// host policy disables is rejected here too, before any slot is
    /// touched.
    pub fn from_announce(
        sdp: &mut SessionDescription,
        settings: &Settings,
    ) -> Result<SessionConfig> {
        sdp.set_default("x-nv-aqos.packetDuration", "5");
        sdp.set_default("x-nv-video[0].encoderCscMode", "0");
        sdp.set_default("x-nv-vqos[0].bitStreamFormat", "0");
        sdp.set_default("x-nv-video[0].dynamicRangeMode", "0");

        let config = SessionConfig {
            channel_count: attr_u32(sdp, "x-nv-audio.surround.numChannels")?,
            channel_mask: attr_u32(sdp, "x-nv-audio.surround.channelMask")?,
            packet_duration: attr_u32(sdp, "x-nv-aqos.packetDuration")?,
            packet_size: attr_u32(sdp, "x-nv-video[0].packetSize")? as usize,
            width: attr_u32(sdp, "x-nv-video[0].clientViewportWd")?,
            height: attr_u32(sdp, "x-nv-video[0].clientViewportHt")?,
            framerate: attr_u32(sdp, "x-nv-video[0].maxFPS")?,
            bitrate_kbps: attr_u32(sdp, "x-nv-vqos[0].bw.maximumBitrateKbps")?,
            slices_per_frame: attr_u32(sdp, "x-nv-video[0].videoEncoderSlicesPerFrame")?,
            max_reference_frames: attr_u32(sdp, "x-nv-video[0].maxNumReferenceFrames")?,
            csc_mode: attr_u32(sdp, "x-nv-video[0].encoderCscMode")?,
            bitstream_format: attr_u32(sdp, "x-nv-vqos[0].bitStreamFormat")?,
            dynamic_range: attr_u32(sdp, "x-nv-video[0].dynamicRangeMode")?,
            fec_percentage: settings.fec_percentage,
        };

        if config.packet_size <= VIDEO_SHARD_OVERHEAD || config.packet_size > MAX_PACKET_SIZE {
            return Err(Error::Rtsp(rtsp::Error::ErrInvalidAttribute(
                "x-nv-video[0].packetSize".to_string(),
                config.packet_size.to_string(),
            )));
        }
        match config.bitstream_format {
            0 => {}
            1 if settings.hevc_supported => {}
            _ => return Err(Error::ErrVideoFormatDisabled),
        }
        Ok(config)
    }

    /// Payload bytes carried by one video shard.
    pub fn block_size(&self) -> usize {
        self.packet_size - VIDEO_SHARD_OVERHEAD
    }
}

fn attr_u32(sdp: &SessionDescription, key: &str) -> Result<u32> {
    let value = sdp.attr_i64(key)?;
    u32::try_from(value).map_err(|_| {
        Error::Rtsp(rtsp::Error::ErrInvalidAttribute(
            key.to_string(),
            value.to_string(),
        ))
    })
}
