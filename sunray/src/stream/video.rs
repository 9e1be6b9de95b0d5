//! Video pipeline: the capture+encode pump and the FEC transmit loop.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, error, warn};

use wire::fec::FecShardSet;
use wire::video::{FLAG_CONTAINS_PIC_DATA, FLAG_EOF, FLAG_SOF, FecInfo, VideoShardHeader};
use wire::{Error as WireError, TransportHeader};

use crate::config::SessionConfig;
use crate::media::{CaptureStatus, RefreshRequest, VideoEncoder, VideoSource};
use crate::session::SessionShared;
use crate::stream::wait_for_ping;

// Consecutive reinit attempts tolerated before the session gives up.
const RESTART_ATTEMPTS: u32 = 2;
const RESTART_BACKOFF: Duration = Duration::from_millis(100);

/// Captures, encodes, and feeds the video queue until the session stops.
///
/// The first frame of a stream is always a keyframe: the request is
/// raised here before the first capture and consumed by the encoder like
/// any client-driven refresh.
pub(crate) fn pump_loop(
    shared: &SessionShared,
    mut source: Box<dyn VideoSource>,
    mut encoder: Box<dyn VideoEncoder>,
    frame_deadline: Duration,
) {
    shared.raise_refresh(RefreshRequest::Keyframe);
    let mut frame_index: u32 = 1;
    let mut restarts: u32 = 0;

    while !shared.is_stopping() {
        match source.capture_frame(frame_deadline) {
            Ok(CaptureStatus::Captured(frame)) => {
                restarts = 0;
                let refresh = shared.refresh.take();
                match encoder.encode(frame, frame_index, refresh) {
                    Ok(encoded) => {
                        frame_index = frame_index.wrapping_add(1);
                        if shared.video_queue.push(encoded).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!("video encode failed: {err}");
                        shared.stop();
                        break;
                    }
                }
            }
            Ok(CaptureStatus::Timeout) => {}
            Ok(CaptureStatus::Reinit) => {
                restarts += 1;
                if restarts > RESTART_ATTEMPTS {
                    error!("video capture did not come back after {RESTART_ATTEMPTS} restarts");
                    shared.stop();
                    break;
                }
                warn!("video capture lost its device, restarting ({restarts}/{RESTART_ATTEMPTS})");
                thread::sleep(RESTART_BACKOFF);
                if let Err(err) = source.restart() {
                    error!("video capture restart failed: {err}");
                    shared.stop();
                    break;
                }
            }
            Err(err) => {
                error!("video capture failed: {err}");
                shared.stop();
                break;
            }
        }
    }
}

/// Pops encoded frames, shards them with parity, and sends one datagram
/// per shard once the handshake has revealed the peer.
pub(crate) fn transmit_loop(
    shared: &SessionShared,
    socket: UdpSocket,
    config: &SessionConfig,
    poll: Duration,
    ping_timeout: Duration,
) {
    if wait_for_ping(&socket, shared, ping_timeout).is_none() {
        return;
    }

    let block_size = config.block_size();
    let mut lowseq: u16 = 0;
    let mut datagram = BytesMut::with_capacity(config.packet_size);

    loop {
        let frame = match shared.video_queue.pop(poll) {
            Some(frame) => frame,
            None => {
                if shared.video_queue.is_stopped() {
                    break;
                }
                continue;
            }
        };

        let set = match FecShardSet::encode(&frame.data, block_size, config.fec_percentage) {
            Ok(set) => set,
            Err(WireError::ErrTooManyShards(total, max)) => {
                warn!(
                    "frame {} needs {total} shards (max {max}), dropping it and forcing a keyframe",
                    frame.frame_index
                );
                shared.raise_refresh(RefreshRequest::Keyframe);
                continue;
            }
            Err(WireError::ErrEmptyPayload) => {
                debug!("frame {} encoded to nothing, skipped", frame.frame_index);
                continue;
            }
            Err(err) => {
                error!("cannot shard frame {}: {err}", frame.frame_index);
                shared.stop();
                break;
            }
        };

        let data_shards = set.data_shards();
        for (index, shard) in set.iter().enumerate() {
            let sequence_number = lowseq.wrapping_add(index as u16);
            let mut flags = 0u8;
            if index < data_shards {
                flags |= FLAG_CONTAINS_PIC_DATA;
                if index == 0 {
                    flags |= FLAG_SOF;
                }
                if index == data_shards - 1 {
                    flags |= FLAG_EOF;
                }
            }

            datagram.clear();
            TransportHeader::video(sequence_number).marshal_to(&mut datagram);
            VideoShardHeader {
                stream_packet_index: u32::from(sequence_number) << 8,
                frame_index: frame.frame_index,
                flags,
                fec: FecInfo {
                    shard_index: index as u16,
                    data_shards: data_shards as u16,
                    percentage: config.fec_percentage,
                },
            }
            .marshal_to(&mut datagram);
            datagram.put_slice(shard);

            if let Err(err) = socket.send(&datagram) {
                debug!("video send failed: {err}");
            }
        }
        lowseq = lowseq.wrapping_add(set.total_shards() as u16);
    }
}
