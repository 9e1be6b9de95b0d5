//! Audio pipeline: capture pump and per-packet transmit.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, warn};

use wire::AudioPacket;

use crate::media::{AudioSource, CaptureStatus};
use crate::session::SessionShared;
use crate::stream::wait_for_ping;

const RESTART_ATTEMPTS: u32 = 2;
const RESTART_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) fn pump_loop(
    shared: &SessionShared,
    mut source: Box<dyn AudioSource>,
    packet_deadline: Duration,
) {
    let mut restarts: u32 = 0;
    while !shared.is_stopping() {
        match source.capture_packet(packet_deadline) {
            Ok(CaptureStatus::Captured(payload)) => {
                restarts = 0;
                if shared.audio_queue.push(payload).is_err() {
                    break;
                }
            }
            Ok(CaptureStatus::Timeout) => {}
            Ok(CaptureStatus::Reinit) => {
                restarts += 1;
                if restarts > RESTART_ATTEMPTS {
                    error!("audio capture did not come back after {RESTART_ATTEMPTS} restarts");
                    shared.stop();
                    break;
                }
                warn!("audio capture lost its device, restarting ({restarts}/{RESTART_ATTEMPTS})");
                thread::sleep(RESTART_BACKOFF);
                if let Err(err) = source.restart() {
                    error!("audio capture restart failed: {err}");
                    shared.stop();
                    break;
                }
            }
            Err(err) => {
                error!("audio capture failed: {err}");
                shared.stop();
                break;
            }
        }
    }
}

/// One datagram per encoded chunk, sequence number stepping once per
/// packet.
pub(crate) fn transmit_loop(
    shared: &SessionShared,
    socket: UdpSocket,
    poll: Duration,
    ping_timeout: Duration,
) {
    if wait_for_ping(&socket, shared, ping_timeout).is_none() {
        return;
    }

    let mut sequence_number: u16 = 0;
    loop {
        let payload: Bytes = match shared.audio_queue.pop(poll) {
            Some(payload) => payload,
            None => {
                if shared.audio_queue.is_stopped() {
                    break;
                }
                continue;
            }
        };
        let datagram = AudioPacket::new(sequence_number, payload).marshal();
        if let Err(err) = socket.send(&datagram) {
            debug!("audio send failed: {err}");
        }
        sequence_number = sequence_number.wrapping_add(1);
    }
}
