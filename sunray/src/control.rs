//! Feedback channel: demultiplexes client telemetry and doubles as the
//! session's liveness monitor.
//!
//! Every decodable message refreshes the keep-alive deadline; unknown
//! tags and undecodable datagrams do not. The loop also watches the
//! companion process and, whenever the session stops for a host-side
//! reason, tells the client why before returning.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, error, info, warn};

use wire::Error as WireError;
use wire::feedback::{FeedbackMessage, Termination};

use crate::crypto::InputCipher;
use crate::launch::{InputSink, ProcessMonitor};
use crate::media::RefreshRequest;
use crate::session::SessionShared;

pub(crate) struct FeedbackContext {
    pub(crate) socket: UdpSocket,
    pub(crate) cipher: InputCipher,
    pub(crate) monitor: Arc<dyn ProcessMonitor>,
    pub(crate) input: Arc<dyn InputSink>,
    pub(crate) app_id: Option<u32>,
    pub(crate) ping_timeout: Duration,
}

/// Runs until the session stops. The socket's read timeout, configured at
/// spawn to the poll interval, bounds how long a liveness check can lag.
pub(crate) fn feedback_loop(shared: &SessionShared, mut ctx: FeedbackContext) {
    let mut deadline = Instant::now() + ctx.ping_timeout;
    let mut peer: Option<SocketAddr> = None;
    let mut buf = [0u8; 2048];

    loop {
        if shared.is_stopping() {
            // Torn down by another worker or the accept loop.
            send_termination(&ctx.socket, peer);
            return;
        }

        match ctx.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                peer = Some(from);
                let raw = Bytes::copy_from_slice(&buf[..len]);
                match FeedbackMessage::unmarshal(&raw) {
                    Ok(message) => {
                        deadline = Instant::now() + ctx.ping_timeout;
                        if !handle_message(shared, &mut ctx, message) {
                            send_termination(&ctx.socket, peer);
                            return;
                        }
                    }
                    Err(WireError::ErrUnknownFeedbackTag(tag)) => {
                        debug!("unknown feedback tag {tag:#06x}, ignored");
                    }
                    Err(err) => debug!("undecodable feedback datagram: {err}"),
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => {
                error!("feedback socket failed: {err}");
                shared.stop();
                send_termination(&ctx.socket, peer);
                return;
            }
        }

        if Instant::now() > deadline {
            warn!("no feedback for {:?}, stopping session", ctx.ping_timeout);
            shared.stop();
            send_termination(&ctx.socket, peer);
            return;
        }
        if let Some(app_id) = ctx.app_id {
            if !ctx.monitor.is_running(app_id) {
                info!("application {app_id} exited, stopping session");
                shared.stop();
                send_termination(&ctx.socket, peer);
                return;
            }
        }
    }
}

/// Reacts to one message. Returns `false` when the session must stop.
fn handle_message(
    shared: &SessionShared,
    ctx: &mut FeedbackContext,
    message: FeedbackMessage,
) -> bool {
    match message {
        FeedbackMessage::StartA
        | FeedbackMessage::StartB
        | FeedbackMessage::PeriodicPing
        | FeedbackMessage::FrameStats => {}
        FeedbackMessage::LossStats(stats) => {
            debug!(
                "client lost {} packets over {} ms, last good frame {}",
                stats.lost, stats.window_millis, stats.last_good_frame
            );
        }
        FeedbackMessage::RequestIdrFrame => {
            debug!("client requested a keyframe");
            shared.raise_refresh(RefreshRequest::Keyframe);
        }
        FeedbackMessage::InvalidateRefFrames { first, last } => {
            shared.raise_refresh(invalidate_request(first, last));
        }
        FeedbackMessage::InputData(tagged) => match ctx.cipher.open(&tagged) {
            Ok(plaintext) => ctx.input.submit(&plaintext),
            Err(_) => {
                error!("input data failed authentication, stopping session");
                shared.stop();
                return false;
            }
        },
    }
    true
}

/// An invalidation range the encoder could not act on (negative bounds,
/// out-of-range indices, last before first) is promoted to a full
/// keyframe instead of being dropped.
fn invalidate_request(first: i64, last: i64) -> RefreshRequest {
    let (Ok(first), Ok(last)) = (u32::try_from(first), u32::try_from(last)) else {
        warn!("invalidation range {first}..={last} out of bounds, forcing a keyframe");
        return RefreshRequest::Keyframe;
    };
    if last < first {
        warn!("invalidation range {first}..={last} is inverted, forcing a keyframe");
        return RefreshRequest::Keyframe;
    }
    debug!("client invalidated reference frames {first}..={last}");
    RefreshRequest::Invalidate { first, last }
}

fn send_termination(socket: &UdpSocket, peer: Option<SocketAddr>) {
    if let Some(peer) = peer {
        let notice = Termination { reason: Termination::REASON_CLOSED }.marshal();
        if let Err(err) = socket.send_to(&notice, peer) {
            debug!("termination notice not delivered: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_range_passes_through() {
        assert_eq!(
            invalidate_request(100, 120),
            RefreshRequest::Invalidate { first: 100, last: 120 }
        );
        assert_eq!(
            invalidate_request(5, 5),
            RefreshRequest::Invalidate { first: 5, last: 5 }
        );
    }

    #[test]
    fn inverted_range_forces_keyframe() {
        assert_eq!(invalidate_request(100, 90), RefreshRequest::Keyframe);
    }

    #[test]
    fn negative_bounds_force_keyframe() {
        assert_eq!(invalidate_request(-5, 10), RefreshRequest::Keyframe);
        assert_eq!(invalidate_request(3, -1), RefreshRequest::Keyframe);
    }

    #[test]
    fn oversized_bounds_force_keyframe() {
        let beyond = i64::from(u32::MAX) + 1;
        assert_eq!(invalidate_request(0, beyond), RefreshRequest::Keyframe);
    }
}
