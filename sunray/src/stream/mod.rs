//! Media transmit loops and the address-learning handshake.

pub(crate) mod audio;
pub(crate) mod video;

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, warn};

use wire::PING_PAYLOAD;

use crate::session::SessionShared;

/// Blocks until the client's PING datagram arrives on `socket`, then
/// connects the socket to that peer. The client only pings after PLAY, so
/// returning here is also the gate that keeps media off the wire until
/// the stream is acknowledged.
///
/// Returns `None`, with the session stopped, when the handshake deadline
/// passes or the socket fails; returns `None` without touching state when
/// the session is already tearing down.
pub(crate) fn wait_for_ping(
    socket: &UdpSocket,
    shared: &SessionShared,
    ping_timeout: Duration,
) -> Option<SocketAddr> {
    let deadline = Instant::now() + ping_timeout;
    let mut buf = [0u8; 64];
    loop {
        if shared.is_stopping() {
            return None;
        }
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if &buf[..len] == PING_PAYLOAD {
                    if let Err(err) = socket.connect(peer) {
                        warn!("cannot connect media socket to {peer}: {err}");
                        shared.stop();
                        return None;
                    }
                    debug!("handshake from {peer}");
                    return Some(peer);
                }
                debug!("ignoring {len} byte datagram from {peer} before handshake");
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => {
                warn!("media socket failed during handshake: {err}");
                shared.stop();
                return None;
            }
        }
        if Instant::now() >= deadline {
            warn!("no handshake within {ping_timeout:?}, stopping session");
            shared.stop();
            return None;
        }
    }
}
