//! Control-protocol accept loop and command handlers.
//!
//! One TCP connection is serviced at a time, matching how clients drive
//! the protocol: connect, negotiate, PLAY, disconnect. The loop polls
//! with a bounded timeout so stopped sessions are reaped promptly even
//! while a connection sits idle.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use rtsp::assembler::MAX_MESSAGE_SIZE;
use rtsp::message::{OPTION_CSEQ, OPTION_SESSION};
use rtsp::{MessageAssembler, Request, Response, SessionDescription};

use crate::config::{SessionConfig, Settings};
use crate::error::{Error, Result};
use crate::launch::{CredentialsProvider, InputSink, ProcessMonitor};
use crate::media::MediaFactory;
use crate::session::Session;
use crate::session::manager::SessionManager;

const IDLE_WAIT: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 4096;

/// Substream names a SETUP may target.
const SUBSTREAMS: [&str; 3] = ["audio", "video", "control"];

/// The out-of-scope subsystems a server needs wired in.
pub struct Collaborators {
    pub provider: Arc<dyn CredentialsProvider>,
    pub factory: Arc<dyn MediaFactory>,
    pub monitor: Arc<dyn ProcessMonitor>,
    pub input: Arc<dyn InputSink>,
}

pub struct RtspServer {
    listener: TcpListener,
    settings: Settings,
    manager: Arc<SessionManager>,
    collaborators: Collaborators,
    conn: Option<ClientConnection>,
}

struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
    assembler: MessageAssembler,
}

impl RtspServer {
    pub fn bind(settings: Settings, collaborators: Collaborators) -> Result<RtspServer> {
        settings.validate()?;
        let listener = TcpListener::bind((settings.address, settings.rtsp_port))?;
        listener.set_nonblocking(true)?;
        info!("control server listening on {}", listener.local_addr()?);
        let manager = Arc::new(SessionManager::new(settings.capacity));
        Ok(RtspServer {
            listener,
            settings,
            manager,
            collaborators,
            conn: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle the management plane can watch sessions through while the
    /// accept loop runs elsewhere.
    pub fn manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.manager)
    }

    /// Runs the accept loop until `running` clears, then stops and joins
    /// every session.
    pub fn serve(&mut self, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            if !self.poll_once()? {
                thread::sleep(IDLE_WAIT);
            }
        }
        self.shutdown();
        Ok(())
    }

    /// One bounded iteration: reap finished sessions, accept a waiting
    /// client, service the active connection. Returns whether the
    /// iteration already blocked (idle callers sleep themselves).
    pub fn poll_once(&mut self) -> Result<bool> {
        self.manager.reap();

        if self.conn.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_read_timeout(Some(self.settings.poll_interval()))?;
                    debug!("control connection from {peer}");
                    self.conn = Some(ClientConnection {
                        stream,
                        peer,
                        assembler: MessageAssembler::new(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == ErrorKind::ConnectionAborted => {
                    debug!("client aborted before accept: {err}");
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }

        match self.conn.take() {
            Some(mut conn) => {
                match self.service_connection(&mut conn) {
                    Ok(true) => self.conn = Some(conn),
                    Ok(false) => debug!("client {} disconnected", conn.peer),
                    Err(err) => warn!("dropping control connection from {}: {err}", conn.peer),
                }
                // The read above already waited up to the poll interval.
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops and joins every active session, dropping any client
    /// connection.
    pub fn shutdown(&mut self) {
        self.conn = None;
        self.manager.stop_all();
    }

    /// Reads once with the poll-interval timeout, then answers every
    /// complete message buffered so far. `Ok(false)` means the peer
    /// closed the connection.
    fn service_connection(&mut self, conn: &mut ClientConnection) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        match conn.stream.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                conn.assembler.extend_from_slice(&chunk[..n]);
                if conn.assembler.buffered_len() > MAX_MESSAGE_SIZE {
                    return Err(Error::Other("control message too large".to_string()));
                }
                while let Some(raw) = conn.assembler.next_message() {
                    let text = String::from_utf8(raw)
                        .map_err(|_| Error::Rtsp(rtsp::Error::ErrInvalidUtf8))?;
                    let response = match Request::parse(&text) {
                        Ok(request) => self.dispatch(&request),
                        Err(err) => {
                            warn!("malformed request from {}: {err}", conn.peer);
                            Response::with_status(400)
                        }
                    };
                    conn.stream.write_all(response.marshal().as_bytes())?;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => return Err(Error::Io(err)),
        }
        Ok(true)
    }

    fn dispatch(&mut self, request: &Request) -> Response {
        debug!("{} {}", request.method, request.target);
        let response = match request.method.as_str() {
            "OPTIONS" => Response::with_status(200),
            "DESCRIBE" => self.cmd_describe(request),
            "SETUP" => self.cmd_setup(request),
            "ANNOUNCE" => self.cmd_announce(request),
            "PLAY" => Response::with_status(200),
            other => {
                debug!("unrecognized method {other}");
                Response::with_status(404)
            }
        };
        match request.options.cseq() {
            Some(cseq) => response.option(OPTION_CSEQ, cseq),
            None => response,
        }
    }

    /// Capability hints the client folds into its ANNOUNCE.
    fn cmd_describe(&self, _request: &Request) -> Response {
        let mut payload = String::new();
        if self.settings.hevc_supported {
            payload.push_str("sprop-parameter-sets=AAAAAU\n");
        }
        payload.push_str("a=fmtp:97 surround-params=");
        payload.push_str(&self.settings.surround_params);
        payload.push('\n');
        Response::with_status(200).with_payload(payload)
    }

    // A full table is reported before the target is even looked at.
    fn cmd_setup(&self, request: &Request) -> Response {
        if self.manager.active_len() >= self.manager.capacity() {
            return Response::with_status(503);
        }
        let Some(substream) = substream_of(&request.target) else {
            return Response::with_status(404);
        };
        let response = Response::with_status(200);
        if substream == "audio" {
            // The client echoes this on later commands; value is opaque.
            let id = rand::rng().random::<u64>() & 0xFFFF_FFFF_FFFF;
            response.option(OPTION_SESSION, format!("{id:012X};timeout = 90"))
        } else {
            response
        }
    }

    /// Builds the session: parse and validate the payload, claim the
    /// pending launch, fill a slot, spawn the workers. The response tells
    /// the client which ports the slot bound.
    fn cmd_announce(&mut self, request: &Request) -> Response {
        let mut sdp = SessionDescription::parse(&request.payload);
        let config = match SessionConfig::from_announce(&mut sdp, &self.settings) {
            Ok(config) => config,
            Err(err) => {
                warn!("rejecting ANNOUNCE: {err}");
                return Response::with_status(status_for(&err));
            }
        };
        info!(
            "ANNOUNCE from {}: {}x{} at {} fps, {} kbps",
            sdp.client_name.as_deref().unwrap_or("unknown client"),
            config.width,
            config.height,
            config.framerate,
            config.bitrate_kbps
        );

        let result = self.manager.allocate_with(|slot| {
            let launch = self
                .collaborators
                .provider
                .take_pending_launch()
                .ok_or(Error::ErrNoPendingLaunch)?;
            Session::spawn(
                slot,
                config,
                launch,
                &self.settings,
                &self.collaborators.factory,
                &self.collaborators.monitor,
                &self.collaborators.input,
            )
        });
        match result {
            Ok((_, ports)) => Response::with_status(200)
                .option("Video-Port", ports.video.to_string())
                .option("Control-Port", ports.control.to_string())
                .option("Audio-Port", ports.audio.to_string()),
            Err(err) => {
                warn!("ANNOUNCE failed: {err}");
                Response::with_status(status_for(&err))
            }
        }
    }
}

/// `streamid=<name>` anywhere in the SETUP target picks the substream.
fn substream_of(target: &str) -> Option<&str> {
    let (_, rest) = target.split_once("streamid=")?;
    let name = rest.split(['/', '?']).next().unwrap_or(rest);
    SUBSTREAMS.contains(&name).then_some(name)
}

fn status_for(err: &Error) -> u16 {
    match err {
        Error::Rtsp(_) | Error::ErrVideoFormatDisabled => 400,
        Error::ErrNoFreeSlot | Error::ErrNoPendingLaunch => 503,
        _ => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substream_names_recognized() {
        assert_eq!(
            substream_of("rtsp://10.0.0.17:48010/streamid=video"),
            Some("video")
        );
        assert_eq!(substream_of("streamid=audio/0/0"), Some("audio"));
        assert_eq!(substream_of("streamid=control/13/0"), Some("control"));
        assert_eq!(substream_of("streamid=garbage"), None);
        assert_eq!(substream_of("rtsp://10.0.0.17:48010/"), None);
    }

    #[test]
    fn error_statuses_follow_taxonomy() {
        assert_eq!(
            status_for(&Error::Rtsp(rtsp::Error::ErrMissingAttribute("k".into()))),
            400
        );
        assert_eq!(status_for(&Error::ErrVideoFormatDisabled), 400);
        assert_eq!(status_for(&Error::ErrNoFreeSlot), 503);
        assert_eq!(status_for(&Error::ErrNoPendingLaunch), 503);
        assert_eq!(status_for(&Error::ErrCapture("gone".into())), 500);
    }
}
