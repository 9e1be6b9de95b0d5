//! Per-client session state and worker threads.
//!
//! A session owns three UDP sockets and five threads grouped into three
//! units: the video unit (capture+encode pump, FEC transmit), the audio
//! unit (pump, transmit), and the feedback loop. The units communicate
//! only through the bounded queues and the refresh event; stopping those
//! is the one cancellation primitive, and the manager joins the threads
//! afterwards from the accept loop.

pub mod manager;

use std::fmt;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use log::warn;

use crate::config::{SessionConfig, Settings, SlotPorts};
use crate::control::{self, FeedbackContext};
use crate::crypto::InputCipher;
use crate::error::{Error, Result};
use crate::launch::{InputSink, PendingLaunch, ProcessMonitor};
use crate::media::{EncodedFrame, MediaFactory, RefreshRequest};
use crate::stream;
use crate::sync::{Event, PacketQueue};

// Frames in flight between encode and transmit; deep queues only add
// latency.
const VIDEO_QUEUE_DEPTH: usize = 8;
const AUDIO_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SessionState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst)
    }
}

/// State every worker thread of one session can reach.
pub(crate) struct SessionShared {
    pub(crate) state: StateCell,
    pub(crate) video_queue: Arc<PacketQueue<EncodedFrame>>,
    pub(crate) audio_queue: Arc<PacketQueue<Bytes>>,
    pub(crate) refresh: Event<RefreshRequest>,
}

impl SessionShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(SessionShared {
            state: StateCell::new(SessionState::Starting),
            video_queue: PacketQueue::new(VIDEO_QUEUE_DEPTH),
            audio_queue: PacketQueue::new(AUDIO_QUEUE_DEPTH),
            refresh: Event::new(),
        })
    }

    /// Enters `Stopping` and wakes everything blocked on a queue or the
    /// refresh event. Idempotent; any thread may call it.
    pub(crate) fn stop(&self) {
        if self.state.load() != SessionState::Stopped {
            self.state.store(SessionState::Stopping);
        }
        self.video_queue.stop();
        self.audio_queue.stop();
        self.refresh.stop();
    }

    pub(crate) fn is_stopping(&self) -> bool {
        matches!(
            self.state.load(),
            SessionState::Stopping | SessionState::Stopped
        )
    }

    /// Raises a repair request, merging with any unconsumed one so a
    /// pending keyframe is never downgraded to a range invalidation.
    pub(crate) fn raise_refresh(&self, request: RefreshRequest) {
        self.refresh.raise_with(|pending| match pending {
            Some(pending) => pending.merge(request),
            None => request,
        });
    }
}

/// A live session occupying one manager slot.
pub struct Session {
    shared: Arc<SessionShared>,
    config: SessionConfig,
    ports: SlotPorts,
    app_id: Option<u32>,
    threads: Vec<JoinHandle<()>>,
}

impl Session {
    /// Binds the slot's socket triple, opens the capture backends, and
    /// spawns the worker threads. On success the session is `Running`;
    /// nothing is transmitted until the client's post-PLAY PING reveals
    /// where to send.
    pub fn spawn(
        slot: usize,
        config: SessionConfig,
        launch: PendingLaunch,
        settings: &Settings,
        factory: &Arc<dyn MediaFactory>,
        monitor: &Arc<dyn ProcessMonitor>,
        input: &Arc<dyn InputSink>,
    ) -> Result<Session> {
        let poll = settings.poll_interval();
        let ping_timeout = settings.ping_timeout;
        let requested = settings.slot_ports(slot);

        let video_socket = UdpSocket::bind((settings.address, requested.video))?;
        let control_socket = UdpSocket::bind((settings.address, requested.control))?;
        let audio_socket = UdpSocket::bind((settings.address, requested.audio))?;
        for socket in [&video_socket, &control_socket, &audio_socket] {
            socket.set_read_timeout(Some(poll))?;
        }
        let ports = SlotPorts {
            video: video_socket.local_addr()?.port(),
            control: control_socket.local_addr()?.port(),
            audio: audio_socket.local_addr()?.port(),
        };

        let (video_source, video_encoder) = factory.open_video(&config)?;
        let audio_source = factory.open_audio(&config)?;
        let cipher = InputCipher::new(launch.credentials.key, launch.credentials.iv);

        let shared = SessionShared::new();
        let mut threads = Vec::with_capacity(5);
        let spawned = Self::spawn_workers(
            slot,
            &mut threads,
            &shared,
            &config,
            SpawnParts {
                video_socket,
                control_socket,
                audio_socket,
                video_source,
                video_encoder,
                audio_source,
                cipher,
                monitor: Arc::clone(monitor),
                input: Arc::clone(input),
                app_id: launch.app_id,
                poll,
                ping_timeout,
            },
        );
        if let Err(err) = spawned {
            shared.stop();
            for handle in threads {
                let _ = handle.join();
            }
            return Err(err);
        }

        shared.state.store(SessionState::Running);
        Ok(Session {
            shared,
            config,
            ports,
            app_id: launch.app_id,
            threads,
        })
    }

    fn spawn_workers(
        slot: usize,
        threads: &mut Vec<JoinHandle<()>>,
        shared: &Arc<SessionShared>,
        config: &SessionConfig,
        parts: SpawnParts,
    ) -> Result<()> {
        let frame_deadline =
            Duration::from_millis(u64::from(1000 / config.framerate.max(1))).max(Duration::from_millis(1));
        let packet_deadline =
            Duration::from_millis(u64::from(config.packet_duration.max(1)));

        let worker = |name: String, body: Box<dyn FnOnce() + Send>| {
            thread::Builder::new()
                .name(name)
                .spawn(body)
                .map_err(Error::Io)
        };

        let pump_shared = Arc::clone(shared);
        let (source, encoder) = (parts.video_source, parts.video_encoder);
        threads.push(worker(
            format!("video-pump-{slot}"),
            Box::new(move || stream::video::pump_loop(&pump_shared, source, encoder, frame_deadline)),
        )?);

        let tx_shared = Arc::clone(shared);
        let tx_config = config.clone();
        let (socket, poll, ping) = (parts.video_socket, parts.poll, parts.ping_timeout);
        threads.push(worker(
            format!("video-tx-{slot}"),
            Box::new(move || stream::video::transmit_loop(&tx_shared, socket, &tx_config, poll, ping)),
        )?);

        let pump_shared = Arc::clone(shared);
        let source = parts.audio_source;
        threads.push(worker(
            format!("audio-pump-{slot}"),
            Box::new(move || stream::audio::pump_loop(&pump_shared, source, packet_deadline)),
        )?);

        let tx_shared = Arc::clone(shared);
        let (socket, poll, ping) = (parts.audio_socket, parts.poll, parts.ping_timeout);
        threads.push(worker(
            format!("audio-tx-{slot}"),
            Box::new(move || stream::audio::transmit_loop(&tx_shared, socket, poll, ping)),
        )?);

        let feedback_shared = Arc::clone(shared);
        let ctx = FeedbackContext {
            socket: parts.control_socket,
            cipher: parts.cipher,
            monitor: parts.monitor,
            input: parts.input,
            app_id: parts.app_id,
            ping_timeout: parts.ping_timeout,
        };
        threads.push(worker(
            format!("feedback-{slot}"),
            Box::new(move || control::feedback_loop(&feedback_shared, ctx)),
        )?);

        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Requests teardown; the threads unwind on their next poll.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// The ports this session actually bound, advertised to the client in
    /// the ANNOUNCE response.
    pub fn ports(&self) -> SlotPorts {
        self.ports
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn app_id(&self) -> Option<u32> {
        self.app_id
    }

    /// Joins every worker thread. Callers stop the session first; joining
    /// a running session blocks until something else stops it.
    pub(crate) fn join(mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("session worker panicked during teardown");
            }
        }
        self.shared.state.store(SessionState::Stopped);
    }
}

struct SpawnParts {
    video_socket: UdpSocket,
    control_socket: UdpSocket,
    audio_socket: UdpSocket,
    video_source: Box<dyn crate::media::VideoSource>,
    video_encoder: Box<dyn crate::media::VideoEncoder>,
    audio_source: Box<dyn crate::media::AudioSource>,
    cipher: InputCipher,
    monitor: Arc<dyn ProcessMonitor>,
    input: Arc<dyn InputSink>,
    app_id: Option<u32>,
    poll: Duration,
    ping_timeout: Duration,
}
