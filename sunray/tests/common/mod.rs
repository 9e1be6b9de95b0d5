#![allow(dead_code)]

//! Shared harness for the integration tests: synthetic capture backends,
//! a recording input sink, and a client for the control protocol.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use rtsp::message::{OPTION_CSEQ, Request, Response};
use rtsp::MessageAssembler;
use wire::PING_PAYLOAD;
use wire::feedback::{FeedbackMessage, Termination};

use sunray::{
    AudioSource, CaptureStatus, CapturedFrame, Collaborators, CredentialsProvider, EncodedFrame,
    InputSink, LaunchCredentials, LaunchQueue, MediaFactory, PendingLaunch, ProcessMonitor,
    RefreshRequest, Result, RtspServer, SessionConfig, SessionManager, Settings, VideoEncoder,
    VideoSource,
};

pub const FRAME_LEN: usize = 4000;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(5);

/// Deterministic payload for frame `index`, so receivers can verify
/// reconstruction byte for byte.
pub fn frame_payload(index: u32, len: usize) -> Bytes {
    let seed = index.wrapping_mul(31) as u8;
    Bytes::from((0..len).map(|i| seed.wrapping_add(i as u8)).collect::<Vec<u8>>())
}

pub fn audio_chunk(index: u32) -> Bytes {
    Bytes::from(vec![index as u8; 64])
}

struct TestVideoSource {
    counter: u32,
    reinits_left: u32,
}

impl VideoSource for TestVideoSource {
    fn capture_frame(&mut self, _timeout: Duration) -> Result<CaptureStatus<CapturedFrame>> {
        if self.reinits_left > 0 {
            self.reinits_left -= 1;
            return Ok(CaptureStatus::Reinit);
        }
        thread::sleep(FRAME_INTERVAL);
        self.counter += 1;
        Ok(CaptureStatus::Captured(CapturedFrame {
            data: frame_payload(self.counter, FRAME_LEN),
        }))
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Passthrough encoder that records every refresh request it applies.
struct TestEncoder {
    keyframes: Arc<AtomicU32>,
    invalidations: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl VideoEncoder for TestEncoder {
    fn encode(
        &mut self,
        frame: CapturedFrame,
        frame_index: u32,
        refresh: Option<RefreshRequest>,
    ) -> Result<EncodedFrame> {
        let keyframe = match refresh {
            Some(RefreshRequest::Keyframe) => {
                self.keyframes.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(RefreshRequest::Invalidate { first, last }) => {
                self.invalidations.lock().push((first, last));
                false
            }
            None => false,
        };
        Ok(EncodedFrame { frame_index, keyframe, data: frame.data })
    }
}

struct TestAudioSource {
    counter: u32,
}

impl AudioSource for TestAudioSource {
    fn capture_packet(&mut self, _timeout: Duration) -> Result<CaptureStatus<Bytes>> {
        thread::sleep(FRAME_INTERVAL);
        self.counter += 1;
        Ok(CaptureStatus::Captured(audio_chunk(self.counter)))
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

struct TestMediaFactory {
    video_reinits: u32,
    keyframes: Arc<AtomicU32>,
    invalidations: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl MediaFactory for TestMediaFactory {
    fn open_video(
        &self,
        _config: &SessionConfig,
    ) -> Result<(Box<dyn VideoSource>, Box<dyn VideoEncoder>)> {
        Ok((
            Box::new(TestVideoSource { counter: 0, reinits_left: self.video_reinits }),
            Box::new(TestEncoder {
                keyframes: Arc::clone(&self.keyframes),
                invalidations: Arc::clone(&self.invalidations),
            }),
        ))
    }

    fn open_audio(&self, _config: &SessionConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(TestAudioSource { counter: 0 }))
    }
}

struct TestMonitor {
    running: Arc<AtomicBool>,
}

impl ProcessMonitor for TestMonitor {
    fn is_running(&self, _app_id: u32) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingInput {
    received: Mutex<Vec<Vec<u8>>>,
}

impl RecordingInput {
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }
}

impl InputSink for RecordingInput {
    fn submit(&self, payload: &[u8]) {
        self.received.lock().push(payload.to_vec());
    }
}

/// A host running on loopback with ephemeral ports and synthetic media.
pub struct TestHost {
    pub addr: SocketAddr,
    pub manager: Arc<SessionManager>,
    pub launches: Arc<LaunchQueue>,
    pub input: Arc<RecordingInput>,
    pub app_running: Arc<AtomicBool>,
    pub keyframes: Arc<AtomicU32>,
    pub invalidations: Arc<Mutex<Vec<(u32, u32)>>>,
    running: Arc<AtomicBool>,
    serve_thread: Option<JoinHandle<()>>,
}

impl TestHost {
    pub fn start(settings: Settings) -> TestHost {
        TestHost::start_with(settings, 0)
    }

    pub fn start_with(mut settings: Settings, video_reinits: u32) -> TestHost {
        let _ = env_logger::builder().is_test(true).try_init();
        settings.address = IpAddr::from([127, 0, 0, 1]);
        settings.rtsp_port = 0;
        settings.video_port = 0;
        settings.control_port = 0;
        settings.audio_port = 0;

        let keyframes = Arc::new(AtomicU32::new(0));
        let invalidations = Arc::new(Mutex::new(Vec::new()));
        let launches = Arc::new(LaunchQueue::new());
        let input = Arc::new(RecordingInput::default());
        let app_running = Arc::new(AtomicBool::new(true));

        let collaborators = Collaborators {
            provider: Arc::clone(&launches) as Arc<dyn CredentialsProvider>,
            factory: Arc::new(TestMediaFactory {
                video_reinits,
                keyframes: Arc::clone(&keyframes),
                invalidations: Arc::clone(&invalidations),
            }),
            monitor: Arc::new(TestMonitor { running: Arc::clone(&app_running) }),
            input: Arc::clone(&input) as Arc<dyn InputSink>,
        };

        let mut server = RtspServer::bind(settings, collaborators).expect("bind test host");
        let addr = server.local_addr().expect("rtsp local addr");
        let manager = server.manager();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let serve_thread = thread::spawn(move || {
            server.serve(&flag).expect("serve loop");
        });

        TestHost {
            addr,
            manager,
            launches,
            input,
            app_running,
            keyframes,
            invalidations,
            running,
            serve_thread: Some(serve_thread),
        }
    }

    /// Parks a launch with fresh credentials, as the pairing flow would.
    pub fn park_launch(&self) -> LaunchCredentials {
        let credentials = LaunchCredentials::random();
        self.launches.park(PendingLaunch::new(credentials.clone()));
        credentials
    }

    pub fn park_launch_with_app(&self, app_id: u32) -> LaunchCredentials {
        let credentials = LaunchCredentials::random();
        self.launches
            .park(PendingLaunch::with_app(credentials.clone(), app_id));
        credentials
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.serve_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Control-protocol client talking to a [`TestHost`].
pub struct RtspClient {
    stream: TcpStream,
    assembler: MessageAssembler,
    cseq: u32,
}

impl RtspClient {
    pub fn connect(addr: SocketAddr) -> RtspClient {
        let stream = TcpStream::connect(addr).expect("connect control port");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set control read timeout");
        RtspClient { stream, assembler: MessageAssembler::new(), cseq: 0 }
    }

    /// Picks up a connection whose bytes were written by hand.
    pub fn resume(stream: TcpStream) -> RtspClient {
        RtspClient { stream, assembler: MessageAssembler::new(), cseq: 0 }
    }

    pub fn request(&mut self, request: Request) -> Response {
        self.cseq += 1;
        let request = request.option(OPTION_CSEQ, self.cseq.to_string());
        self.stream
            .write_all(request.marshal().as_bytes())
            .expect("send request");
        let response = self.read_response();
        assert_eq!(
            response.options.cseq(),
            Some(self.cseq.to_string().as_str()),
            "response must echo the request CSeq"
        );
        response
    }

    pub fn read_response(&mut self) -> Response {
        loop {
            if let Some(raw) = self.assembler.next_message() {
                let text = String::from_utf8(raw).expect("utf-8 response");
                return Response::parse(&text).expect("parse response");
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).expect("read response");
            assert!(n > 0, "server closed the connection mid-response");
            self.assembler.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

pub fn announce_payload(packet_size: usize) -> String {
    [
        "s=loopback-test".to_string(),
        "a=x-nv-audio.surround.numChannels:2".to_string(),
        "a=x-nv-audio.surround.channelMask:3".to_string(),
        format!("a=x-nv-video[0].packetSize:{packet_size}"),
        "a=x-nv-video[0].clientViewportWd:1920".to_string(),
        "a=x-nv-video[0].clientViewportHt:1080".to_string(),
        "a=x-nv-video[0].maxFPS:60".to_string(),
        "a=x-nv-vqos[0].bw.maximumBitrateKbps:20000".to_string(),
        "a=x-nv-video[0].videoEncoderSlicesPerFrame:1".to_string(),
        "a=x-nv-video[0].maxNumReferenceFrames:1".to_string(),
    ]
    .join("\n")
}

pub fn announce_request(payload: String) -> Request {
    Request::new("ANNOUNCE", "rtsp://sunray/streamid=0").with_payload(payload)
}

#[derive(Debug, Clone, Copy)]
pub struct StreamPorts {
    pub video: u16,
    pub control: u16,
    pub audio: u16,
}

/// Runs the full command sequence a client performs before streaming and
/// returns the media ports the ANNOUNCE response advertised.
pub fn establish_session(client: &mut RtspClient, packet_size: usize) -> StreamPorts {
    let response = client.request(Request::new("OPTIONS", "rtsp://sunray"));
    assert_eq!(response.status, 200);
    let response = client.request(Request::new("DESCRIBE", "rtsp://sunray"));
    assert_eq!(response.status, 200);
    for substream in ["audio", "video", "control"] {
        let target = format!("rtsp://sunray/streamid={substream}/0/0");
        let response = client.request(Request::new("SETUP", &target));
        assert_eq!(response.status, 200, "SETUP {substream}");
    }
    let response = client.request(announce_request(announce_payload(packet_size)));
    assert_eq!(response.status, 200, "ANNOUNCE");
    let port = |name: &str| -> u16 {
        response
            .options
            .get(name)
            .unwrap_or_else(|| panic!("missing {name} option"))
            .parse()
            .expect("port number")
    };
    let ports = StreamPorts {
        video: port("Video-Port"),
        control: port("Control-Port"),
        audio: port("Audio-Port"),
    };
    let response = client.request(Request::new("PLAY", "rtsp://sunray/streamid=video"));
    assert_eq!(response.status, 200);
    ports
}

/// Media-plane client: pings the media ports to reveal its address and
/// talks on the feedback channel.
pub struct StreamClient {
    pub video: UdpSocket,
    pub control: UdpSocket,
    pub audio: UdpSocket,
}

impl StreamClient {
    pub fn connect(ports: StreamPorts) -> StreamClient {
        let open = |port: u16| -> UdpSocket {
            let socket = UdpSocket::bind("127.0.0.1:0").expect("bind media socket");
            socket
                .connect(("127.0.0.1", port))
                .expect("connect media socket");
            socket
                .set_read_timeout(Some(Duration::from_secs(2)))
                .expect("set media read timeout");
            socket
        };
        let video = open(ports.video);
        let control = open(ports.control);
        let audio = open(ports.audio);
        video.send(PING_PAYLOAD).expect("video ping");
        audio.send(PING_PAYLOAD).expect("audio ping");
        control
            .send(&FeedbackMessage::PeriodicPing.marshal())
            .expect("first feedback ping");
        StreamClient { video, control, audio }
    }

    pub fn feedback(&self, message: &FeedbackMessage) {
        self.control.send(&message.marshal()).expect("send feedback");
    }

    /// Waits for the server's termination notice on the feedback socket.
    pub fn recv_termination(&self, timeout: Duration) -> Option<Termination> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        while Instant::now() < deadline {
            match self.control.recv(&mut buf) {
                Ok(n) => {
                    if let Ok(notice) = Termination::unmarshal(&Bytes::copy_from_slice(&buf[..n])) {
                        return Some(notice);
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }
}

/// Polls `cond` until it holds or `deadline` passes.
pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= end {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
