use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use log::{info, warn};

use rtsp::message::OPTION_CSEQ;
use rtsp::{MessageAssembler, Request, Response};
use wire::feedback::FeedbackMessage;
use wire::video::{FLAG_SOF, VideoPacket};
use wire::{AudioPacket, PING_PAYLOAD};

#[derive(Parser)]
#[command(name = "stream-client")]
#[command(version = "0.1.0")]
#[command(about = "A minimal client for the streaming-host demo")]
struct Cli {
    #[arg(short, long, default_value_t = format!("127.0.0.1:48010"))]
    server: String,
    #[arg(short, long, default_value_t = 10)]
    duration_secs: u64,
}

struct ControlClient {
    stream: TcpStream,
    assembler: MessageAssembler,
    cseq: u32,
}

impl ControlClient {
    fn connect(addr: SocketAddr) -> std::io::Result<ControlClient> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(ControlClient { stream, assembler: MessageAssembler::new(), cseq: 0 })
    }

    fn request(&mut self, request: Request) -> std::io::Result<Response> {
        self.cseq += 1;
        let request = request.option(OPTION_CSEQ, self.cseq.to_string());
        self.stream.write_all(request.marshal().as_bytes())?;
        loop {
            if let Some(raw) = self.assembler.next_message() {
                let text = String::from_utf8(raw)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                return Response::parse(&text)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e));
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            self.assembler.extend_from_slice(&chunk[..n]);
        }
    }
}

const ANNOUNCE_PAYLOAD: &str = "\
s=stream-client\r
a=x-nv-audio.surround.numChannels:2\r
a=x-nv-audio.surround.channelMask:3\r
a=x-nv-video[0].packetSize:1024\r
a=x-nv-video[0].clientViewportWd:1920\r
a=x-nv-video[0].clientViewportHt:1080\r
a=x-nv-video[0].maxFPS:60\r
a=x-nv-vqos[0].bw.maximumBitrateKbps:20000\r
a=x-nv-video[0].videoEncoderSlicesPerFrame:1\r
a=x-nv-video[0].maxNumReferenceFrames:1\r
";

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let server: SocketAddr = SocketAddr::from_str(&cli.server)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut control = ControlClient::connect(server)?;

    for (method, target) in [
        ("OPTIONS", "rtsp://sunray"),
        ("DESCRIBE", "rtsp://sunray"),
        ("SETUP", "rtsp://sunray/streamid=audio/0/0"),
        ("SETUP", "rtsp://sunray/streamid=video/0/0"),
        ("SETUP", "rtsp://sunray/streamid=control/13/0"),
    ] {
        let response = control.request(Request::new(method, target))?;
        info!("{method} -> {}", response.status);
    }

    let announce = Request::new("ANNOUNCE", "rtsp://sunray/streamid=0")
        .with_payload(ANNOUNCE_PAYLOAD);
    let response = control.request(announce)?;
    info!("ANNOUNCE -> {}", response.status);
    if response.status != 200 {
        warn!("host refused the session (is a launch parked?)");
        return Ok(());
    }
    let port = |name: &str| -> u16 {
        response
            .options
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    let (video_port, control_port, audio_port) =
        (port("Video-Port"), port("Control-Port"), port("Audio-Port"));
    info!("media ports: video {video_port} control {control_port} audio {audio_port}");

    let response = control.request(Request::new("PLAY", "rtsp://sunray/streamid=video"))?;
    info!("PLAY -> {}", response.status);

    let open = |port: u16| -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((server.ip(), port))?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        Ok(socket)
    };
    let video = open(video_port)?;
    let feedback = open(control_port)?;
    let audio = open(audio_port)?;
    video.send(PING_PAYLOAD)?;
    audio.send(PING_PAYLOAD)?;
    feedback.send(&FeedbackMessage::StartA.marshal())?;
    feedback.send(&FeedbackMessage::StartB.marshal())?;

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).expect("ctrl-c handler");

    let video_counter = thread::spawn({
        let done = Arc::clone(&done);
        move || {
            let mut buf = [0u8; 2048];
            let (mut shards, mut frames) = (0u64, 0u64);
            while !done.load(Ordering::SeqCst) {
                match video.recv(&mut buf) {
                    Ok(n) => {
                        shards += 1;
                        if let Ok(packet) = VideoPacket::unmarshal(&Bytes::copy_from_slice(&buf[..n]))
                        {
                            if packet.header.flags & FLAG_SOF != 0 {
                                frames += 1;
                            }
                        }
                    }
                    Err(_) => {}
                }
            }
            (shards, frames)
        }
    });
    let audio_counter = thread::spawn({
        let done = Arc::clone(&done);
        move || {
            let mut buf = [0u8; 2048];
            let mut packets = 0u64;
            while !done.load(Ordering::SeqCst) {
                if let Ok(n) = audio.recv(&mut buf) {
                    if AudioPacket::unmarshal(&Bytes::copy_from_slice(&buf[..n])).is_ok() {
                        packets += 1;
                    }
                }
            }
            packets
        }
    });

    let deadline = Instant::now() + Duration::from_secs(cli.duration_secs);
    while Instant::now() < deadline && !done.load(Ordering::SeqCst) {
        feedback.send(&FeedbackMessage::PeriodicPing.marshal())?;
        thread::sleep(Duration::from_millis(500));
    }
    done.store(true, Ordering::SeqCst);

    let (shards, frames) = video_counter.join().expect("video counter");
    let packets = audio_counter.join().expect("audio counter");
    info!("received {frames} video frames as {shards} shards, {packets} audio packets");
    Ok(())
}
