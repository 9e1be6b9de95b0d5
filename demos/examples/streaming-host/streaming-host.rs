use std::io::Write;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use log::info;

use sunray::{
    AudioSource, CaptureStatus, CapturedFrame, Collaborators, CredentialsProvider, EncodedFrame,
    InputSink, LaunchCredentials, LaunchQueue, MediaFactory, PendingLaunch, ProcessMonitor,
    RefreshRequest, Result, RtspServer, SessionConfig, Settings, VideoEncoder, VideoSource,
};

#[derive(Parser)]
#[command(name = "streaming-host")]
#[command(version = "0.1.0")]
#[command(about = "A loopback streaming host with synthetic capture backends")]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!("0.0.0.0"))]
    address: String,
    #[arg(short, long, default_value_t = 48010)]
    rtsp_port: u16,
    #[arg(short, long, default_value_t = 1)]
    capacity: usize,
    #[arg(short, long, default_value_t = 20)]
    fec_percentage: u8,
}

/// Synthetic capture: a moving gradient, one "frame" per capture call.
struct PatternSource {
    frame_len: usize,
    interval: Duration,
    counter: u32,
}

impl VideoSource for PatternSource {
    fn capture_frame(&mut self, _timeout: Duration) -> Result<CaptureStatus<CapturedFrame>> {
        thread::sleep(self.interval);
        self.counter = self.counter.wrapping_add(1);
        let seed = self.counter as u8;
        let data: Vec<u8> = (0..self.frame_len)
            .map(|i| seed.wrapping_add((i % 251) as u8))
            .collect();
        Ok(CaptureStatus::Captured(CapturedFrame { data: Bytes::from(data) }))
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Passthrough encoder: the "bitstream" is the captured buffer itself.
struct PassthroughEncoder;

impl VideoEncoder for PassthroughEncoder {
    fn encode(
        &mut self,
        frame: CapturedFrame,
        frame_index: u32,
        refresh: Option<RefreshRequest>,
    ) -> Result<EncodedFrame> {
        let keyframe = matches!(refresh, Some(RefreshRequest::Keyframe));
        if let Some(request) = refresh {
            info!("frame {frame_index}: applying {request:?}");
        }
        Ok(EncodedFrame { frame_index, keyframe, data: frame.data })
    }
}

/// Synthetic audio: a fixed-size chunk per packet duration.
struct ToneSource {
    interval: Duration,
    counter: u32,
}

impl AudioSource for ToneSource {
    fn capture_packet(&mut self, _timeout: Duration) -> Result<CaptureStatus<Bytes>> {
        thread::sleep(self.interval);
        self.counter = self.counter.wrapping_add(1);
        Ok(CaptureStatus::Captured(Bytes::from(vec![self.counter as u8; 160])))
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

struct SyntheticMedia;

impl MediaFactory for SyntheticMedia {
    fn open_video(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn VideoSource>, Box<dyn VideoEncoder>)> {
        let interval = Duration::from_millis(u64::from(1000 / config.framerate.max(1)));
        let source = PatternSource {
            frame_len: (config.width * config.height / 256) as usize,
            interval,
            counter: 0,
        };
        Ok((Box::new(source), Box::new(PassthroughEncoder)))
    }

    fn open_audio(&self, config: &SessionConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(ToneSource {
            interval: Duration::from_millis(u64::from(config.packet_duration.max(1))),
            counter: 0,
        }))
    }
}

/// No companion application in the demo; sessions never stop for it.
struct AlwaysRunning;

impl ProcessMonitor for AlwaysRunning {
    fn is_running(&self, _app_id: u32) -> bool {
        true
    }
}

struct LoggingInput;

impl InputSink for LoggingInput {
    fn submit(&self, payload: &[u8]) {
        info!("input event, {} bytes", payload.len());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, if cli.debug { log::LevelFilter::Debug } else { log_level })
        .init();

    let mut settings = Settings {
        rtsp_port: cli.rtsp_port,
        capacity: cli.capacity,
        fec_percentage: cli.fec_percentage,
        ..Settings::default()
    };
    if let Ok(address) = IpAddr::from_str(&cli.address) {
        settings.address = address;
    }

    // A real host parks a launch when the pairing flow approves a client.
    // The demo parks one per slot up front with printed credentials so the
    // stream-client demo can encrypt input against them.
    let launches = Arc::new(LaunchQueue::new());
    for slot in 0..settings.capacity {
        let credentials = LaunchCredentials::random();
        println!(
            "slot {slot}: input key {} iv {}",
            hex(&credentials.key),
            hex(&credentials.iv)
        );
        launches.park(PendingLaunch::new(credentials));
    }

    let collaborators = Collaborators {
        provider: Arc::clone(&launches) as Arc<dyn CredentialsProvider>,
        factory: Arc::new(SyntheticMedia),
        monitor: Arc::new(AlwaysRunning),
        input: Arc::new(LoggingInput),
    };

    let mut server = RtspServer::bind(settings, collaborators)?;
    info!("streaming host ready on {}", server.local_addr()?);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("shutting down");
        flag.store(false, Ordering::SeqCst);
    })
    .expect("install ctrl-c handler");

    server.serve(&running)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
