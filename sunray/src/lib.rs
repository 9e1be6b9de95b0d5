#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Session engine for a low-latency game-streaming host.
//!
//! The engine accepts a control connection, negotiates per-session
//! parameters over an RTSP-like protocol, and runs the media pipeline:
//! capture and encode through collaborator traits, Reed-Solomon parity
//! over every video frame, datagram transmit, and a feedback channel
//! that reacts to client loss reports, keyframe requests, and encrypted
//! input.
//!
//! Sessions live in a fixed-capacity slot table. Each one owns a UDP
//! port triple and five worker threads; bounded queues and a last-value
//! refresh event are the only links between them, and stopping those is
//! the single teardown primitive.

pub mod config;
mod control;
pub mod crypto;
pub mod error;
pub mod launch;
pub mod media;
pub mod server;
pub mod session;
mod stream;
pub mod sync;

pub use config::{SessionConfig, Settings, SlotPorts};
pub use error::{Error, Result};
pub use launch::{
    CredentialsProvider, InputSink, LaunchCredentials, LaunchQueue, PendingLaunch, ProcessMonitor,
};
pub use media::{
    AudioSource, CaptureStatus, CapturedFrame, EncodedFrame, MediaFactory, RefreshRequest,
    VideoEncoder, VideoSource,
};
pub use server::{Collaborators, RtspServer};
pub use session::manager::SessionManager;
pub use session::{Session, SessionState};
