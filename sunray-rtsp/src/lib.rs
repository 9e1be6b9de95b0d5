#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Text codec for the RTSP-style control protocol: request/response
//! grammar, chunk reassembly for requests whose payload is still in
//! flight, and the SDP-like ANNOUNCE session description.

pub mod announce;
pub mod assembler;
pub mod error;
pub mod message;

pub use announce::SessionDescription;
pub use assembler::MessageAssembler;
pub use error::{Error, Result};
pub use message::{Request, Response, VERSION};
