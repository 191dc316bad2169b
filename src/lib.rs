//! kvm-coordinator - session/capture/signalling coordinator for a headless
//! WebRTC remote-desktop server.
//!
//! This crate owns the hard part of the system: multiplexing real-time
//! media samples to many concurrent viewers while keeping a replicated
//! host/lock/ban state machine consistent across them. The display/input
//! backend, the media pipeline runtime and the WebRTC transport are all
//! treated as external collaborators behind narrow trait boundaries
//! (`desktop::Desktop`, `pipeline::{SinkPipeline, SourcePipeline}`,
//! the `webrtc` module).

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod desktop;
pub mod error;
pub mod ids;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
