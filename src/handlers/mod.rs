//! HTTP, WebSocket and TCP handlers
//!
//! - `api` - Health check endpoint
//! - `webrtc` - Browser signaling WebSocket
//! - `audiosocket` - Telephony TCP listener

pub mod api;
pub mod audiosocket;
pub mod webrtc;

pub use audiosocket::serve_audiosocket;
pub use webrtc::webrtc_handler;
