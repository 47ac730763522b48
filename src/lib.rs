pub mod bridge;
pub mod config;
pub mod core;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use bridge::{SessionBridge, SessionHandle, SessionReport, SessionSettings};
pub use config::ServerConfig;
pub use crate::core::{ConversationBackend, SentenceSegmenter, StreamFormat, Synthesizer};
pub use state::AppState;
