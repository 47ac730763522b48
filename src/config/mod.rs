//! Configuration module for the voice bridge
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use voice_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::bridge::SessionSettings;
use crate::core::audiosocket;
use crate::core::conversation::{AudioEncoding, StreamFormat};
use crate::core::segmenter::{BackpressurePolicy, DEFAULT_QUEUE_CAPACITY, SegmenterConfig};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BACKEND_URL: &str = "ws://localhost:9000/v1/talk";
pub const DEFAULT_BACKEND_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 10000;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;
/// 60 ms of 16 kHz 16-bit mono audio
pub const DEFAULT_WEBRTC_MIN_CHUNK_BYTES: usize = 1920;
pub const DEFAULT_WEBRTC_SAMPLE_RATE: u32 = 16000;
/// 60 ms of 8 kHz 16-bit mono audio
pub const DEFAULT_AUDIOSOCKET_MIN_CHUNK_BYTES: usize = 960;

/// Server configuration
///
/// Contains everything needed to run the bridge:
/// - HTTP listener settings
/// - Conversation backend endpoint and credentials
/// - Session timing
/// - Per-transport media settings (browser and telephony)
/// - Sentence segmenter and optional downstream synthesizer
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Conversation backend
    pub backend_url: String,
    pub backend_api_key: Option<String>,
    pub backend_connect_timeout_ms: u64,

    // Session timing
    /// Deadline for reaching the bridged phase
    pub negotiation_timeout_ms: u64,
    /// Bound on each teardown wait
    pub drain_timeout_ms: u64,
    /// Bound on each request handed to the backend
    pub send_timeout_ms: u64,

    // Browser transport
    pub webrtc_min_chunk_bytes: usize,
    pub webrtc_sample_rate: u32,

    // Telephony transport (disabled unless an address is set)
    pub audiosocket_address: Option<String>,
    pub audiosocket_assistant_id: Option<u64>,
    pub audiosocket_min_chunk_bytes: usize,
    pub audiosocket_pace_output: bool,

    // Sentence segmentation
    pub sentence_delimiters: Vec<String>,
    pub sentence_queue_capacity: usize,

    // Downstream synthesizer (optional)
    pub synthesizer_url: Option<String>,
    pub synthesizer_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_api_key: None,
            backend_connect_timeout_ms: DEFAULT_BACKEND_CONNECT_TIMEOUT_MS,
            negotiation_timeout_ms: DEFAULT_NEGOTIATION_TIMEOUT_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            webrtc_min_chunk_bytes: DEFAULT_WEBRTC_MIN_CHUNK_BYTES,
            webrtc_sample_rate: DEFAULT_WEBRTC_SAMPLE_RATE,
            audiosocket_address: None,
            audiosocket_assistant_id: None,
            audiosocket_min_chunk_bytes: DEFAULT_AUDIOSOCKET_MIN_CHUNK_BYTES,
            audiosocket_pace_output: true,
            sentence_delimiters: SegmenterConfig::default().delimiters,
            sentence_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            synthesizer_url: None,
            synthesizer_api_key: None,
        }
    }
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.backend_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.synthesizer_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (with defaults)
    ///
    /// The .env file is loaded in main.rs, so its values are already visible
    /// here as environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the telephony listener should be started
    pub fn is_audiosocket_enabled(&self) -> bool {
        self.audiosocket_address.is_some()
    }

    pub fn backend_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Media format of browser sessions
    pub fn webrtc_format(&self) -> StreamFormat {
        StreamFormat::linear16(self.webrtc_sample_rate)
    }

    /// Media format of telephony sessions
    pub fn audiosocket_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: audiosocket::SAMPLE_RATE,
            encoding: AudioEncoding::Linear16,
            channels: 1,
        }
    }

    /// Session settings for a browser session
    pub fn webrtc_session_settings(&self) -> SessionSettings {
        SessionSettings {
            min_chunk_bytes: self.webrtc_min_chunk_bytes,
            negotiation_timeout: self.negotiation_timeout(),
            drain_timeout: self.drain_timeout(),
            send_timeout: self.send_timeout(),
            input_format: self.webrtc_format(),
            output_format: self.webrtc_format(),
            default_assistant_id: None,
            ..SessionSettings::default()
        }
    }

    /// Session settings for a telephony call
    pub fn audiosocket_session_settings(&self) -> SessionSettings {
        SessionSettings {
            min_chunk_bytes: self.audiosocket_min_chunk_bytes,
            negotiation_timeout: self.negotiation_timeout(),
            drain_timeout: self.drain_timeout(),
            send_timeout: self.send_timeout(),
            input_format: self.audiosocket_format(),
            output_format: self.audiosocket_format(),
            default_assistant_id: self.audiosocket_assistant_id,
            ..SessionSettings::default()
        }
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            delimiters: self.sentence_delimiters.clone(),
            queue_capacity: self.sentence_queue_capacity,
            backpressure: BackpressurePolicy::Block,
        }
    }
}
