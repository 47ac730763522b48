use super::ServerConfig;
use super::utils::{env_bool, env_parse, env_string, parse_list};

/// Build a configuration from environment variables, falling back to defaults
pub fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_string("HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse("PORT")? {
        config.port = port;
    }

    if let Some(url) = env_string("BACKEND_URL") {
        config.backend_url = url;
    }
    config.backend_api_key = env_string("BACKEND_API_KEY");
    if let Some(timeout) = env_parse("BACKEND_CONNECT_TIMEOUT_MS")? {
        config.backend_connect_timeout_ms = timeout;
    }

    if let Some(timeout) = env_parse("NEGOTIATION_TIMEOUT_MS")? {
        config.negotiation_timeout_ms = timeout;
    }
    if let Some(timeout) = env_parse("DRAIN_TIMEOUT_MS")? {
        config.drain_timeout_ms = timeout;
    }
    if let Some(timeout) = env_parse("SEND_TIMEOUT_MS")? {
        config.send_timeout_ms = timeout;
    }

    if let Some(bytes) = env_parse("WEBRTC_MIN_CHUNK_BYTES")? {
        config.webrtc_min_chunk_bytes = bytes;
    }
    if let Some(rate) = env_parse("WEBRTC_SAMPLE_RATE")? {
        config.webrtc_sample_rate = rate;
    }

    config.audiosocket_address = env_string("AUDIOSOCKET_ADDRESS");
    config.audiosocket_assistant_id = env_parse("AUDIOSOCKET_ASSISTANT_ID")?;
    if let Some(bytes) = env_parse("AUDIOSOCKET_MIN_CHUNK_BYTES")? {
        config.audiosocket_min_chunk_bytes = bytes;
    }
    if let Some(pace) = env_bool("AUDIOSOCKET_PACE_OUTPUT")? {
        config.audiosocket_pace_output = pace;
    }

    if let Some(raw) = env_string("SENTENCE_DELIMITERS") {
        config.sentence_delimiters = parse_list(&raw);
    }
    if let Some(capacity) = env_parse("SENTENCE_QUEUE_CAPACITY")? {
        config.sentence_queue_capacity = capacity;
    }

    config.synthesizer_url = env_string("SYNTHESIZER_URL");
    config.synthesizer_api_key = env_string("SYNTHESIZER_API_KEY");

    Ok(config)
}
