use url::Url;

use super::ServerConfig;
use crate::core::conversation::StreamFormat;

/// Largest inbound chunk, in milliseconds of audio, a transport may buffer
const MAX_CHUNK_DURATION_MS: u64 = 200;

/// Validate a merged configuration
pub fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.port == 0 {
        return Err("PORT must be non-zero".into());
    }

    validate_backend_url(&config.backend_url)?;

    if config.negotiation_timeout_ms == 0 {
        return Err("NEGOTIATION_TIMEOUT_MS must be greater than zero".into());
    }
    if config.send_timeout_ms == 0 {
        return Err("SEND_TIMEOUT_MS must be greater than zero".into());
    }
    if config.webrtc_sample_rate == 0 {
        return Err("WEBRTC_SAMPLE_RATE must be greater than zero".into());
    }

    validate_chunk_size(
        "WEBRTC_MIN_CHUNK_BYTES",
        config.webrtc_min_chunk_bytes,
        config.webrtc_format(),
    )?;
    validate_chunk_size(
        "AUDIOSOCKET_MIN_CHUNK_BYTES",
        config.audiosocket_min_chunk_bytes,
        config.audiosocket_format(),
    )?;

    if config.audiosocket_address.is_some() && config.audiosocket_assistant_id.is_none() {
        return Err(
            "AUDIOSOCKET_ADDRESS requires AUDIOSOCKET_ASSISTANT_ID to select the assistant for calls"
                .into(),
        );
    }

    if let Some(url) = &config.synthesizer_url {
        Url::parse(url).map_err(|e| format!("Invalid SYNTHESIZER_URL '{url}': {e}"))?;
    }

    Ok(())
}

fn validate_backend_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid BACKEND_URL '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(format!(
            "BACKEND_URL must use ws or wss, got '{}'",
            parsed.scheme()
        )
        .into());
    }
    Ok(())
}

fn validate_chunk_size(
    key: &str,
    bytes: usize,
    format: StreamFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if bytes == 0 {
        return Err(format!("{key} must be greater than zero").into());
    }
    let duration = format.duration_ms(bytes);
    if duration > MAX_CHUNK_DURATION_MS {
        return Err(format!(
            "{key} is {bytes} bytes ({duration}ms of {format}), the maximum is {MAX_CHUNK_DURATION_MS}ms"
        )
        .into());
    }
    Ok(())
}
