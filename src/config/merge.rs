use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Load the environment configuration and apply YAML overrides on top
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    if let Some(yaml) = yaml {
        apply_yaml(&mut config, yaml);
    }
    Ok(config)
}

fn apply_yaml(config: &mut ServerConfig, yaml: YamlConfig) {
    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(backend) = yaml.backend {
        if let Some(url) = backend.url {
            config.backend_url = url;
        }
        if backend.api_key.is_some() {
            config.backend_api_key = backend.api_key;
        }
        if let Some(timeout) = backend.connect_timeout_ms {
            config.backend_connect_timeout_ms = timeout;
        }
    }

    if let Some(session) = yaml.session {
        if let Some(timeout) = session.negotiation_timeout_ms {
            config.negotiation_timeout_ms = timeout;
        }
        if let Some(timeout) = session.drain_timeout_ms {
            config.drain_timeout_ms = timeout;
        }
        if let Some(timeout) = session.send_timeout_ms {
            config.send_timeout_ms = timeout;
        }
    }

    if let Some(webrtc) = yaml.webrtc {
        if let Some(bytes) = webrtc.min_chunk_bytes {
            config.webrtc_min_chunk_bytes = bytes;
        }
        if let Some(rate) = webrtc.sample_rate {
            config.webrtc_sample_rate = rate;
        }
    }

    if let Some(audiosocket) = yaml.audiosocket {
        if audiosocket.address.is_some() {
            config.audiosocket_address = audiosocket.address;
        }
        if audiosocket.assistant_id.is_some() {
            config.audiosocket_assistant_id = audiosocket.assistant_id;
        }
        if let Some(bytes) = audiosocket.min_chunk_bytes {
            config.audiosocket_min_chunk_bytes = bytes;
        }
        if let Some(pace) = audiosocket.pace_output {
            config.audiosocket_pace_output = pace;
        }
    }

    if let Some(segmenter) = yaml.segmenter {
        if let Some(delimiters) = segmenter.delimiters {
            config.sentence_delimiters = delimiters;
        }
        if let Some(capacity) = segmenter.queue_capacity {
            config.sentence_queue_capacity = capacity;
        }
    }

    if let Some(synthesizer) = yaml.synthesizer {
        if synthesizer.url.is_some() {
            config.synthesizer_url = synthesizer.url;
        }
        if synthesizer.api_key.is_some() {
            config.synthesizer_api_key = synthesizer.api_key;
        }
    }
}
