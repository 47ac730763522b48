use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// backend:
///   url: "wss://conversations.example.com/v1/talk"
///   api_key: "your-api-key"
///   connect_timeout_ms: 5000
///
/// session:
///   negotiation_timeout_ms: 10000
///   drain_timeout_ms: 2000
///   send_timeout_ms: 5000
///
/// webrtc:
///   min_chunk_bytes: 1920
///   sample_rate: 16000
///
/// audiosocket:
///   address: "0.0.0.0:9092"
///   assistant_id: 2214
///   min_chunk_bytes: 960
///   pace_output: true
///
/// segmenter:
///   delimiters: [".", "!", "?"]
///   queue_capacity: 16
///
/// synthesizer:
///   url: "https://tts.example.com/v1/speak"
///   api_key: "your-tts-key"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub backend: Option<BackendYaml>,
    pub session: Option<SessionYaml>,
    pub webrtc: Option<WebRtcYaml>,
    pub audiosocket: Option<AudioSocketYaml>,
    pub segmenter: Option<SegmenterYaml>,
    pub synthesizer: Option<SynthesizerYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Conversation backend configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

/// Session timing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub negotiation_timeout_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

/// Browser transport configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    pub min_chunk_bytes: Option<usize>,
    pub sample_rate: Option<u32>,
}

/// Telephony listener configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioSocketYaml {
    pub address: Option<String>,
    pub assistant_id: Option<u64>,
    pub min_chunk_bytes: Option<usize>,
    pub pace_output: Option<bool>,
}

/// Sentence segmenter configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SegmenterYaml {
    pub delimiters: Option<Vec<String>>,
    pub queue_capacity: Option<usize>,
}

/// Downstream synthesizer configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SynthesizerYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
backend:
  url: "wss://backend.example.com/talk"
  api_key: "backend-key"
  connect_timeout_ms: 3000
session:
  negotiation_timeout_ms: 15000
  drain_timeout_ms: 500
  send_timeout_ms: 750
webrtc:
  min_chunk_bytes: 3200
  sample_rate: 24000
audiosocket:
  address: "0.0.0.0:9092"
  assistant_id: 42
  min_chunk_bytes: 640
  pace_output: false
segmenter:
  delimiters: [".", ";"]
  queue_capacity: 4
synthesizer:
  url: "http://localhost:5002/speak"
  api_key: "tts-key"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host, Some("127.0.0.1".to_string()));
        assert_eq!(server.port, Some(8080));

        let backend = config.backend.unwrap();
        assert_eq!(backend.url, Some("wss://backend.example.com/talk".to_string()));
        assert_eq!(backend.api_key, Some("backend-key".to_string()));
        assert_eq!(backend.connect_timeout_ms, Some(3000));

        let session = config.session.unwrap();
        assert_eq!(session.negotiation_timeout_ms, Some(15000));
        assert_eq!(session.drain_timeout_ms, Some(500));
        assert_eq!(session.send_timeout_ms, Some(750));

        let webrtc = config.webrtc.unwrap();
        assert_eq!(webrtc.min_chunk_bytes, Some(3200));
        assert_eq!(webrtc.sample_rate, Some(24000));

        let audiosocket = config.audiosocket.unwrap();
        assert_eq!(audiosocket.address, Some("0.0.0.0:9092".to_string()));
        assert_eq!(audiosocket.assistant_id, Some(42));
        assert_eq!(audiosocket.min_chunk_bytes, Some(640));
        assert_eq!(audiosocket.pace_output, Some(false));

        let segmenter = config.segmenter.unwrap();
        assert_eq!(
            segmenter.delimiters,
            Some(vec![".".to_string(), ";".to_string()])
        );
        assert_eq!(segmenter.queue_capacity, Some(4));

        let synthesizer = config.synthesizer.unwrap();
        assert_eq!(synthesizer.url, Some("http://localhost:5002/speak".to_string()));
        assert_eq!(synthesizer.api_key, Some("tts-key".to_string()));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
server:
  port: 4000
audiosocket:
  address: "0.0.0.0:9092"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert!(server.host.is_none());
        assert_eq!(server.port, Some(4000));

        let audiosocket = config.audiosocket.unwrap();
        assert!(audiosocket.assistant_id.is_none());
        assert!(audiosocket.pace_output.is_none());

        assert!(config.backend.is_none());
        assert!(config.synthesizer.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.backend.is_none());
        assert!(config.session.is_none());
        assert!(config.webrtc.is_none());
        assert!(config.audiosocket.is_none());
        assert!(config.segmenter.is_none());
        assert!(config.synthesizer.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "localhost"
  port: 3000
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
