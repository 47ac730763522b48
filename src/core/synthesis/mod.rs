//! Downstream speech synthesis for text-only assistant output.
//!
//! When the conversation backend answers with text instead of audio, the
//! bridge segments that text into sentences and hands each one to a
//! [`Synthesizer`]. The returned audio is queued to the client like any other
//! assistant audio.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::core::segmenter::Sentence;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by a synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Synthesizer returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Result type for synthesis operations.
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Turns one sentence into audio in the session's output format.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, sentence: &Sentence) -> SynthesisResult<Bytes>;
}

/// Synthesizer reached over HTTP.
///
/// Sends `POST {url}` with `{"context_id": .., "text": ..}` and expects the raw
/// audio as the response body.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
}

impl HttpSynthesizer {
    pub fn new(url: &str, api_key: Option<String>) -> SynthesisResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| SynthesisError::InvalidConfiguration(format!("{url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, sentence: &Sentence) -> SynthesisResult<Bytes> {
        let mut request = self.client.post(self.url.clone()).json(&json!({
            "context_id": sentence.context_id,
            "text": sentence.text,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sentence(text: &str) -> Sentence {
        Sentence {
            context_id: "ctx-1".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_synthesize_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(header("authorization", "Bearer tts-key"))
            .and(body_json(json!({"context_id": "ctx-1", "text": "Hello."})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .expect(1)
            .mount(&server)
            .await;

        let synthesizer = HttpSynthesizer::new(
            &format!("{}/synthesize", server.uri()),
            Some("tts-key".to_string()),
        )
        .unwrap();

        let audio = synthesizer.synthesize(&sentence("Hello.")).await.unwrap();
        assert_eq!(audio.as_ref(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_synthesize_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let synthesizer = HttpSynthesizer::new(&server.uri(), None).unwrap();
        match synthesizer.synthesize(&sentence("Hi.")).await {
            Err(SynthesisError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("Expected status error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            HttpSynthesizer::new("::nope", None),
            Err(SynthesisError::InvalidConfiguration(_))
        ));
    }
}
