//! Shared application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::{
    ClientSink, ClientSource, PeerFactory, SessionBridge, SessionReport, SessionSettings,
    SocketMediaPeerFactory,
};
use crate::config::ServerConfig;
use crate::core::conversation::{ConversationBackend, WebSocketBackend};
use crate::core::synthesis::{HttpSynthesizer, Synthesizer};

/// State shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub backend: Arc<dyn ConversationBackend>,
    pub peers: Arc<dyn PeerFactory>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    active_sessions: AtomicUsize,
    shutdown: CancellationToken,
}

impl AppState {
    /// Builds the state and its collaborators from configuration.
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let backend = WebSocketBackend::new(&config.backend_url)?
            .with_api_key(config.backend_api_key.clone())
            .with_connect_timeout(config.backend_connect_timeout());

        let synthesizer: Option<Arc<dyn Synthesizer>> = match &config.synthesizer_url {
            Some(url) => Some(Arc::new(HttpSynthesizer::new(
                url,
                config.synthesizer_api_key.clone(),
            )?)),
            None => None,
        };

        let peers = Arc::new(SocketMediaPeerFactory::new(config.webrtc_format()));

        info!(
            backend = %backend.url(),
            synthesizer = synthesizer.is_some(),
            "Application state initialized"
        );
        Ok(Self::with_parts(config, Arc::new(backend), peers, synthesizer))
    }

    /// Builds the state from explicit collaborators.
    pub fn with_parts(
        config: ServerConfig,
        backend: Arc<dyn ConversationBackend>,
        peers: Arc<dyn PeerFactory>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            backend,
            peers,
            synthesizer,
            active_sessions: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Token cancelled when the process is shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels every running session and stops the listeners.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// New session bridge wired to the shared backend and synthesizer.
    pub fn session(&self, id: impl Into<String>, settings: SessionSettings) -> SessionBridge {
        let bridge = SessionBridge::new(id, settings, self.backend.clone());
        match &self.synthesizer {
            Some(synthesizer) => {
                bridge.with_synthesizer(synthesizer.clone(), self.config.segmenter_config())
            }
            None => bridge,
        }
    }

    /// Runs `bridge` to completion, counting it as active and cancelling it
    /// on shutdown.
    pub async fn run_session(
        &self,
        bridge: SessionBridge,
        source: Box<dyn ClientSource>,
        sink: Box<dyn ClientSink>,
    ) -> SessionReport {
        let _active = ActiveSession::enter(&self.active_sessions);

        let handle = bridge.handle();
        let shutdown = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.cancel();
        });

        let report = bridge.run(source, sink).await;
        watcher.abort();
        report
    }
}

struct ActiveSession<'a>(&'a AtomicUsize);

impl<'a> ActiveSession<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
