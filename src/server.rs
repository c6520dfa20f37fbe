//! Server bootstrap: construct every component, bind the listeners, and
//! run until a shutdown signal.

use crate::api::{self, ApiState};
use crate::attention::{AttentionEngine, LlmClient, OllamaClient};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::dispatch::{self, DispatcherHandle};
use crate::error::{AttuneError, Result};
use crate::filter::{ProfileRegistry, VoiceFilter};
use crate::hub::{ConnectionHub, HubConfig};
use crate::pipeline::{self, PipelineHandle};
use crate::resilience::Resilience;
use crate::stt::{
    BridgeHandle, DeepgramStream, SttStream, TranscriptionBridge, TranscriptionBridgeConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

/// Builder for a fully wired server.
pub struct Server {
    config: Config,
    stt: Option<Arc<dyn SttStream>>,
    llm: Option<Arc<dyn LlmClient>>,
    bridge_config: TranscriptionBridgeConfig,
    config_path: Option<PathBuf>,
    profiles_path: Option<PathBuf>,
}

impl Server {
    /// Start from configuration; external services are built from it unless
    /// overridden below.
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            stt: None,
            llm: None,
            bridge_config: TranscriptionBridgeConfig::default(),
            config_path: None,
            profiles_path: None,
        }
    }

    /// Override bridge retry/backoff timing (tests shrink the delays).
    pub fn with_bridge_config(mut self, bridge_config: TranscriptionBridgeConfig) -> Self {
        self.bridge_config = bridge_config;
        self
    }

    /// Substitute the transcription stream (tests use a mock).
    pub fn with_stt(mut self, stt: Arc<dyn SttStream>) -> Self {
        self.stt = Some(stt);
        self
    }

    /// Substitute the LLM client (tests use a mock).
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Persist configuration changes made over the control API here.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Persist the voice-profile registry here.
    pub fn with_profiles_path(mut self, path: PathBuf) -> Self {
        self.profiles_path = Some(path);
        self
    }

    /// Bind the listeners and spawn every component.
    ///
    /// Failing to bind either port is the one fatal startup error.
    pub async fn start(self) -> Result<ServerHandle> {
        let config = Arc::new(RwLock::new(self.config.clone()));
        let resilience = Arc::new(Resilience::new());
        let clock = Arc::new(SystemClock);

        let stt: Arc<dyn SttStream> = self.stt.unwrap_or_else(|| {
            Arc::new(DeepgramStream::new(
                self.config.stt.endpoint.clone(),
                self.config.stt.api_key.clone(),
            ))
        });
        let llm: Arc<dyn LlmClient> = self.llm.unwrap_or_else(|| {
            Arc::new(OllamaClient::new(
                self.config.llm.endpoint.clone(),
                self.config.llm.model.clone(),
                Duration::from_millis(self.config.llm.timeout_ms),
            ))
        });

        let filter = Arc::new(match self.profiles_path {
            Some(path) => VoiceFilter::with_store(path, self.config.detection.sensitivity),
            None => VoiceFilter::new(ProfileRegistry::new(self.config.detection.sensitivity)),
        });

        let engine = Arc::new(Mutex::new(AttentionEngine::new(
            &self.config.detection,
            Some(llm),
            self.config.llm.enabled,
            Arc::clone(&resilience),
        )));

        let (hub_event_tx, hub_event_rx) = mpsc::channel(256);
        let hub = ConnectionHub::new(HubConfig::default(), clock, hub_event_tx);

        let (bridge_event_tx, bridge_event_rx) = mpsc::channel(256);
        let bridge = TranscriptionBridge::spawn(
            stt,
            Arc::clone(&resilience),
            self.bridge_config,
            bridge_event_tx,
        );

        let (command_tx, command_rx) = mpsc::channel(64);
        let dispatcher = dispatch::spawn(
            Duration::from_millis(self.config.detection.silence_timeout_ms),
            self.config.detection.sensitivity,
            command_tx,
        );

        let pipeline = pipeline::spawn(
            Arc::clone(&hub),
            hub_event_rx,
            Arc::clone(&filter),
            bridge.clone(),
            bridge_event_rx,
            Arc::clone(&engine),
            dispatcher.clone(),
            command_rx,
            Arc::clone(&config),
            Arc::clone(&resilience),
        );

        let ws_listener = bind(self.config.server.ws_port).await?;
        let api_listener = bind(self.config.server.port).await?;
        let ws_addr = local_addr(&ws_listener)?;
        let api_addr = local_addr(&api_listener)?;

        let api_state = ApiState {
            config,
            config_path: self.config_path,
            filter: Arc::clone(&filter),
            engine,
            dispatcher: dispatcher.clone(),
            resilience,
            hub: Arc::clone(&hub),
            started_at: Instant::now(),
        };

        let heartbeat = hub.spawn_heartbeat_monitor();
        let ws_task = tokio::spawn(Arc::clone(&hub).serve(ws_listener));
        let api_task = tokio::spawn(api::serve(api_listener, api_state));

        info!(%ws_addr, %api_addr, "attune listening");

        Ok(ServerHandle {
            ws_addr,
            api_addr,
            hub,
            bridge,
            pipeline,
            dispatcher,
            filter,
            heartbeat,
            serve_tasks: vec![ws_task, api_task],
        })
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{port}");
    TcpListener::bind(&addr).await.map_err(|e| AttuneError::Bind {
        endpoint: addr,
        message: e.to_string(),
    })
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr> {
    listener.local_addr().map_err(AttuneError::Io)
}

/// A running server.
pub struct ServerHandle {
    pub ws_addr: SocketAddr,
    pub api_addr: SocketAddr,
    hub: Arc<ConnectionHub>,
    bridge: BridgeHandle,
    pipeline: PipelineHandle,
    dispatcher: DispatcherHandle,
    filter: Arc<VoiceFilter>,
    heartbeat: tokio::task::JoinHandle<()>,
    serve_tasks: Vec<tokio::task::JoinHandle<Result<()>>>,
}

impl ServerHandle {
    /// The connection hub (for direct inspection in tests).
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// The voice filter and its profile registry.
    pub fn filter(&self) -> &Arc<VoiceFilter> {
        &self.filter
    }

    /// The dispatcher control handle.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Terminate sessions, close the STT stream, and stop every task.
    pub async fn shutdown(self) {
        self.hub.terminate_all().await;
        self.bridge.shutdown().await;
        self.pipeline.stop();
        self.heartbeat.abort();
        for task in self.serve_tasks {
            task.abort();
        }
        info!("server stopped");
    }
}

/// Run a server until SIGINT or SIGTERM.
pub async fn run(config: Config, config_path: Option<PathBuf>, quiet: bool) -> Result<()> {
    let mut server = Server::from_config(config)
        .with_profiles_path(Config::default_profiles_path());
    if let Some(path) = config_path {
        server = server.with_config_path(path);
    }
    let handle = server.start().await?;

    if !quiet {
        eprintln!("attune ready.");
        eprintln!("  client channel: ws://{}", handle.ws_addr);
        eprintln!("  control API:    http://{}", handle.api_addr);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nReceived SIGINT, shutting down...");
            }
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                eprintln!("Error setting up signal handler: {e}");
            }
            if !quiet {
                eprintln!("\nReceived SIGTERM, shutting down...");
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Wait for SIGTERM (used by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| AttuneError::Other(format!("Failed to register SIGTERM handler: {e}")))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C still works)
    std::future::pending::<()>().await
}
