//! Server lifecycle: listener, handshake, and the loops behind them

mod broadcast;
mod clients;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::{self, AudioFormat, AudioSource};
use crate::capture::{self, FrameEncoder, FrameSource};
use crate::config::{ConfigError, MirrorConfig};
use crate::exchange::FrameExchange;
use crate::http::{self, StreamTarget};
use crate::stats::{Counters, MirrorStats};

use clients::{ClientQueue, ClientRegistry};

/// Deadline for a client to finish sending its request head
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// State shared by the loops, connection tasks, and the handle
pub(crate) struct Shared {
    pub(crate) exchange: Arc<FrameExchange>,
    pub(crate) clients: ClientRegistry,
    pub(crate) counters: Arc<Counters>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) audio_format: Option<AudioFormat>,
    pub(crate) audio_live: AtomicBool,
}

/// A configured mirror server, ready to start.
///
/// The frame source and encoder are the only capture-side collaborators;
/// wire in a real screen grabber by implementing [`FrameSource`].
pub struct MirrorServer {
    config: MirrorConfig,
    frame_source: Box<dyn FrameSource>,
    encoder: Box<dyn FrameEncoder>,
    audio_source: Option<Box<dyn AudioSource>>,
}

impl MirrorServer {
    pub fn new(
        config: MirrorConfig,
        frame_source: impl FrameSource + 'static,
        encoder: impl FrameEncoder + 'static,
    ) -> Self {
        Self {
            config,
            frame_source: Box::new(frame_source),
            encoder: Box::new(encoder),
            audio_source: None,
        }
    }

    /// Attaches an audio source; its format fixes the WAV preamble
    pub fn with_audio(mut self, source: impl AudioSource + 'static) -> Self {
        self.audio_source = Some(Box::new(source));
        self
    }

    /// Binds the listener, spawns the loops, and returns the handle that
    /// owns the instance.
    ///
    /// A bind failure is fatal and leaves nothing running. Port 0 asks
    /// the OS for an ephemeral port; the assigned one is on the handle.
    pub async fn start(self) -> Result<MirrorHandle, ServerError> {
        let MirrorServer {
            config,
            frame_source,
            encoder,
            audio_source,
        } = self;

        config.validate()?;

        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{}", config.bind_addr, config.port),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?
            .port();

        let audio_format = audio_source.as_ref().map(|source| source.format());
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            exchange: Arc::new(FrameExchange::new()),
            clients: ClientRegistry::new(),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(true)),
            shutdown,
            audio_format,
            audio_live: AtomicBool::new(audio_format.is_some()),
        });

        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(config.max_fps));
        {
            let exchange = shared.exchange.clone();
            let counters = shared.counters.clone();
            let running = shared.running.clone();
            let quality = config.quality;
            std::thread::spawn(move || {
                capture::run_capture_loop(
                    frame_source,
                    encoder,
                    quality,
                    frame_interval,
                    exchange,
                    counters,
                    running,
                )
            });
        }

        if let Some(source) = audio_source {
            let shared = shared.clone();
            let block_bytes = config.audio.block_bytes;
            std::thread::spawn(move || broadcast::run_audio_relay(source, block_bytes, shared));
        }

        tokio::spawn(broadcast::run_push_loop(shared.clone()));
        tokio::spawn(run_accept_loop(listener, shared.clone()));

        info!(
            port = %port,
            quality = %config.quality,
            max_fps = %config.max_fps,
            audio = %audio_format.is_some(),
            "mirror server started"
        );

        Ok(MirrorHandle { port, shared })
    }
}

/// Handle owning a running server instance.
///
/// The only way to stop the instance is through this handle (or by
/// dropping it); there is no global server state. A stopped instance is
/// never restarted, a new one is built instead.
pub struct MirrorHandle {
    port: u16,
    shared: Arc<Shared>,
}

impl MirrorHandle {
    /// Port the listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Snapshot of the runtime counters and client gauges
    pub fn stats(&self) -> MirrorStats {
        self.shared.counters.snapshot(
            self.shared.clients.video_count(),
            self.shared.clients.audio_count(),
        )
    }

    /// Stops the instance: clears the running flag, closes the listener,
    /// and drops every client queue so their sockets close.
    ///
    /// Idempotent and prompt; the loops observe the flag within one
    /// bounded wait and exit on their own.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.shutdown.send_replace(true);
        self.shared.clients.close_all();

        info!("mirror server stopped");
    }
}

impl fmt::Debug for MirrorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorHandle")
            .field("port", &self.port)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for MirrorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    debug!("accept loop started");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = shared.clone();
                    tokio::spawn(handle_connection(stream, peer, shared));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    debug!("accept loop stopped, listener closed");
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let (mut reader, mut writer) = stream.into_split();

    let request =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, http::read_request(&mut reader)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "rejecting malformed request");
                let _ = writer.write_all(http::NOT_FOUND_RESPONSE).await;
                return;
            }
            Err(_) => {
                debug!(peer = %peer, "request head timed out");
                return;
            }
        };

    match http::classify_target(&request.path) {
        StreamTarget::Video => serve_video(reader, writer, peer, shared).await,
        StreamTarget::Audio => serve_audio(reader, writer, peer, shared).await,
        StreamTarget::NotFound => {
            debug!(peer = %peer, path = %request.path, "no such stream");
            let _ = writer.write_all(http::NOT_FOUND_RESPONSE).await;
        }
    }
}

async fn serve_video(
    reader: tokio::net::tcp::OwnedReadHalf,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    peer: SocketAddr,
    shared: Arc<Shared>,
) {
    if !shared.running.load(Ordering::Relaxed) {
        return;
    }
    if writer.write_all(http::VIDEO_RESPONSE_HEAD).await.is_err() {
        return;
    }

    // Head first, then register, so every later broadcast reaches us
    let (id, mailbox) = shared.clients.register_video();
    shared.counters.clients_served.fetch_add(1, Ordering::Relaxed);
    info!(client_id = id, peer = %peer, "video client connected");

    let reason = clients::run_client_writer(reader, writer, ClientQueue::Video(mailbox)).await;

    shared.clients.remove_video(id);
    info!(client_id = id, peer = %peer, reason = %reason, "video client disconnected");
}

async fn serve_audio(
    reader: tokio::net::tcp::OwnedReadHalf,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    peer: SocketAddr,
    shared: Arc<Shared>,
) {
    if !shared.running.load(Ordering::Relaxed) {
        return;
    }

    let format = match shared.audio_format {
        Some(format) if shared.audio_live.load(Ordering::Relaxed) => format,
        _ => {
            debug!(peer = %peer, "audio requested but channel unavailable");
            let _ = writer.write_all(http::AUDIO_UNAVAILABLE_RESPONSE).await;
            return;
        }
    };

    if writer.write_all(http::AUDIO_RESPONSE_HEAD).await.is_err() {
        return;
    }
    if writer
        .write_all(&audio::wav_stream_header(&format))
        .await
        .is_err()
    {
        return;
    }

    let (id, rx) = shared.clients.register_audio();
    shared.counters.clients_served.fetch_add(1, Ordering::Relaxed);
    info!(
        client_id = id,
        peer = %peer,
        sample_rate = %format.sample_rate,
        channels = %format.channels,
        "audio client connected"
    );

    let reason = clients::run_client_writer(reader, writer, ClientQueue::Audio(rx)).await;

    shared.clients.remove_audio(id);
    info!(client_id = id, peer = %peer, reason = %reason, "audio client disconnected");
}
