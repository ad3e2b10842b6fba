use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, sync::mpsc::UnboundedSender, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    bridge::FrameBridge,
    scheduler::{PlaybackDriver, PlayerEvent, PlayerEventKind},
    track::Track,
    FRAME_DURATION,
};
use crate::sources::TrackLoader;

/// Decodes the session's current track into its [`FrameBridge`].
///
/// Each call to [`start`](PlaybackDriver::start) spawns a fresh decode worker
/// with its own generation; the previous worker is cancelled first. Workers
/// report how their playback ended through the session's event channel.
pub struct AudioPlayer {
    guild_id: GuildId,
    loader: Arc<dyn TrackLoader>,
    bridge: Arc<FrameBridge>,
    events: UnboundedSender<PlayerEvent>,
    runtime: Handle,
    stuck_threshold: Duration,
    generation: u64,
    worker: Option<CancellationToken>,
    /// Parent of every worker token; cancelled when the session goes away.
    shutdown: CancellationToken,
}

impl AudioPlayer {
    pub fn new(
        guild_id: GuildId,
        loader: Arc<dyn TrackLoader>,
        bridge: Arc<FrameBridge>,
        events: UnboundedSender<PlayerEvent>,
        runtime: Handle,
        stuck_threshold: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            guild_id,
            loader,
            bridge,
            events,
            runtime,
            stuck_threshold,
            generation: 0,
            worker: None,
            shutdown,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_decoding(&self) -> bool {
        self.worker.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    fn cancel_worker(&mut self) {
        if let Some(token) = self.worker.take() {
            token.cancel();
        }
    }

    /// Moves to a new generation; frames of older ones stop being delivered.
    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.bridge.switch_to(self.generation);
        self.generation
    }
}

impl PlaybackDriver for AudioPlayer {
    fn start(&mut self, track: &Track) -> u64 {
        self.cancel_worker();
        let generation = self.bump_generation();

        let token = self.shutdown.child_token();
        self.worker = Some(token.clone());

        let worker = DecodeWorker {
            guild_id: self.guild_id,
            track: track.clone(),
            generation,
            loader: Arc::clone(&self.loader),
            bridge: Arc::clone(&self.bridge),
            events: self.events.clone(),
            stuck_threshold: self.stuck_threshold,
        };
        self.runtime.spawn(worker.run(token));

        generation
    }

    fn halt(&mut self) {
        self.cancel_worker();
        self.bump_generation();
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.cancel_worker();
    }
}

struct DecodeWorker {
    guild_id: GuildId,
    track: Track,
    generation: u64,
    loader: Arc<dyn TrackLoader>,
    bridge: Arc<FrameBridge>,
    events: UnboundedSender<PlayerEvent>,
    stuck_threshold: Duration,
}

impl DecodeWorker {
    async fn run(self, token: CancellationToken) {
        debug!(
            "🎧 Worker de decodificación iniciado para {} (generación {})",
            self.track.title(),
            self.generation
        );

        let kind = tokio::select! {
            _ = token.cancelled() => {
                debug!("🛑 Worker cancelado (generación {})", self.generation);
                return;
            }
            kind = self.pump() => kind,
        };

        let event = PlayerEvent {
            generation: self.generation,
            kind,
        };
        if self.events.send(event).is_err() {
            debug!("Sesión {} ya no escucha eventos", self.guild_id);
        }
    }

    /// Decodes until the track ends, fails, or stalls.
    async fn pump(&self) -> PlayerEventKind {
        let open = self.loader.open(&self.track);
        let mut source = match tokio::time::timeout(self.stuck_threshold, open).await {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => {
                warn!("❌ No se pudo abrir {}: {}", self.track.title(), e);
                return PlayerEventKind::TrackException(e.to_string());
            }
            Err(_) => return PlayerEventKind::TrackStuck(self.stuck_threshold),
        };

        let sink = self.bridge.sink(self.generation);
        let mut frames: u64 = 0;

        loop {
            // Solo cuenta el tiempo esperando al decodificador, no al buffer lleno
            match tokio::time::timeout(self.stuck_threshold, source.next_frame()).await {
                Ok(Ok(Some(frame))) => {
                    if !sink.send(frame).await {
                        return PlayerEventKind::TrackEnded;
                    }
                    frames += 1;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!("❌ Error decodificando {}: {}", self.track.title(), e);
                    return PlayerEventKind::TrackException(e.to_string());
                }
                Err(_) => return PlayerEventKind::TrackStuck(self.stuck_threshold),
            }
        }

        self.wait_for_drain().await;

        info!(
            "🏁 Decodificación completa: {} ({} frames)",
            self.track.title(),
            frames
        );
        PlayerEventKind::TrackEnded
    }

    /// The track ends once the transport has consumed what is left in the
    /// buffer, or once nothing has been consumed for `stuck_threshold`.
    async fn wait_for_drain(&self) {
        let mut remaining = self.bridge.buffered();
        let mut last_progress = Instant::now();

        while remaining > 0 && !self.bridge.is_closed() {
            if last_progress.elapsed() >= self.stuck_threshold {
                debug!(
                    "🔇 Nadie consume el buffer de guild {}, {} frames sin reproducir",
                    self.guild_id, remaining
                );
                return;
            }

            tokio::time::sleep(FRAME_DURATION).await;
            let now = self.bridge.buffered();
            if now < remaining {
                last_progress = Instant::now();
            }
            remaining = now;
        }
    }
}
