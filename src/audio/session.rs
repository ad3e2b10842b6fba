use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::{Arc, Weak};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, oneshot, Semaphore},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    bridge::FrameBridge,
    player::AudioPlayer,
    scheduler::{Advance, Enqueued, PlaybackState, PlayerEvent, PlayerEventKind, TrackScheduler},
    track::Track,
};
use crate::{
    config::PlayerConfig,
    error::{LoadError, QueueError},
    sources::{LoadResult, TrackLoader},
};

const NOTICE_CAPACITY: usize = 64;

/// Things worth telling the guild about that happen outside of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    NowPlaying(Track),
    TrackFailed { track: Track, reason: String },
    QueueFinished,
}

/// What a successful [`GuildSession::load`] did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Track {
        track: Track,
        enqueued: Enqueued,
    },
    Playlist {
        name: String,
        /// Tracks that fit in the queue, counting one that started playing.
        added: usize,
        total: usize,
    },
    /// The session was removed before the result could be applied.
    Discarded,
}

/// Playback context of one guild.
///
/// All state transitions go through the scheduler mutex. It is only ever
/// held for synchronous work, never across an `.await`.
pub struct GuildSession {
    guild_id: GuildId,
    scheduler: Mutex<TrackScheduler<AudioPlayer>>,
    bridge: Arc<FrameBridge>,
    loader: Arc<dyn TrackLoader>,
    load_permits: Arc<Semaphore>,
    /// Completion signal of the most recently issued load.
    load_tail: Mutex<Option<oneshot::Receiver<()>>>,
    notices: broadcast::Sender<SessionNotice>,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl GuildSession {
    pub fn new(
        guild_id: GuildId,
        loader: Arc<dyn TrackLoader>,
        config: &PlayerConfig,
        load_permits: Arc<Semaphore>,
        runtime: Handle,
    ) -> Arc<Self> {
        let bridge = Arc::new(FrameBridge::new(config.frame_buffer_capacity()));
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let player = AudioPlayer::new(
            guild_id,
            Arc::clone(&loader),
            Arc::clone(&bridge),
            events_tx,
            runtime.clone(),
            config.stuck_threshold,
            shutdown.clone(),
        );
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let session = Arc::new(Self {
            guild_id,
            scheduler: Mutex::new(TrackScheduler::new(player, config.max_queue_size)),
            bridge,
            loader,
            load_permits,
            load_tail: Mutex::new(None),
            notices,
            shutdown: shutdown.clone(),
            runtime: runtime.clone(),
        });

        runtime.spawn(run_events(Arc::downgrade(&session), events_rx, shutdown));
        info!("🎶 Sesión creada para guild {}", guild_id);
        session
    }

    /// Audio source to hand to the voice transport.
    pub fn bridge(&self) -> Arc<FrameBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.scheduler.lock().state()
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.scheduler.lock().current().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.scheduler.lock().queue().len()
    }

    /// Pending tracks in playback order, without the current one.
    pub fn pending(&self) -> Vec<Track> {
        self.scheduler.lock().queue().iter().cloned().collect()
    }

    pub fn queue_snapshot(&self) -> String {
        self.scheduler.lock().queue_snapshot()
    }

    pub fn enqueue(&self, track: Track) -> Result<Enqueued, QueueError> {
        let enqueued = {
            let mut scheduler = self.scheduler.lock();
            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            scheduler.enqueue(track.clone())?
        };

        if enqueued == Enqueued::Started {
            self.notify(SessionNotice::NowPlaying(track));
        }
        Ok(enqueued)
    }

    /// Returns how many tracks were accepted; zero once the session is closed.
    pub fn enqueue_playlist(&self, tracks: Vec<Track>) -> usize {
        let (accepted, started) = {
            let mut scheduler = self.scheduler.lock();
            if self.is_closed() {
                return 0;
            }
            let was_idle = scheduler.state() == PlaybackState::Idle;
            let accepted = scheduler.enqueue_playlist(tracks);
            let started = if was_idle {
                scheduler.current().cloned()
            } else {
                None
            };
            (accepted, started)
        };

        if let Some(track) = started {
            self.notify(SessionNotice::NowPlaying(track));
        }
        accepted
    }

    /// Resolves `query` and queues the result.
    ///
    /// Resolutions run concurrently (bounded by the shared loader pool), but
    /// their results are applied in the order `load` was called for this
    /// session. A result that arrives after the session was removed is
    /// dropped and reported as [`LoadOutcome::Discarded`].
    ///
    /// # Errors
    /// - [`LoadError::NoMatches`] / [`LoadError::Failed`] when resolution fails;
    ///   the queue is left untouched
    /// - [`LoadError::Queue`] when the queue is full
    pub async fn load(self: &Arc<Self>, query: &str) -> Result<LoadOutcome, LoadError> {
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.load_tail.lock().replace(done_rx);

        let session = Arc::clone(self);
        let query = query.to_string();
        let task = self.runtime.spawn(async move {
            let outcome = session.resolve_in_order(&query, previous).await;
            // Libera al siguiente load aunque este haya fallado
            let _ = done_tx.send(());
            outcome
        });

        task.await
            .map_err(|e| LoadError::Failed(format!("load task aborted: {}", e)))?
    }

    async fn resolve_in_order(
        &self,
        query: &str,
        previous: Option<oneshot::Receiver<()>>,
    ) -> Result<LoadOutcome, LoadError> {
        let resolved = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = async {
                let result = self.resolve(query).await;
                if let Some(previous) = previous {
                    // Un load anterior abortado también cuenta como terminado
                    let _ = previous.await;
                }
                result
            } => Some(result),
        };

        match resolved {
            Some(result) => self.apply(query, result),
            None => {
                debug!("Load descartado, sesión {} cerrada: {}", self.guild_id, query);
                Ok(LoadOutcome::Discarded)
            }
        }
    }

    async fn resolve(&self, query: &str) -> LoadResult {
        let Ok(_permit) = self.load_permits.acquire().await else {
            return LoadResult::LoadFailed("loader pool is closed".to_string());
        };
        self.loader.resolve(query).await
    }

    fn apply(&self, query: &str, result: LoadResult) -> Result<LoadOutcome, LoadError> {
        if self.is_closed() {
            return Ok(LoadOutcome::Discarded);
        }

        match result {
            LoadResult::TrackLoaded(track) => match self.enqueue(track.clone()) {
                Ok(enqueued) => Ok(LoadOutcome::Track { track, enqueued }),
                Err(QueueError::Closed) => Ok(LoadOutcome::Discarded),
                Err(e) => {
                    warn!("📋 No se pudo encolar {}: {}", track.title(), e);
                    Err(e.into())
                }
            },
            LoadResult::PlaylistLoaded { name, tracks } => {
                let total = tracks.len();
                let added = self.enqueue_playlist(tracks);
                info!("📀 Playlist '{}': {}/{} tracks encolados", name, added, total);
                Ok(LoadOutcome::Playlist { name, added, total })
            }
            LoadResult::NoMatches => {
                warn!("🔍 Sin resultados para: {}", query);
                Err(LoadError::NoMatches(query.to_string()))
            }
            LoadResult::LoadFailed(reason) => {
                warn!("❌ Falló la carga de '{}': {}", query, reason);
                Err(LoadError::Failed(reason))
            }
        }
    }

    /// Abandons the current track. Returns the skipped track and what plays next.
    pub fn skip(&self) -> Option<Advance> {
        let advance = self.scheduler.lock().skip();
        if let Some(advance) = &advance {
            self.publish_advance(advance, None);
        }
        advance
    }

    /// Empties the queue and goes idle; the session stays usable.
    pub fn stop(&self) {
        self.scheduler.lock().stop();
    }

    fn on_player_event(&self, event: PlayerEvent) {
        let failure = match &event.kind {
            PlayerEventKind::TrackEnded => None,
            PlayerEventKind::TrackException(reason) => Some(reason.clone()),
            PlayerEventKind::TrackStuck(threshold) => Some(format!(
                "no audio for {}",
                humantime::format_duration(*threshold)
            )),
        };

        let advance = self.scheduler.lock().handle_event(event);
        if let Some(advance) = advance {
            self.publish_advance(&advance, failure);
        }
    }

    fn publish_advance(&self, advance: &Advance, failure: Option<String>) {
        if let Some(reason) = failure {
            self.notify(SessionNotice::TrackFailed {
                track: advance.previous.clone(),
                reason,
            });
        }
        match &advance.next {
            Some(track) => self.notify(SessionNotice::NowPlaying(track.clone())),
            None => self.notify(SessionNotice::QueueFinished),
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // Sin suscriptores no es un error
        let _ = self.notices.send(notice);
    }

    /// Stops playback, cancels background work and closes the bridge.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.scheduler.lock().stop();
        self.bridge.close();
        info!("👋 Sesión cerrada para guild {}", self.guild_id);
    }
}

impl Drop for GuildSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Feeds player events into the session until it is closed or dropped.
async fn run_events(
    session: Weak<GuildSession>,
    mut events: mpsc::UnboundedReceiver<PlayerEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(session) = session.upgrade() else {
            break;
        };
        session.on_player_event(event);
    }
    debug!("Loop de eventos terminado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{track, FakeLoader};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn config() -> PlayerConfig {
        PlayerConfig {
            frame_buffer_duration: Duration::from_millis(200),
            stuck_threshold: Duration::from_millis(200),
            max_queue_size: 10,
            item_loader_pool_size: 4,
        }
    }

    fn session_with(config: PlayerConfig) -> Arc<GuildSession> {
        GuildSession::new(
            GuildId::new(42),
            Arc::new(FakeLoader),
            &config,
            Arc::new(Semaphore::new(config.item_loader_pool_size)),
            Handle::current(),
        )
    }

    fn session() -> Arc<GuildSession> {
        session_with(config())
    }

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title().to_string()).collect()
    }

    fn playing(session: &GuildSession) -> Option<String> {
        session.now_playing().map(|t| t.title().to_string())
    }

    /// Pulls frames like the transport would until `done` holds.
    async fn drive_until(session: &GuildSession, done: impl Fn(&GuildSession) -> bool) {
        let bridge = session.bridge();
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while !done(session) {
                bridge.next_frame();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached in time");
    }

    async fn notice_matching(
        notices: &mut broadcast::Receiver<SessionNotice>,
        wanted: impl Fn(&SessionNotice) -> bool,
    ) -> SessionNotice {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(notice) = notices.recv().await {
                    if wanted(&notice) {
                        return notice;
                    }
                }
            }
        })
        .await
        .expect("notice not received")
    }

    #[tokio::test]
    async fn test_basic_playback_cycle() {
        let session = session();
        assert_eq!(session.state(), PlaybackState::Idle);

        // Idle + A: empieza de inmediato
        let outcome = session.load("short-a").await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Track {
                track: track("short-a"),
                enqueued: Enqueued::Started
            }
        );
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(playing(&session).as_deref(), Some("short-a"));
        assert_eq!(session.queue_len(), 0);

        // B se encola detrás de A
        let outcome = session.load("b").await.unwrap();
        assert!(matches!(
            outcome,
            LoadOutcome::Track {
                enqueued: Enqueued::Queued { position: 1 },
                ..
            }
        ));
        assert_eq!(playing(&session).as_deref(), Some("short-a"));
        assert_eq!(titles(&session.pending()), vec!["b"]);

        // A termina: B pasa a sonar
        drive_until(&session, |s| playing(s).as_deref() == Some("b")).await;
        assert_eq!(session.queue_len(), 0);

        session.stop();
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(session.now_playing(), None);
        assert_eq!(session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_loads_apply_in_request_order() {
        let session = session();

        // "slow:a" tarda más en resolverse pero se pidió primero
        let (first, second, third) = tokio::join!(
            session.load("slow:a"),
            session.load("b"),
            session.load("playlist:c,d")
        );

        assert!(matches!(
            first.unwrap(),
            LoadOutcome::Track {
                enqueued: Enqueued::Started,
                ..
            }
        ));
        assert!(matches!(
            second.unwrap(),
            LoadOutcome::Track {
                enqueued: Enqueued::Queued { position: 1 },
                ..
            }
        ));
        assert_eq!(
            third.unwrap(),
            LoadOutcome::Playlist {
                name: "mix".to_string(),
                added: 2,
                total: 2
            }
        );
        assert_eq!(playing(&session).as_deref(), Some("a"));
        assert_eq!(titles(&session.pending()), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_queue_alone() {
        let session = session();
        session.load("a").await.unwrap();
        session.load("b").await.unwrap();

        let result = session.load("badurl").await;
        assert_eq!(result, Err(LoadError::Failed("unreachable host".to_string())));

        let result = session.load("missing song").await;
        assert_eq!(
            result,
            Err(LoadError::NoMatches("missing song".to_string()))
        );

        assert_eq!(playing(&session).as_deref(), Some("a"));
        assert_eq!(titles(&session.pending()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let session = session_with(PlayerConfig {
            max_queue_size: 1,
            ..config()
        });
        session.load("a").await.unwrap();
        session.load("b").await.unwrap();

        assert_eq!(
            session.load("c").await,
            Err(LoadError::Queue(QueueError::Full(1)))
        );
        assert_eq!(titles(&session.pending()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_broken_track_advances_and_notifies() {
        let session = session();
        let mut notices = session.subscribe();

        session.load("broken-a").await.unwrap();
        session.load("b").await.unwrap();

        let notice = notice_matching(&mut notices, |n| {
            matches!(n, SessionNotice::TrackFailed { .. })
        })
        .await;
        assert!(matches!(
            notice,
            SessionNotice::TrackFailed { track, .. } if track.title() == "broken-a"
        ));

        drive_until(&session, |s| playing(s).as_deref() == Some("b")).await;
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_stuck_track_advances_to_idle() {
        let session = session();
        let mut notices = session.subscribe();

        session.load("stall").await.unwrap();

        notice_matching(&mut notices, |n| *n == SessionNotice::QueueFinished).await;
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(session.now_playing(), None);
    }

    #[tokio::test]
    async fn test_bridge_delivers_audio_while_playing() {
        let session = session();
        let bridge = session.bridge();
        assert_eq!(bridge.next_frame(), None);

        session.load("a").await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(frame) = bridge.next_frame() {
                    return frame;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(frame.len(), crate::audio::FRAME_BYTES);
    }

    #[tokio::test]
    async fn test_skip_walks_the_queue() {
        let session = session();
        assert_eq!(session.skip(), None);

        session.load("playlist:a,b").await.unwrap();

        let advance = session.skip().unwrap();
        assert_eq!(advance.previous.title(), "a");
        assert_eq!(playing(&session).as_deref(), Some("b"));

        let advance = session.skip().unwrap();
        assert_eq!(advance.next, None);
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_closed_session_ignores_everything() {
        let session = session();
        session.load("a").await.unwrap();
        let bridge = session.bridge();

        session.shutdown();
        session.shutdown();

        assert_eq!(session.load("b").await, Ok(LoadOutcome::Discarded));
        assert_eq!(session.enqueue(track("c")), Err(QueueError::Closed));
        assert_eq!(session.enqueue_playlist(vec![track("d")]), 0);
        assert_eq!(session.state(), PlaybackState::Idle);

        for _ in 0..20 {
            assert_eq!(bridge.next_frame(), None);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_pending_load_is_discarded_on_shutdown() {
        let session = session();
        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.load("slow:late").await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.shutdown();

        assert_eq!(pending.await.unwrap(), Ok(LoadOutcome::Discarded));
        assert_eq!(session.now_playing(), None);
    }
}
