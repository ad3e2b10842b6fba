use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{runtime::Handle, sync::Semaphore};
use tracing::{debug, info};

use super::session::GuildSession;
use crate::{config::PlayerConfig, sources::TrackLoader};

/// Every live guild session, keyed by guild.
///
/// Created once at startup and passed around explicitly. Must be built from
/// inside a tokio runtime; sessions spawn their background tasks on it.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    loader: Arc<dyn TrackLoader>,
    config: PlayerConfig,
    /// Shared by all sessions: caps concurrent resolutions process-wide.
    load_permits: Arc<Semaphore>,
    runtime: Handle,
}

impl SessionRegistry {
    pub fn new(loader: Arc<dyn TrackLoader>, config: PlayerConfig) -> Self {
        Self::with_runtime(loader, config, Handle::current())
    }

    pub fn with_runtime(loader: Arc<dyn TrackLoader>, config: PlayerConfig, runtime: Handle) -> Self {
        let load_permits = Arc::new(Semaphore::new(config.item_loader_pool_size.max(1)));
        Self {
            sessions: DashMap::new(),
            loader,
            config,
            load_permits,
            runtime,
        }
    }

    /// Returns the guild's session, creating it on first use.
    ///
    /// Concurrent callers for the same guild all get the same session; only
    /// one of them constructs it.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        if let Some(session) = self.sessions.get(&guild_id) {
            return Arc::clone(session.value());
        }

        // La entrada mantiene el shard bloqueado mientras se construye
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                GuildSession::new(
                    guild_id,
                    Arc::clone(&self.loader),
                    &self.config,
                    Arc::clone(&self.load_permits),
                    self.runtime.clone(),
                )
            })
            .value()
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Detaches the session and tears it down. `None` if there was none.
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        let (_, session) = self.sessions.remove(&guild_id)?;
        session.shutdown();
        debug!("🗑️ Sesión eliminada: {}", guild_id);
        Some(session)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes and tears down every session. Safe to call more than once.
    pub fn shutdown_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        if guilds.is_empty() {
            return;
        }

        info!("🛑 Cerrando {} sesiones de música", guilds.len());
        for guild_id in guilds {
            self.remove(guild_id);
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
