//! # Bot Module
//!
//! Thin Discord adapter over the audio core.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]: it registers the
//! slash commands, turns each command into calls on the guild's
//! [`GuildSession`], and forwards session notices to the text channel where
//! music was requested. All playback state lives in the [`SessionRegistry`].

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{GuildSession, SessionRegistry},
    config::Config,
    voice::VoiceConnector,
};

/// Tarea que publica los avisos de una sesión en un canal
struct Announcer {
    session: Weak<GuildSession>,
    task: JoinHandle<()>,
}

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: Bot configuration (tokens, command registration)
/// - `registry`: Per-guild playback sessions
/// - `voice`: Voice connections, one per guild
/// - `announcers`: Notice forwarding task per guild
pub struct JukeboxBot {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    voice: Arc<dyn VoiceConnector>,
    announcers: DashMap<GuildId, Announcer>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        voice: Arc<dyn VoiceConnector>,
    ) -> Self {
        Self {
            config,
            registry,
            voice,
            announcers: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn voice(&self) -> &dyn VoiceConnector {
        self.voice.as_ref()
    }

    /// Starts forwarding `session`'s notices to `channel_id`, unless that is
    /// already happening for this session.
    pub fn watch_session(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
        session: &Arc<GuildSession>,
    ) {
        self.prune_announcers();

        let watching = self.announcers.get(&guild_id).is_some_and(|announcer| {
            !announcer.task.is_finished()
                && announcer
                    .session
                    .upgrade()
                    .is_some_and(|current| Arc::ptr_eq(&current, session))
        });
        if watching {
            return;
        }

        let task = events::spawn_announcer(Arc::clone(&ctx.http), channel_id, session.subscribe());
        let announcer = Announcer {
            session: Arc::downgrade(session),
            task,
        };
        if let Some(previous) = self.announcers.insert(guild_id, announcer) {
            previous.task.abort();
        }
    }

    pub fn stop_announcer(&self, guild_id: GuildId) {
        if let Some((_, announcer)) = self.announcers.remove(&guild_id) {
            announcer.task.abort();
        }
    }

    /// Drops announcers whose task ended or whose session was torn down.
    fn prune_announcers(&self) {
        self.announcers.retain(|guild_id, announcer| {
            let alive = !announcer.task.is_finished()
                && announcer
                    .session
                    .upgrade()
                    .is_some_and(|session| !session.is_closed());
            if !alive {
                debug!("📢 Anunciador obsoleto eliminado en guild {}", guild_id);
                announcer.task.abort();
            }
            alive
        });
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (instant
    /// propagation, for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Stops playback when the bot is disconnected from voice by someone else.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            if let Some(session) = self.registry.get(guild_id) {
                session.stop();
            }
            self.stop_announcer(guild_id);
            self.prune_announcers();
            // Limpiar la llamada para que el próximo /play vuelva a conectar
            if let Err(e) = self.voice.disconnect(guild_id).await {
                warn!("Error limpiando conexión de voz: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::bridge::FrameBridge, config::PlayerConfig, sources::testing::FakeLoader};

    struct NoVoice;

    #[async_trait]
    impl VoiceConnector for NoVoice {
        async fn connect(&self, _: GuildId, _: ChannelId, _: Arc<FrameBridge>) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self, _: GuildId) -> Result<()> {
            Ok(())
        }
    }

    fn announcer(session: &Arc<GuildSession>) -> Announcer {
        Announcer {
            session: Arc::downgrade(session),
            task: tokio::spawn(std::future::pending::<()>()),
        }
    }

    #[tokio::test]
    async fn test_prune_drops_announcers_of_closed_sessions() {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(FakeLoader),
            PlayerConfig::default(),
        ));
        let bot = JukeboxBot::new(
            Arc::new(Config::default()),
            Arc::clone(&registry),
            Arc::new(NoVoice),
        );

        let (live, gone, finished) = (GuildId::new(1), GuildId::new(2), GuildId::new(3));
        let live_session = registry.get_or_create(live);
        let gone_session = registry.get_or_create(gone);
        registry.remove(gone);

        let done = announcer(&live_session);
        done.task.abort();
        while !done.task.is_finished() {
            tokio::task::yield_now().await;
        }

        bot.announcers.insert(live, announcer(&live_session));
        bot.announcers.insert(gone, announcer(&gone_session));
        bot.announcers.insert(finished, done);

        bot.prune_announcers();
        assert!(bot.announcers.contains_key(&live));
        assert!(!bot.announcers.contains_key(&gone));
        assert!(!bot.announcers.contains_key(&finished));
    }
}
