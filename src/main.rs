use anyhow::{Context, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use guild_jukebox::{
    audio::SessionRegistry,
    bot::JukeboxBot,
    config::Config,
    sources::{DirectUrlSource, LocalFileSource, SourceRouter},
    voice::SongbirdConnector,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Fuentes de música
    let direct = DirectUrlSource::new(Duration::from_secs(config.http_timeout_secs))
        .context("Failed to build HTTP client")?;
    let loader = SourceRouter::new()
        .with_source(direct)
        .with_source(LocalFileSource::new(
            config.music_dir.clone(),
            config.max_playlist_size,
        ));

    let registry = Arc::new(SessionRegistry::new(Arc::new(loader), config.player()));

    // Voz
    let songbird = Songbird::serenity();
    let voice = Arc::new(SongbirdConnector::new(Arc::clone(&songbird)));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = JukeboxBot::new(Arc::clone(&config), Arc::clone(&registry), voice);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await
        .context("Failed to build Discord client")?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let shutdown_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_registry.shutdown_all();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    registry.shutdown_all();
    info!("👋 Sesiones cerradas, hasta luego");
    Ok(())
}
