use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::{
    audio::{scheduler::Advance, Enqueued, LoadOutcome},
    bot::JukeboxBot,
    error::LoadError,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return reply(ctx, &command, "This command must be used in a guild.", true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "ping" => handle_ping(ctx, &command).await?,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await?,
        other => {
            warn!("Comando desconocido: {}", other);
            reply(ctx, &command, &format!("Unknown command: {}", other), true).await?;
        }
    }

    Ok(())
}

async fn reply(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "song")
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if query.is_empty() {
        return reply(ctx, command, "Please provide a song name or URL.", true).await;
    }

    let Some(voice_channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return reply(
            ctx,
            command,
            "You need to be in a voice channel to use this command.",
            true,
        )
        .await;
    };

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let session = bot.registry().get_or_create(guild_id);
    if let Err(e) = bot
        .voice()
        .connect(guild_id, voice_channel_id, session.bridge())
        .await
    {
        error!("❌ Error al conectar al canal de voz: {:?}", e);
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().content("❌ Could not join your voice channel."),
            )
            .await?;
        return Ok(());
    }

    bot.watch_session(ctx, guild_id, command.channel_id, &session);

    let result = session.load(&query).await;
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content(describe_load(&query, &result)),
        )
        .await?;

    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let advance = bot.registry().get(guild_id).and_then(|session| session.skip());
    reply(ctx, command, &describe_skip(advance.as_ref()), false).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Some(session) = bot.registry().get(guild_id) {
        session.stop();
    }
    if let Err(e) = bot.voice().disconnect(guild_id).await {
        warn!("Error al desconectar de voz: {:?}", e);
    }

    info!("⏹️ Música detenida en guild {}", guild_id);
    reply(ctx, command, "⏹️ Stopped music and cleared queue.", false).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.registry().get_or_create(guild_id).queue_snapshot();
    reply(ctx, command, &snapshot, false).await
}

async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let started = Instant::now();
    ctx.http.get_current_user().await?;
    let latency = started.elapsed().as_millis();

    info!("🏓 Ping ejecutado, latencia de API: {}ms", latency);
    reply(ctx, command, &format!("🏓 Pong! API latency: {}ms", latency), false).await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Err(e) = bot.voice().disconnect(guild_id).await {
        warn!("Error al desconectar de voz: {:?}", e);
    }
    bot.stop_announcer(guild_id);

    let content = match bot.registry().remove(guild_id) {
        Some(_) => "👋 Left the voice channel.",
        None => "📭 There is no music session here.",
    };
    reply(ctx, command, content, false).await
}

/// Canal de voz en el que está el usuario, según la caché
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Texto de respuesta para el resultado de `/play`
pub fn describe_load(query: &str, result: &Result<LoadOutcome, LoadError>) -> String {
    match result {
        Ok(LoadOutcome::Track {
            track,
            enqueued: Enqueued::Started,
        }) => format!("🎵 Playing: **{}**", track.title()),
        Ok(LoadOutcome::Track {
            track,
            enqueued: Enqueued::Queued { position },
        }) => format!("📋 Queued: **{}** (position {})", track.title(), position),
        Ok(LoadOutcome::Playlist { name, added, total }) => {
            let mut message = format!("📀 Playlist queued: **{}** ({} tracks)", name, added);
            if added < total {
                message.push_str(&format!(", {} left out because the queue is full", total - added));
            }
            message
        }
        Ok(LoadOutcome::Discarded) => "⚠️ The session ended before the track was queued.".to_string(),
        Err(LoadError::NoMatches(_)) => format!("❌ No matches found for: {}", query),
        Err(LoadError::Failed(reason)) => format!("❌ Could not play: {}", reason),
        Err(LoadError::Queue(e)) => format!("❌ Could not play: {}", e),
    }
}

pub fn describe_skip(advance: Option<&Advance>) -> String {
    match advance {
        Some(Advance {
            next: Some(next), ..
        }) => format!("⏭️ Skipped to next track: **{}**", next.title()),
        Some(_) => "⏭️ Skipped. The queue is empty now.".to_string(),
        None => "📭 Nothing is playing.".to_string(),
    }
}
