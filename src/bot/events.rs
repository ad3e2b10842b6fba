use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::audio::SessionNotice;

/// Mensaje que se publica en el canal para cada aviso de la sesión
pub fn describe_notice(notice: &SessionNotice) -> String {
    match notice {
        SessionNotice::NowPlaying(track) => format!("🎵 Now playing: **{}**", track),
        SessionNotice::TrackFailed { track, reason } => {
            format!("⚠️ Could not play **{}**: {}. Skipping.", track.title(), reason)
        }
        SessionNotice::QueueFinished => "📭 Queue finished.".to_string(),
    }
}

/// Reenvía los avisos de una sesión al canal de texto donde se pidió música.
///
/// Termina sola cuando la sesión desaparece.
pub fn spawn_announcer(
    http: Arc<Http>,
    channel_id: ChannelId,
    mut notices: broadcast::Receiver<SessionNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let notice = match notices.recv().await {
                Ok(notice) => notice,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("📢 {} avisos perdidos en canal {}", skipped, channel_id);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match &notice {
                SessionNotice::TrackFailed { track, reason } => {
                    warn!("⚠️ Track fallido {}: {}", track.title(), reason)
                }
                other => debug!("📢 Aviso de sesión: {:?}", other),
            }

            if let Err(e) = channel_id.say(&*http, describe_notice(&notice)).await {
                warn!("Error al enviar aviso al canal {}: {:?}", channel_id, e);
            }
        }
        info!("📢 Anunciador del canal {} terminado", channel_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SourceKind, Track};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_notice_messages() {
        let track = Track::builder("/music/song.mp3", SourceKind::LocalFile)
            .title("Song")
            .author("Band")
            .duration(Duration::from_secs(185))
            .build();

        assert_eq!(
            describe_notice(&SessionNotice::NowPlaying(track.clone())),
            "🎵 Now playing: **Band - Song (3:05)**"
        );
        assert_eq!(
            describe_notice(&SessionNotice::TrackFailed {
                track,
                reason: "corrupt header".to_string()
            }),
            "⚠️ Could not play **Song**: corrupt header. Skipping."
        );
        assert_eq!(
            describe_notice(&SessionNotice::QueueFinished),
            "📭 Queue finished."
        );
    }
}
