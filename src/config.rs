use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::FRAME_DURATION;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub frame_buffer_duration_ms: u64,
    pub stuck_threshold_ms: u64,
    pub max_queue_size: usize,

    // Carga de tracks
    pub item_loader_pool_size: usize,
    pub max_playlist_size: usize,
    pub http_timeout_secs: u64,

    // Paths
    pub music_dir: Option<PathBuf>,
}

/// Audio-side settings handed to every guild session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    /// How much decoded audio a session may buffer ahead of the transport.
    pub frame_buffer_duration: Duration,
    /// A decoder that produces nothing for this long is reported as stuck.
    pub stuck_threshold: Duration,
    pub max_queue_size: usize,
    /// Upper bound on concurrently running track resolutions.
    pub item_loader_pool_size: usize,
}

impl PlayerConfig {
    /// Number of 20ms frames that fit in the configured buffer duration.
    pub fn frame_buffer_capacity(&self) -> usize {
        let frames = self.frame_buffer_duration.as_millis() / FRAME_DURATION.as_millis();
        (frames as usize).max(1)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Config::default().player()
    }
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid value for {}", key))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            frame_buffer_duration_ms: env_or("FRAME_BUFFER_DURATION_MS", "10000")?,
            stuck_threshold_ms: env_or("STUCK_THRESHOLD_MS", "10000")?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", "1000")?,

            // Carga de tracks
            item_loader_pool_size: env_or("ITEM_LOADER_POOL_SIZE", "10")?,
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", "100")?,
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", "30")?,

            // Paths
            music_dir: std::env::var("MUSIC_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The frame buffer must hold at least one 20ms frame
    /// - The stuck threshold must be longer than one frame
    /// - Queue, playlist and loader pool sizes must be greater than zero
    /// - The music directory, when set, must exist
    pub fn validate(&self) -> Result<()> {
        if self.frame_buffer_duration_ms < FRAME_DURATION.as_millis() as u64 {
            anyhow::bail!(
                "Frame buffer duration must be at least {}ms, got: {}ms",
                FRAME_DURATION.as_millis(),
                self.frame_buffer_duration_ms
            );
        }

        if self.stuck_threshold_ms <= FRAME_DURATION.as_millis() as u64 {
            anyhow::bail!(
                "Stuck threshold must exceed one frame, got: {}ms",
                self.stuck_threshold_ms
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.item_loader_pool_size == 0 {
            anyhow::bail!("Item loader pool size must be greater than 0");
        }

        if let Some(dir) = &self.music_dir {
            if !dir.is_dir() {
                anyhow::bail!("Music directory does not exist: {}", dir.display());
            }
        }

        Ok(())
    }

    /// Projects the settings every guild session needs.
    pub fn player(&self) -> PlayerConfig {
        PlayerConfig {
            frame_buffer_duration: Duration::from_millis(self.frame_buffer_duration_ms),
            stuck_threshold: Duration::from_millis(self.stuck_threshold_ms),
            max_queue_size: self.max_queue_size,
            item_loader_pool_size: self.item_loader_pool_size,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}ms buffer, {}ms stuck threshold\n  \
            Limits: {} queue, {} playlist, {} concurrent loads\n  \
            Sources: music dir {}, http timeout {}s",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.frame_buffer_duration_ms,
            self.stuck_threshold_ms,
            self.max_queue_size,
            self.max_playlist_size,
            self.item_loader_pool_size,
            self.music_dir
                .as_ref()
                .map_or("disabled".to_string(), |d| d.display().to_string()),
            self.http_timeout_secs,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            frame_buffer_duration_ms: 10_000, // 10 segundos de audio pre-decodificado
            stuck_threshold_ms: 10_000,
            max_queue_size: 1000,

            item_loader_pool_size: 10,
            max_playlist_size: 100,
            http_timeout_secs: 30,

            music_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_player_config() {
        let player = Config::default().player();
        assert_eq!(player.frame_buffer_duration, Duration::from_secs(10));
        assert_eq!(player.frame_buffer_capacity(), 500);
        assert_eq!(player.item_loader_pool_size, 10);
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let config = Config {
            frame_buffer_duration_ms: 5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            item_loader_pool_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret-token".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.summary().contains("super-secret-token"));
    }
}
