//! # Audio Module
//!
//! Per-guild playback sessions for the bot.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::GuildSession`] per guild, created on first use
//! - Exactly-once creation under concurrent callers
//! - Explicit removal and global shutdown
//!
//! ### [`scheduler`] - Playback Scheduler
//! - `Idle`/`Playing` state machine over a strict FIFO [`queue`]
//! - Player events (end, exception, stuck) handled by one transition routine
//!
//! ### [`player`] - Decode Worker
//! - Pumps the current track's frames into the bridge from a background task
//! - Detects stalled decoders and reports them as stuck; the blocking decode
//!   itself runs on a dedicated thread ([`crate::sources::DecodeThread`])
//!
//! ### [`bridge`] - Frame Bridge
//! - Bounded buffer of pre-decoded 20ms frames
//! - Non-blocking pull for the voice transport
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo, interleaved
//! - **Samples**: 32-bit float, little endian
//! - **Frame**: 20ms = 960 samples per channel
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::registry::SessionRegistry;
//! use guild_jukebox::config::PlayerConfig;
//! use guild_jukebox::sources::SourceRouter;
//! use serenity::all::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = SessionRegistry::new(Arc::new(SourceRouter::new()), PlayerConfig::default());
//! let session = registry.get_or_create(GuildId::new(123456789));
//!
//! session.load("/music/song.mp3").await?;
//! println!("{}", session.queue_snapshot());
//! session.skip();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

pub mod bridge;
pub mod player;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod track;

/// Cadence at which the voice transport pulls audio.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Samples per channel in one frame.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * 20;
/// Size of one encoded frame: interleaved f32 LE.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * std::mem::size_of::<f32>();

pub use bridge::FrameBridge;
pub use registry::SessionRegistry;
pub use scheduler::{Enqueued, PlaybackState, PlayerEvent, PlayerEventKind};
pub use session::{GuildSession, LoadOutcome, SessionNotice};
pub use track::{SourceKind, Track};
