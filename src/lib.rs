//! Per-guild music playback for a Discord bot.
//!
//! - [`audio`]: sessions, scheduling and the frame bridge
//! - [`sources`]: resolving queries into tracks and decoding them
//! - [`voice`]: songbird glue that feeds the bridge to a voice call
//! - [`bot`]: slash commands on top of all of the above

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod voice;
